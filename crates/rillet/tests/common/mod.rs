//! Module to share types for integration tests.
//!
//! A download needs a tracker and peers to talk to. Both are mocked here over
//! real sockets on localhost, so the engine runs exactly as in production.

mod peer;
mod tracker;

pub use peer::*;
pub use tracker::*;

use bendy::encoding::ToBencode;
use rillet::{
    error::Error,
    metainfo::{Info, InfoHash, MetaInfo},
};

pub fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .without_time()
        .with_test_writer()
        .try_init();
}

/// Deterministic content of `len` bytes.
pub fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

/// The info dictionary of a single file torrent of `content`.
pub fn info(name: &str, content: &[u8], piece_length: usize) -> Info {
    let pieces = content
        .chunks(piece_length)
        .flat_map(|piece| sha1_smol::Sha1::from(piece).digest().bytes())
        .collect();

    Info {
        file_length: Some(content.len()),
        name: name.to_owned(),
        piece_length,
        pieces,
        ..Default::default()
    }
}

/// Info hash as peers and trackers compute it, over the encoded dictionary.
pub fn info_hash(info: &Info) -> Result<InfoHash, Error> {
    let bytes = info.to_bencode()?;
    Ok(InfoHash(sha1_smol::Sha1::from(bytes).digest().bytes()))
}

/// Bytes of the .torrent file.
pub fn torrent_file(announce: String, info: Info) -> Result<Vec<u8>, Error> {
    Ok(MetaInfo { announce, info }.to_bencode()?)
}
