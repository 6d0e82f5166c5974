//! HTTP tracker client.
//!
//! One announce per download: the tracker is asked for peers once, with
//! `compact=1`, and the reply is turned into socket addresses.

use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    time::Duration,
};

use tracing::{debug, info};

use crate::{bencode::Value, error::Error, metainfo::InfoHash, peer::PeerId};

#[derive(Debug, Clone)]
pub struct Tracker {
    client: reqwest::Client,
    announce: String,
    peer_id: PeerId,
    /// Port announced as ours.
    port: u16,
}

/// Transfer statistics sent along with an announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Announce {
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
}

impl Tracker {
    /// # Errors
    ///
    /// [`Error::TrackerUrl`] when `announce` is not an HTTP(S) URL.
    pub fn new(
        announce: &str,
        peer_id: PeerId,
        port: u16,
        timeout: Duration,
    ) -> Result<Self, Error> {
        if !(announce.starts_with("http://") || announce.starts_with("https://")) {
            return Err(Error::TrackerUrl(announce.to_owned()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { client, announce: announce.to_owned(), peer_id, port })
    }

    /// The full announce URL. The binary fields are percent-encoded byte by
    /// byte.
    pub fn announce_url(&self, info_hash: &InfoHash, announce: Announce) -> String {
        let separator = if self.announce.contains('?') { '&' } else { '?' };

        format!(
            "{}{separator}info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            self.announce,
            urlencoding::encode_binary(&info_hash.0),
            urlencoding::encode_binary(&self.peer_id.0),
            self.port,
            announce.uploaded,
            announce.downloaded,
            announce.left,
        )
    }

    /// Ask the tracker for peers.
    ///
    /// # Errors
    ///
    /// Fails when the tracker can't be reached, answers with a non-success
    /// status, or its reply is not a valid peer list.
    #[tracing::instrument(skip_all, name = "tracker::announce")]
    pub async fn announce(
        &self,
        info_hash: &InfoHash,
        announce: Announce,
    ) -> Result<Vec<SocketAddr>, Error> {
        let url = self.announce_url(info_hash, announce);
        debug!("GET {url}");

        let res = self.client.get(&url).send().await?.error_for_status()?;
        let bytes = res.bytes().await?;

        let peers = parse_response(&bytes)?;
        info!("tracker {} answered with {} peers", self.announce, peers.len());

        Ok(peers)
    }
}

/// Parse the bencoded body of an announce reply.
pub fn parse_response(buf: &[u8]) -> Result<Vec<SocketAddr>, Error> {
    let res = Value::decode(buf).map_err(|_| Error::TrackerResponse)?;

    if let Ok(Some(reason)) = res.get("failure reason") {
        let reason = String::from_utf8_lossy(reason.as_bytes()?).into_owned();
        return Err(Error::TrackerFailure(reason));
    }

    let peers = res
        .get("peers")
        .map_err(|_| Error::TrackerResponse)?
        .ok_or(Error::TrackerResponse)?;

    match peers {
        Value::Bytes(compact) => parse_compact_peer_list(compact),
        // some trackers ignore `compact=1`
        Value::List(list) => list.iter().map(parse_peer_dict).collect(),
        _ => Err(Error::TrackerResponse),
    }
}

/// Each peer is 6 bytes: a big-endian IPv4 address followed by a big-endian
/// port.
pub fn parse_compact_peer_list(buf: &[u8]) -> Result<Vec<SocketAddr>, Error> {
    if buf.len() % 6 != 0 {
        return Err(Error::TrackerCompactPeerList);
    }

    Ok(buf
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::V4(SocketAddrV4::new(ip, port))
        })
        .collect())
}

fn parse_peer_dict(peer: &Value) -> Result<SocketAddr, Error> {
    let ip = peer.require("ip")?.as_str()?;
    let port = peer.require("port")?.as_int()?;

    let ip = ip.parse().map_err(|_| Error::TrackerResponse)?;
    let port = u16::try_from(port).map_err(|_| Error::TrackerResponse)?;

    Ok(SocketAddr::new(ip, port))
}
