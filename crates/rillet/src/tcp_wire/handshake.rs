//! Codec for encoding and decoding handshakes.
//!
//! This has to be a separate codec as the handshake has a different
//! structure than the rest of the messages. Moreover, handshakes may only
//! be sent once at the beginning of a connection, preceding all other
//! messages. Thus, after receiving and sending a handshake the codec
//! should be switched to [`super::CoreCodec`], but care should be taken not
//! to discard the underlying receive and send buffers.

use std::io;

use bytes::{Buf, BytesMut};
use speedy::{BigEndian, Readable, Writable};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::PSTR;
use crate::{error::Error, metainfo::InfoHash, peer::PeerId};

/// Length of a serialized handshake.
pub const HANDSHAKE_LEN: usize = 1 + 19 + 8 + 20 + 20;

#[derive(Debug)]
pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {
    type Error = io::Error;

    fn encode(&mut self, handshake: Handshake, buf: &mut BytesMut) -> io::Result<()> {
        // we should only be sending the bittorrent protocol string
        debug_assert_eq!(handshake.pstr, PSTR);

        let bytes = handshake
            .serialize()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        buf.extend_from_slice(&bytes);

        Ok(())
    }
}

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<Handshake>> {
        if buf.is_empty() {
            return Ok(None);
        }

        // peek at the protocol length, the full message may not be here yet
        let prot_len = buf[0] as usize;
        if prot_len != PSTR.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Handshake must have the string \"BitTorrent protocol\"",
            ));
        }

        if buf.remaining() < HANDSHAKE_LEN {
            return Ok(None);
        }

        let handshake = Handshake::deserialize(&buf[..HANDSHAKE_LEN])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        // only the handshake is consumed, anything after it belongs to the
        // next codec
        buf.advance(HANDSHAKE_LEN);

        Ok(Some(handshake))
    }
}

/// pstrlen = 19
/// pstr = "BitTorrent protocol"
/// This is the very first message exchanged. If the peer's protocol string
/// (`BitTorrent protocol`) or the info hash differs from ours, the connection
/// is severed. The reserved field is 8 zero bytes, we do not support any
/// extension.
#[derive(Clone, Debug, PartialEq, Eq, Writable, Readable)]
pub struct Handshake {
    pub pstr_len: u8,
    pub pstr: [u8; 19],
    pub reserved: [u8; 8],
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: impl Into<[u8; 20]>, peer_id: impl Into<[u8; 20]>) -> Self {
        Self {
            pstr_len: 19,
            pstr: PSTR,
            reserved: [0u8; 8],
            info_hash: InfoHash(info_hash.into()),
            peer_id: PeerId(peer_id.into()),
        }
    }

    pub fn serialize(&self) -> Result<[u8; HANDSHAKE_LEN], Error> {
        let mut buf = [0u8; HANDSHAKE_LEN];
        let temp = self.write_to_vec_with_ctx(BigEndian {})?;

        buf.copy_from_slice(&temp[..]);

        Ok(buf)
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self, Error> {
        Ok(Self::read_from_buffer_with_ctx(BigEndian {}, buf)?)
    }

    /// Check the handshake `target` received from a peer against ours.
    pub fn validate(&self, target: &Self) -> bool {
        if self.info_hash != target.info_hash {
            warn!("! info_hash from receiving handshake does not match ours");
            return false;
        }
        if target.pstr_len != 19 {
            warn!("! handshake with wrong pstr_len, dropping connection");
            return false;
        }
        if target.pstr != PSTR {
            warn!("! handshake with wrong pstr, dropping connection");
            return false;
        }
        true
    }
}
