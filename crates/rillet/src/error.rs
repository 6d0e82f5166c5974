use std::io;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::{disk::DiskMsg, torrent::TorrentMsg};

impl From<bendy::decoding::Error> for Error {
    fn from(value: bendy::decoding::Error) -> Self {
        Self::BencodeError(value.to_string())
    }
}

impl From<bendy::encoding::Error> for Error {
    fn from(value: bendy::encoding::Error) -> Self {
        Self::BencodeError(value.to_string())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to decode or encode the bencode buffer: {0}")]
    BencodeError(String),

    #[error("The bencode value is not a `{0}`")]
    BencodeShape(&'static str),

    #[error("The bencode dictionary does not have the key `{0}`")]
    BencodeMissingKey(String),

    #[error("The torrent metainfo is not valid: {0}")]
    MetaInfoInvalid(&'static str),

    #[error("IO error: {0}")]
    IO(#[from] io::Error),

    #[error("The announce url of the tracker is not valid: `{0}`")]
    TrackerUrl(String),

    #[error("Could not reach the tracker: {0}")]
    TrackerRequest(#[from] reqwest::Error),

    #[error("The response received from the tracker is not valid")]
    TrackerResponse,

    #[error("The tracker refused the announce: {0}")]
    TrackerFailure(String),

    #[error("The peer list returned by the announce request is not valid")]
    TrackerCompactPeerList,

    #[error("No peers in the torrent")]
    NoPeers,

    #[error("Error when serializing/deserializing")]
    SpeedyError(#[from] speedy::Error),

    #[error("The handshake received is not valid")]
    HandshakeInvalid,

    #[error("The peer didn't send a handshake as the first message")]
    NoHandshake,

    #[error("The peer took to long to respond")]
    Timeout,

    #[error("The peer closed the socket")]
    PeerClosedSocket,

    #[error("The peer sent a message of {0} bytes, larger than allowed")]
    MessageTooLarge(usize),

    #[error("The message received from the peer is malformed")]
    MessageResponse,

    #[error("The disk task stopped before the download finished")]
    DiskStopped,

    #[error("The piece downloaded does not have a valid hash")]
    PieceInvalid,

    #[error("Invalid interval: `from` ({from}) is greater than `to` ({to})")]
    InvalidInterval { from: usize, to: usize },

    #[error("The selection ends at piece {to} but the torrent has {total} pieces")]
    SelectionOutOfRange { to: usize, total: usize },

    #[error(
        "Tried to load $HOME but could not find it. Please make sure you have \
         a $HOME env and that this program has the permission to create dirs."
    )]
    HomeInvalid,

    #[error(
        "Error while trying to read the configuration file, please make sure \
         it has the correct format: {0}"
    )]
    ConfigDeserializeError(#[from] toml::de::Error),

    #[error("Could not send message to Disk")]
    SendErrorDisk(#[from] mpsc::error::SendError<DiskMsg>),

    #[error("Could not send message to Torrent")]
    SendErrorTorrent(#[from] mpsc::error::SendError<TorrentMsg>),

    #[error("Could not receive message from oneshot")]
    ReceiveErrorOneshot(#[from] oneshot::error::RecvError),
}
