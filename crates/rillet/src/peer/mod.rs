//! A remote peer in the network that we download from.
pub mod session;
mod types;

// re-exports
pub use types::*;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    select,
    sync::{mpsc, oneshot},
    time::{interval, interval_at, timeout, Instant},
};
use tokio_util::codec::{Framed, FramedParts};
use tracing::{debug, info, warn};

use crate::{
    bitfield::{Bitfield, RltBitfield},
    config::Config,
    disk::DiskMsg,
    error::Error,
    metainfo::MetaInfo,
    peer::session::{ConnectionState, Session},
    tcp_wire::{BlockInfo, Core, CoreCodec, Handshake, HandshakeCodec},
};

pub type PeerSink = SplitSink<Framed<TcpStream, CoreCodec>, Core>;

const KEEP_ALIVE: Duration = Duration::from_secs(120);

/// A download session with one remote peer.
#[derive(Debug)]
pub struct Peer {
    pub addr: SocketAddr,
    pub session: Session,

    /// Pieces the remote announced with Have and Bitfield.
    pub pieces: Bitfield,

    meta: Arc<MetaInfo>,
    local_peer_id: PeerId,
    disk_tx: mpsc::Sender<DiskMsg>,
    connect_timeout: Duration,
}

impl Peer {
    pub fn new(
        addr: SocketAddr,
        meta: Arc<MetaInfo>,
        local_peer_id: PeerId,
        disk_tx: mpsc::Sender<DiskMsg>,
        config: &Config,
    ) -> Self {
        Self {
            addr,
            session: Session::new(config.pipelining),
            pieces: Bitfield::from_piece(meta.info.pieces()),
            meta,
            local_peer_id,
            disk_tx,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }

    /// Connect, handshake and download until the connection ends.
    ///
    /// Whatever the outcome, pieces reserved for this session and not fully
    /// received go back to the pool.
    #[tracing::instrument(skip_all, name = "peer::run", fields(addr = %self.addr))]
    pub async fn run(&mut self) -> Result<(), Error> {
        let r = self.download().await;
        self.release().await;
        r
    }

    async fn release(&mut self) {
        if self.session.reserved.is_empty() {
            return;
        }
        let reserved = std::mem::take(&mut self.session.reserved);
        debug!("releasing pieces {reserved:?}");
        let _ = self.disk_tx.send(DiskMsg::ReleasePieces(reserved)).await;
    }

    /// Open the connection and exchange handshakes. The returned transport
    /// speaks the core messages, with any bytes received after the handshake
    /// kept in its buffer.
    pub async fn handshake(&mut self) -> Result<Framed<TcpStream, CoreCodec>, Error> {
        self.session.connection = ConnectionState::Connecting;

        let socket = timeout(self.connect_timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| Error::Timeout)??;

        self.session.connection = ConnectionState::Handshaking;

        let mut socket = Framed::new(socket, HandshakeCodec);
        let our_handshake = Handshake::new(self.meta.info.info_hash, self.local_peer_id);

        debug!("sending handshake");
        socket.send(our_handshake.clone()).await?;

        let their_handshake = match timeout(self.connect_timeout, socket.next()).await {
            Ok(Some(handshake)) => handshake?,
            Ok(None) => return Err(Error::NoHandshake),
            Err(_) => return Err(Error::Timeout),
        };

        if !our_handshake.validate(&their_handshake) {
            return Err(Error::HandshakeInvalid);
        }

        info!("connected to {:?}", their_handshake.peer_id);

        let old_parts = socket.into_parts();
        let mut new_parts = FramedParts::new(old_parts.io, CoreCodec);
        new_parts.read_buf = old_parts.read_buf;
        new_parts.write_buf = old_parts.write_buf;

        self.session.connection = ConnectionState::Ready;

        Ok(Framed::from_parts(new_parts))
    }

    async fn download(&mut self) -> Result<(), Error> {
        let socket = self.handshake().await?;
        let (mut sink, mut stream) = socket.split();

        sink.send(Core::Interested).await?;

        // retry when the disk had no piece for us
        let mut request_interval = interval(Duration::from_millis(500));

        let mut keep_alive_interval = interval_at(Instant::now() + KEEP_ALIVE, KEEP_ALIVE);

        loop {
            select! {
                msg = stream.next() => {
                    let Some(msg) = msg else {
                        return Err(Error::PeerClosedSocket);
                    };
                    self.handle_msg(msg?, &mut sink).await?;
                }
                _ = request_interval.tick(), if self.session.can_request() => {
                    self.pump(&mut sink).await?;
                }
                _ = keep_alive_interval.tick() => {
                    sink.send(Core::KeepAlive).await?;
                }
            }
        }
    }

    async fn handle_msg(&mut self, msg: Core, sink: &mut PeerSink) -> Result<(), Error> {
        match msg {
            Core::KeepAlive => {
                debug!("keepalive");
            }
            Core::Choke => {
                debug!("choke");
                self.session.peer_choking = true;
                self.session.requeue_inflight();
            }
            Core::Unchoke => {
                debug!("unchoke");
                self.session.peer_choking = false;
                self.pump(sink).await?;
            }
            Core::Have(index) => {
                debug!("have {index}");
                if index >= self.pieces.len() {
                    warn!("have with out of range piece {index}");
                    return Ok(());
                }
                self.pieces.set(index, true);
                self.disk_tx.send(DiskMsg::MarkSeen(index)).await?;
                self.pump(sink).await?;
            }
            Core::Bitfield(bitfield) => {
                debug!("bitfield with {} pieces", bitfield.count_ones());
                let bitfield = Bitfield::from_payload(bitfield.into_vec(), self.meta.info.pieces());
                self.pieces = bitfield.clone();
                self.disk_tx.send(DiskMsg::PeerBitfield(bitfield)).await?;
                self.pump(sink).await?;
            }
            Core::Piece(block) => {
                let block_info = BlockInfo::try_from(&block)?;
                debug!("piece {block_info:?}");

                if self.session.block_received(&block_info) {
                    self.disk_tx.send(DiskMsg::WriteBlock(block)).await?;
                } else {
                    debug!("dropping unrequested block {block_info:?}");
                }
                self.pump(sink).await?;
            }
            // we don't upload
            Core::Interested | Core::NotInterested | Core::Request(_) | Core::Cancel(_) => {
                debug!("ignoring {msg:?}");
            }
        }
        Ok(())
    }

    /// Fill the pipeline with block requests, reserving new pieces from the
    /// disk when the pending blocks run out.
    async fn pump(&mut self, sink: &mut PeerSink) -> Result<(), Error> {
        while self.session.can_request() {
            let Some(block_info) = self.session.pending.pop_front() else {
                let Some(piece) = self.request_piece().await? else {
                    break;
                };
                debug!("reserved piece {piece}");
                self.session.reserved.push(piece);
                self.session
                    .pending
                    .extend(self.meta.info.get_block_infos_of_piece(piece)?);
                continue;
            };

            debug!("requesting {block_info:?}");
            self.session.inflight.push(block_info.clone());
            sink.send(Core::Request(block_info)).await?;
        }
        Ok(())
    }

    async fn request_piece(&self) -> Result<Option<usize>, Error> {
        let (otx, orx) = oneshot::channel();
        let pieces = self.pieces.any().then(|| self.pieces.clone());

        self.disk_tx
            .send(DiskMsg::RequestPiece { pieces, recipient: otx })
            .await?;

        Ok(orx.await?)
    }
}
