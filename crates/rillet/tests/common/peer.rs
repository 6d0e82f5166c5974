//! Mock of a seeding peer.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use futures::{SinkExt, StreamExt};
use rillet::{
    bitfield::{Bitfield, RltBitfield},
    error::Error,
    metainfo::InfoHash,
    tcp_wire::{Block, Core, CoreCodec, Handshake, HandshakeCodec},
};
use tokio::{
    net::{TcpListener, TcpStream},
    spawn,
    sync::{Notify, Semaphore},
};
use tokio_util::codec::{Framed, FramedParts};

#[derive(Clone)]
pub struct Seeder {
    pub info_hash: InfoHash,
    pub content: Arc<Vec<u8>>,
    pub piece_length: usize,

    /// Flip the bytes of the first block served, once.
    pub corrupt_once: Arc<AtomicBool>,

    /// Pieces of every request received, in order.
    pub requests: Arc<Mutex<Vec<u32>>>,

    /// Signaled after each handshake.
    pub connected: Arc<Notify>,

    /// When set, the bitfield and unchoke wait for a permit.
    pub gate: Option<Arc<Semaphore>>,
}

impl Seeder {
    pub fn new(info_hash: InfoHash, content: Vec<u8>, piece_length: usize) -> Self {
        Self {
            info_hash,
            content: Arc::new(content),
            piece_length,
            corrupt_once: Arc::new(AtomicBool::new(false)),
            requests: Arc::new(Mutex::new(vec![])),
            connected: Arc::new(Notify::new()),
            gate: None,
        }
    }

    /// Stay choked until `gate` has a permit.
    pub fn hold(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn corrupt_once(self) -> Self {
        self.corrupt_once.store(true, Ordering::Release);
        self
    }

    /// Accept leechers in the background.
    pub async fn listen(self) -> Result<SocketAddr, Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let seeder = self.clone();
                spawn(async move { seeder.serve(socket).await });
            }
        });

        Ok(addr)
    }

    async fn serve(self, socket: TcpStream) -> Result<(), Error> {
        let mut socket = Framed::new(socket, HandshakeCodec);

        let Some(theirs) = socket.next().await else {
            return Err(Error::NoHandshake);
        };
        let ours = Handshake::new(self.info_hash, [b's'; 20]);
        if !ours.validate(&theirs?) {
            return Err(Error::HandshakeInvalid);
        }
        socket.send(ours).await?;

        let old_parts = socket.into_parts();
        let mut new_parts = FramedParts::new(old_parts.io, CoreCodec);
        new_parts.read_buf = old_parts.read_buf;
        new_parts.write_buf = old_parts.write_buf;
        let mut socket = Framed::from_parts(new_parts);

        self.connected.notify_one();

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }

        let pieces = self.content.len().div_ceil(self.piece_length);
        let mut bitfield = Bitfield::from_piece(pieces);
        bitfield.fill(true);

        socket.send(Core::Bitfield(bitfield)).await?;
        socket.send(Core::Unchoke).await?;

        while let Some(msg) = socket.next().await {
            let Core::Request(info) = msg? else {
                continue;
            };
            self.requests.lock().unwrap().push(info.index);

            let start = info.index as usize * self.piece_length + info.begin as usize;
            let mut block = self.content[start..start + info.len as usize].to_vec();

            if self.corrupt_once.swap(false, Ordering::AcqRel) {
                block.iter_mut().for_each(|b| *b = !*b);
            }

            socket
                .send(Core::Piece(Block { index: info.index as usize, begin: info.begin, block }))
                .await?;
        }

        Ok(())
    }
}
