//! Disk is responsible for the file I/O of a download.
//!
//! It is an actor: peers and the torrent talk to it with [`DiskMsg`]. Since it
//! owns the [`PieceManager`] too, every piece selection and reservation goes
//! through its queue, one at a time.
use std::{io::SeekFrom, path::Path, sync::Arc, time::Duration};

use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::{mpsc, oneshot},
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    bitfield::{Bitfield, RltBitfield},
    error::Error,
    metainfo::MetaInfo,
    piece::PieceManager,
    selection::Selection,
    tcp_wire::{Block, BLOCK_LEN},
    torrent::TorrentMsg,
};

/// How often reservations are checked for expiry.
const EXPIRY_TICK: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum DiskMsg {
    /// A peer sent a Have.
    MarkSeen(usize),
    /// A peer sent its Bitfield.
    PeerBitfield(Bitfield),
    /// Reserve the next piece to download from a peer that has `pieces`.
    RequestPiece {
        pieces: Option<Bitfield>,
        recipient: oneshot::Sender<Option<usize>>,
    },
    /// Write a block received from a peer, and validate the piece once all
    /// of its blocks are written.
    WriteBlock(Block),
    /// A peer went away with these pieces reserved.
    ReleasePieces(Vec<usize>),
    Select {
        selection: Selection,
        recipient: oneshot::Sender<Result<(), Error>>,
    },
    Deselect(Selection),
    Quit,
}

/// Create the output file, or truncate it, with the full content length.
pub async fn open_file(path: impl AsRef<Path>, len: u64) -> Result<File, Error> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await?;

    file.set_len(len).await?;

    Ok(file)
}

#[derive(Debug)]
pub struct Disk {
    pub tx: mpsc::Sender<DiskMsg>,
    rx: mpsc::Receiver<DiskMsg>,
    torrent_tx: mpsc::Sender<TorrentMsg>,
    file: File,
    meta: Arc<MetaInfo>,
    pieces: PieceManager,

    /// Blocks written so far, one bitfield per piece.
    blocks: Vec<Bitfield>,

    request_timeout: Duration,
}

impl Disk {
    pub fn new(
        file: File,
        meta: Arc<MetaInfo>,
        torrent_tx: mpsc::Sender<TorrentMsg>,
        request_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<DiskMsg>(300);

        let total = meta.info.pieces();
        let blocks = (0..total)
            .map(|i| Bitfield::from_piece(meta.info.blocks_in_piece(i)))
            .collect();

        Self {
            tx,
            rx,
            torrent_tx,
            file,
            pieces: PieceManager::new(total),
            blocks,
            meta,
            request_timeout,
        }
    }

    #[tracing::instrument(skip_all, name = "disk::run")]
    pub async fn run(&mut self) -> Result<(), Error> {
        debug!("disk started event loop");

        let mut expiry_interval = interval(EXPIRY_TICK);
        expiry_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = self.rx.recv() => {
                    let Some(msg) = msg else { break };

                    match msg {
                        DiskMsg::MarkSeen(index) => {
                            self.pieces.mark_seen(index);
                        }
                        DiskMsg::PeerBitfield(bitfield) => {
                            self.pieces.mark_seen_bitfield(&bitfield);
                        }
                        DiskMsg::RequestPiece { pieces, recipient } => {
                            let piece = self.pieces.select_next_from(pieces.as_ref());
                            debug!("RequestPiece {piece:?}");
                            let _ = recipient.send(piece);
                        }
                        DiskMsg::WriteBlock(block) => {
                            self.write_block(block).await?;
                        }
                        DiskMsg::ReleasePieces(pieces) => {
                            debug!("ReleasePieces {pieces:?}");
                            self.pieces.release(&pieces);
                        }
                        DiskMsg::Select { selection, recipient } => {
                            debug!("Select {selection:?}");
                            let _ = recipient.send(self.pieces.select(selection));
                        }
                        DiskMsg::Deselect(selection) => {
                            debug!("Deselect {selection:?}");
                            self.pieces.deselect(&selection);
                        }
                        DiskMsg::Quit => {
                            debug!("Quit");
                            self.file.flush().await?;
                            return Ok(());
                        }
                    }
                }
                _ = expiry_interval.tick() => {
                    let expired = self.pieces.expire(self.request_timeout);
                    if !expired.is_empty() {
                        warn!("reservations expired for pieces {expired:?}");
                    }
                }
            }
        }

        self.file.flush().await?;
        Ok(())
    }

    /// Write a block at its place in the file.
    ///
    /// Blocks that don't match a request we would have made are dropped, as
    /// are blocks of pieces already verified.
    #[tracing::instrument(skip_all, fields(index = block.index, begin = block.begin))]
    pub async fn write_block(&mut self, block: Block) -> Result<(), Error> {
        let Block { index, begin, block } = block;

        if index >= self.pieces.total() || self.pieces.is_verified(index) {
            debug!("dropping block of piece {index}");
            return Ok(());
        }

        let piece_size = self.meta.info.piece_size(index);
        let block_index = (begin / BLOCK_LEN) as usize;
        let expected_len = piece_size
            .saturating_sub(begin as usize)
            .min(BLOCK_LEN as usize);

        if begin % BLOCK_LEN != 0
            || block_index >= self.blocks[index].len()
            || block.len() != expected_len
        {
            warn!("dropping invalid block of piece {index}, begin {begin}, len {}", block.len());
            return Ok(());
        }

        let offset = self.meta.info.piece_offset(index) + begin as u64;
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(&block).await?;

        self.blocks[index].set(block_index, true);

        if !self.blocks[index].all() {
            return Ok(());
        }

        match self.validate_piece(index).await {
            Ok(()) => {
                if self.pieces.mark_verified(index) {
                    info!("piece {index} verified");
                    self.torrent_tx.send(TorrentMsg::PieceVerified(index)).await?;
                }
            }
            Err(Error::PieceInvalid) => {
                warn!("piece {index} is corrupted, requeueing it");
                self.pieces.reset(index);
                self.blocks[index].fill(false);
            }
            Err(e) => return Err(e),
        }

        Ok(())
    }

    /// Read a piece back from the file and compare its hash with the one in
    /// the metainfo.
    pub async fn validate_piece(&mut self, index: usize) -> Result<(), Error> {
        let hash_from_info = self.meta.info.piece_hash(index).ok_or(Error::PieceInvalid)?;

        let mut buf = vec![0u8; self.meta.info.piece_size(index)];
        self.file.seek(SeekFrom::Start(self.meta.info.piece_offset(index))).await?;
        self.file.read_exact(&mut buf).await?;

        let mut hash = sha1_smol::Sha1::new();
        hash.update(&buf);

        if hash.digest().bytes() != hash_from_info {
            return Err(Error::PieceInvalid);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::metainfo::Info;

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rillet-disk-{}-{name}", std::process::id()))
    }

    /// 2 pieces: one of 2 blocks, and a shorter last piece.
    fn meta(content: &[u8]) -> MetaInfo {
        let piece_length = 2 * BLOCK_LEN as usize;
        let pieces = content
            .chunks(piece_length)
            .flat_map(|piece| sha1_smol::Sha1::from(piece).digest().bytes())
            .collect();

        MetaInfo {
            announce: "http://localhost/announce".into(),
            info: Info {
                file_length: Some(content.len()),
                name: "content".into(),
                piece_length,
                pieces,
                ..Default::default()
            },
        }
    }

    fn block(content: &[u8], index: usize, begin: u32, len: usize) -> Block {
        let start = index * 2 * BLOCK_LEN as usize + begin as usize;
        Block { index, begin, block: content[start..start + len].to_vec() }
    }

    async fn disk(name: &str, content: &[u8]) -> (Disk, mpsc::Receiver<TorrentMsg>, PathBuf) {
        let meta = Arc::new(meta(content));
        let path = tmp_path(name);
        let file = open_file(&path, content.len() as u64).await.unwrap();
        let (torrent_tx, torrent_rx) = mpsc::channel(10);

        (Disk::new(file, meta, torrent_tx, Duration::from_secs(30)), torrent_rx, path)
    }

    #[tokio::test]
    async fn write_and_verify() {
        let content: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let (mut disk, mut torrent_rx, path) = disk("verify", &content).await;
        let b = BLOCK_LEN as usize;

        disk.write_block(block(&content, 0, BLOCK_LEN, b)).await.unwrap();
        assert!(torrent_rx.try_recv().is_err());

        disk.write_block(block(&content, 0, 0, b)).await.unwrap();
        assert!(matches!(torrent_rx.try_recv(), Ok(TorrentMsg::PieceVerified(0))));

        disk.write_block(block(&content, 1, 0, 40_000 - 2 * b)).await.unwrap();
        assert!(matches!(torrent_rx.try_recv(), Ok(TorrentMsg::PieceVerified(1))));

        // a late duplicate is ignored
        disk.write_block(block(&content, 1, 0, 40_000 - 2 * b)).await.unwrap();
        assert!(torrent_rx.try_recv().is_err());

        disk.file.flush().await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), content);
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn corrupted_piece_is_requeued() {
        let content: Vec<u8> = (0..40_000u32).map(|i| (i % 7) as u8).collect();
        let (mut disk, mut torrent_rx, path) = disk("corrupt", &content).await;

        assert_eq!(disk.pieces.select_next(), Some(0));

        let mut bad = block(&content, 0, 0, BLOCK_LEN as usize);
        bad.block[0] ^= 0xFF;
        disk.write_block(bad).await.unwrap();
        disk.write_block(block(&content, 0, BLOCK_LEN, BLOCK_LEN as usize)).await.unwrap();

        assert!(torrent_rx.try_recv().is_err());
        assert!(!disk.pieces.is_verified(0));
        assert!(disk.blocks[0].not_any());
        // back in the pool
        assert_eq!(disk.pieces.select_next(), Some(0));

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn invalid_blocks_are_dropped() {
        let content = vec![1u8; 40_000];
        let (mut disk, _torrent_rx, path) = disk("invalid", &content).await;

        // not aligned
        disk.write_block(Block { index: 0, begin: 10, block: vec![1; 10] }).await.unwrap();
        // wrong length
        disk.write_block(Block { index: 1, begin: 0, block: vec![1; 10] }).await.unwrap();
        // out of range
        disk.write_block(Block { index: 9, begin: 0, block: vec![1; 10] }).await.unwrap();

        assert!(disk.blocks.iter().all(|b| b.not_any()));
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn run_answers_requests_until_quit() {
        let content = vec![3u8; 40_000];
        let (mut disk, _torrent_rx, path) = disk("run", &content).await;
        let tx = disk.tx.clone();

        let handle = tokio::spawn(async move { disk.run().await });

        tx.send(DiskMsg::MarkSeen(1)).await.unwrap();

        let (otx, orx) = oneshot::channel();
        tx.send(DiskMsg::RequestPiece { pieces: None, recipient: otx }).await.unwrap();
        assert_eq!(orx.await.unwrap(), Some(1));

        tx.send(DiskMsg::ReleasePieces(vec![1])).await.unwrap();

        let (otx, orx) = oneshot::channel();
        let selection = Selection::new(0, 0).with_priority(1);
        tx.send(DiskMsg::Select { selection, recipient: otx }).await.unwrap();
        assert!(orx.await.unwrap().is_ok());

        let (otx, orx) = oneshot::channel();
        tx.send(DiskMsg::RequestPiece { pieces: None, recipient: otx }).await.unwrap();
        assert_eq!(orx.await.unwrap(), Some(0));

        tx.send(DiskMsg::Quit).await.unwrap();
        handle.await.unwrap().unwrap();

        let _ = tokio::fs::remove_file(&path).await;
    }
}
