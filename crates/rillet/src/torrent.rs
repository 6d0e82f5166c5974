//! Coordinator of a download.
//!
//! The torrent parses the metainfo, asks the tracker for peers, spawns the
//! [`Disk`] actor and one [`Peer`] task per address, and turns verified
//! pieces into [`DownloadEvent`]s for the caller.
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use tokio::{
    select,
    sync::{mpsc, oneshot},
    task::JoinSet,
    time::interval,
};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    counter::Counter,
    disk::{open_file, Disk, DiskMsg},
    error::Error,
    metainfo::MetaInfo,
    peer::{Peer, PeerId},
    selection::Selection,
    tracker::{Announce, Tracker},
};

#[derive(Debug)]
pub enum TorrentMsg {
    /// The disk wrote and hash checked a piece.
    PieceVerified(usize),
    /// Prioritize a range of pieces.
    Select {
        selection: Selection,
        recipient: oneshot::Sender<Result<(), Error>>,
    },
    Deselect(Selection),
    /// Stop the download without a terminal event.
    Quit,
}

/// Snapshot of the download, sent after every verified piece.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub pieces_done: usize,
    pub pieces_total: usize,
    pub bytes_total: u64,
    pub bytes_left: u64,
    pub percent: f64,
    /// Bytes per second.
    pub download_rate: u64,
}

impl Progress {
    pub fn new(pieces_done: usize, pieces_total: usize, bytes_total: u64, bytes_left: u64) -> Self {
        let percent = if pieces_total == 0 {
            100.0
        } else {
            100.0 * pieces_done as f64 / pieces_total as f64
        };

        Self { pieces_done, pieces_total, bytes_total, bytes_left, percent, download_rate: 0 }
    }

    pub fn is_complete(&self) -> bool {
        self.pieces_done == self.pieces_total
    }
}

/// What a download reports to its caller. `Done` and `Error` are terminal,
/// at most one of them is sent and the channel closes after it.
#[derive(Debug)]
pub enum DownloadEvent {
    Progress(Progress),
    Done,
    Error(Error),
}

/// Control a running download.
#[derive(Debug, Clone)]
pub struct TorrentHandle {
    tx: mpsc::Sender<TorrentMsg>,
}

impl TorrentHandle {
    /// Download the pieces of `selection` before any other.
    ///
    /// # Errors
    ///
    /// Fails if the interval is invalid, ends past the last piece, or the
    /// download already stopped.
    pub async fn select(&self, selection: Selection) -> Result<(), Error> {
        let (otx, orx) = oneshot::channel();
        self.tx.send(TorrentMsg::Select { selection, recipient: otx }).await?;
        orx.await?
    }

    pub async fn deselect(&self, selection: Selection) -> Result<(), Error> {
        self.tx.send(TorrentMsg::Deselect(selection)).await?;
        Ok(())
    }

    pub async fn quit(&self) -> Result<(), Error> {
        self.tx.send(TorrentMsg::Quit).await?;
        Ok(())
    }
}

/// This is the main entity responsible for the high-level management of
/// a torrent download.
#[derive(Debug)]
pub struct Torrent {
    pub config: Config,
    pub local_peer_id: PeerId,
    tx: mpsc::Sender<TorrentMsg>,
    rx: mpsc::Receiver<TorrentMsg>,
    events_tx: mpsc::Sender<DownloadEvent>,
    events_rx: mpsc::Receiver<DownloadEvent>,
    counter: Counter,
}

impl Torrent {
    pub fn new(config: Config) -> Self {
        let (tx, rx) = mpsc::channel::<TorrentMsg>(300);
        let (events_tx, events_rx) = mpsc::channel::<DownloadEvent>(100);

        Self {
            config,
            local_peer_id: PeerId::local(),
            tx,
            rx,
            events_tx,
            events_rx,
            counter: Counter::new(),
        }
    }

    /// Start downloading the content of the .torrent file `bytes` into
    /// `output`, in a new task.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn start(
        self,
        bytes: Vec<u8>,
        output: PathBuf,
    ) -> (TorrentHandle, mpsc::Receiver<DownloadEvent>) {
        let Self { config, local_peer_id, tx, rx, events_tx, events_rx, counter } = self;
        let handle = TorrentHandle { tx: tx.clone() };

        let mut download = Download { config, local_peer_id, tx, rx, events_tx, counter };

        tokio::spawn(async move {
            if let Err(e) = download.run(bytes, output).await {
                warn!("download failed: {e}");
                let _ = download.events_tx.send(DownloadEvent::Error(e)).await;
            }
        });

        (handle, events_rx)
    }
}

/// State of a started download, owned by its task.
struct Download {
    config: Config,
    local_peer_id: PeerId,
    tx: mpsc::Sender<TorrentMsg>,
    rx: mpsc::Receiver<TorrentMsg>,
    events_tx: mpsc::Sender<DownloadEvent>,
    counter: Counter,
}

impl Download {
    #[tracing::instrument(skip_all, name = "torrent::run")]
    async fn run(&mut self, bytes: Vec<u8>, output: PathBuf) -> Result<(), Error> {
        let meta = Arc::new(MetaInfo::from_bytes(&bytes)?);
        let info = &meta.info;

        let pieces_total = info.pieces();
        let bytes_total = info.get_torrent_size() as u64;

        info!(
            "{} {:?}: {pieces_total} pieces, {bytes_total} bytes",
            info.name, info.info_hash
        );

        let file = open_file(&output, bytes_total).await?;

        if pieces_total == 0 {
            let _ = self.events_tx.send(DownloadEvent::Done).await;
            return Ok(());
        }

        let mut peers = self.announce(&meta, bytes_total).await?;
        peers.truncate(self.config.max_peers);

        let request_timeout = Duration::from_secs(self.config.request_timeout_secs);
        let mut disk = Disk::new(file, meta.clone(), self.tx.clone(), request_timeout);
        let disk_tx = disk.tx.clone();
        let mut disk_handle = tokio::spawn(async move { disk.run().await });

        let mut peer_tasks = JoinSet::new();

        for addr in peers {
            let mut peer =
                Peer::new(addr, meta.clone(), self.local_peer_id, disk_tx.clone(), &self.config);

            peer_tasks.spawn(async move {
                let r = peer.run().await;
                (addr, r)
            });
        }

        let mut pieces_done = 0;
        let mut bytes_left = bytes_total;

        let mut rate_interval = interval(Duration::from_secs(1));

        loop {
            select! {
                Some(msg) = self.rx.recv() => {
                    match msg {
                        TorrentMsg::PieceVerified(index) => {
                            let size = info.piece_size(index) as u64;

                            pieces_done += 1;
                            bytes_left = bytes_left.saturating_sub(size);
                            self.counter.record_download(size);

                            let mut progress =
                                Progress::new(pieces_done, pieces_total, bytes_total, bytes_left);
                            progress.download_rate = self.counter.download_rate;

                            debug!("{progress:?}");
                            let _ = self.events_tx.send(DownloadEvent::Progress(progress)).await;

                            if progress.is_complete() {
                                info!("download of {} complete", info.name);

                                peer_tasks.abort_all();
                                disk_tx.send(DiskMsg::Quit).await?;
                                disk_handle.await.map_err(|_| Error::DiskStopped)??;

                                let _ = self.events_tx.send(DownloadEvent::Done).await;
                                return Ok(());
                            }
                        }
                        TorrentMsg::Select { selection, recipient } => {
                            disk_tx.send(DiskMsg::Select { selection, recipient }).await?;
                        }
                        TorrentMsg::Deselect(selection) => {
                            disk_tx.send(DiskMsg::Deselect(selection)).await?;
                        }
                        TorrentMsg::Quit => {
                            info!("quitting");

                            peer_tasks.abort_all();
                            let _ = disk_tx.send(DiskMsg::Quit).await;
                            let _ = disk_handle.await;
                            return Ok(());
                        }
                    }
                }
                Some(joined) = peer_tasks.join_next(), if !peer_tasks.is_empty() => {
                    match joined {
                        Ok((addr, Ok(()))) => debug!("peer {addr} finished"),
                        Ok((addr, Err(e))) => warn!("peer {addr} disconnected: {e}"),
                        Err(e) => warn!("peer task failed: {e}"),
                    }

                    if peer_tasks.is_empty() {
                        warn!("every peer disconnected before the download finished");
                        let _ = disk_tx.send(DiskMsg::Quit).await;
                        let _ = disk_handle.await;
                        return Err(Error::NoPeers);
                    }
                }
                r = &mut disk_handle => {
                    peer_tasks.abort_all();
                    return match r {
                        Ok(Err(e)) => Err(e),
                        _ => Err(Error::DiskStopped),
                    };
                }
                _ = rate_interval.tick() => {
                    self.counter.update_rates();
                }
            }
        }
    }

    async fn announce(&self, meta: &MetaInfo, left: u64) -> Result<Vec<SocketAddr>, Error> {
        let tracker = Tracker::new(
            &meta.announce,
            self.local_peer_id,
            self.config.local_peer_port,
            Duration::from_secs(self.config.connect_timeout_secs),
        )?;

        let peers = tracker
            .announce(&meta.info.info_hash, Announce { left, ..Default::default() })
            .await?;

        if peers.is_empty() {
            return Err(Error::NoPeers);
        }

        Ok(peers)
    }
}
