//! A minimal BitTorrent V1 download engine.
//!
//! Rillet takes the bytes of a `.torrent` file, asks its HTTP tracker for
//! peers, and downloads the content from many peers at once into a single
//! output file, verifying every piece with its SHA-1 digest.
//!
//! The work is split between a few tasks that talk through channels:
//!
//! * the [torrent] coordinator, which parses the metainfo, announces to the
//!   tracker, spawns one [peer] task per address and forwards progress;
//! * the [disk] actor, which owns the output file and the [piece] manager, so
//!   piece reservation is never raced between peers;
//! * one [peer] task per connection, running the wire protocol of [tcp_wire].
//!
//! [selection] is a standalone interval set used by the piece manager to
//! prioritize ranges of pieces, for example a playback window.
//!
//! # Example
//!
//! ```no_run
//! use rillet::{config::Config, torrent::{DownloadEvent, Torrent}};
//!
//! # async fn run() -> Result<(), rillet::error::Error> {
//! let bytes = tokio::fs::read("debian.torrent").await?;
//! let torrent = Torrent::new(Config::load().await?);
//! let (_handle, mut events) = torrent.start(bytes, "debian.iso".into());
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         DownloadEvent::Progress(p) => println!("{:.1}%", p.percent),
//!         DownloadEvent::Done => break,
//!         DownloadEvent::Error(e) => return Err(e),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod bencode;
pub mod bitfield;
pub mod config;
pub mod counter;
pub mod disk;
pub mod error;
pub mod metainfo;
pub mod peer;
pub mod piece;
pub mod selection;
pub mod tcp_wire;
pub mod torrent;
pub mod tracker;
