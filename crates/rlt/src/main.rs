use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use rillet::{
    config::Config,
    error::Error,
    metainfo::MetaInfo,
    torrent::{DownloadEvent, Torrent},
};

mod args;
use args::Args;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .without_time()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("setting default subscriber failed");
    }

    let mut config = Config::load().await?;

    // flags win over the config file
    if let Some(max_peers) = args.max_peers {
        config.max_peers = max_peers;
    }
    if let Some(pipelining) = args.pipelining {
        config.pipelining = pipelining;
    }

    let bytes = tokio::fs::read(&args.torrent).await?;
    let meta = MetaInfo::from_bytes(&bytes)?;

    let output = args
        .output
        .unwrap_or_else(|| config.output_path(&meta.info.name));

    info!("downloading {} into {output:?}", meta.info.name);

    let (_handle, mut events) = Torrent::new(config).start(bytes, output);

    while let Some(event) = events.recv().await {
        match event {
            DownloadEvent::Progress(p) => {
                info!(
                    "{:.1}% {}/{} pieces, {} bytes left, {} KiB/s",
                    p.percent,
                    p.pieces_done,
                    p.pieces_total,
                    p.bytes_left,
                    p.download_rate / 1024
                );
            }
            DownloadEvent::Done => {
                info!("download complete");
            }
            DownloadEvent::Error(e) => {
                error!("{e}");
                return Err(e);
            }
        }
    }

    Ok(())
}
