use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Default)]
#[clap(name = "rlt")]
#[command(author, version, about = "Download the content of a .torrent file", long_about = None)]
pub struct Args {
    /// Path of the .torrent file.
    pub torrent: PathBuf,

    /// Where to write the content. Defaults to the torrent name, inside the
    /// configured download dir.
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Maximum number of peers to connect to.
    #[clap(long)]
    pub max_peers: Option<usize>,

    /// Maximum number of block requests in flight per peer.
    #[clap(long)]
    pub pipelining: Option<usize>,

    /// Log every wire message.
    #[clap(short, long)]
    pub verbose: bool,
}
