use std::{io::ErrorKind, path::PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Engine settings, read from `config.toml` in the platform config dir.
///
/// Every field has a default, so a partial file (or no file at all) is a
/// valid configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Directory where the output file is placed when the caller does not
    /// give a full path. `None` means the current directory.
    pub download_dir: Option<PathBuf>,

    /// Maximum number of peers taken from the tracker response.
    pub max_peers: usize,

    /// Maximum number of in-flight block requests per peer.
    pub pipelining: usize,

    pub connect_timeout_secs: u64,

    /// A reserved piece that is not verified after this many seconds
    /// returns to the pool.
    pub request_timeout_secs: u64,

    /// Port announced to the tracker.
    pub local_peer_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: None,
            max_peers: 20,
            pipelining: 5,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            local_peer_port: 6881,
        }
    }
}

impl Config {
    /// Path of the configuration file.
    ///
    /// # Errors
    ///
    /// Fails when the user has no home folder.
    pub fn config_path() -> Result<PathBuf, Error> {
        let dotfile =
            ProjectDirs::from("", "", "Rillet").ok_or(Error::HomeInvalid)?;
        Ok(dotfile.config_dir().join("config.toml"))
    }

    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        Ok(toml::from_str::<Config>(s)?)
    }

    /// Load the configuration file and transform it into Self.
    /// A missing file yields the default configuration.
    pub async fn load() -> Result<Self, Error> {
        let path = Self::config_path()?;

        match tokio::fs::read_to_string(&path).await {
            Ok(s) => Self::from_toml_str(&s),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Where to write the content of a torrent named `name`.
    pub fn output_path(&self, name: &str) -> PathBuf {
        match &self.download_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }
}
