//! Configuration for bloby.
//!
//! Resolution order: command-line flags → config file → defaults.
//!
//! Config file location:
//!   1. `--config PATH`
//!   2. $BLOBY_CONFIG
//!   3. $XDG_CONFIG_HOME/bloby/config.toml (or ~/.config/bloby/config.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::{timeouts, DEFAULT_PORT};
use crate::session::ReceiveOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobyConfig {
    /// Port the device listens on
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// How often blocked reads check for Ctrl-C
    pub cancel_poll_ms: u64,
    /// Directory received files are written under
    pub receive_dir: PathBuf,
    /// Replace existing files instead of skipping them
    pub overwrite: bool,
    /// Keep peer-supplied file names inside `receive_dir`
    pub confine: bool,
    /// JSONL journal of received transfers. Unset = no journal.
    pub journal: Option<PathBuf>,
}

impl Default for BlobyConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout_ms: timeouts::CONNECT_MS,
            cancel_poll_ms: timeouts::CANCEL_POLL_MS,
            receive_dir: PathBuf::from("."),
            overwrite: false,
            confine: true,
            journal: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {1}", .0.display())]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {}: {1}", .0.display())]
    ParseFailed(PathBuf, toml::de::Error),
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(".config")
        })
        .join("bloby")
}

impl BlobyConfig {
    /// Default config file path
    pub fn file_path() -> PathBuf {
        std::env::var("BLOBY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Load from `explicit` if given, else the default location. A missing default
    /// file yields defaults; a missing explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(p) => Self::load_from(p),
            None => {
                let path = Self::file_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn cancel_poll(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_ms)
    }

    pub fn receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            connect_timeout: self.connect_timeout(),
            cancel_poll: self.cancel_poll(),
        }
    }
}
