use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::detection::gate::DEFAULT_CAPACITY;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Service configuration loaded from an optional TOML file.
/// All fields have defaults; CLI flags override file values.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Address the HTTP service listens on.
    pub bind: SocketAddr,
    /// Maximum concurrent feature-detection jobs. Fixed for the process lifetime.
    pub max_concurrent_jobs: usize,
    /// Where downloaded audio is staged before decoding.
    pub scratch_dir: PathBuf,
    /// Downloader executable used for search-term requests.
    pub downloader: PathBuf,
    /// Timeout for direct URL downloads.
    pub download_timeout_secs: u64,
    /// Upper bound on a direct URL download body.
    pub max_download_bytes: u64,
    /// Let URL requests reach loopback, private and link-local hosts.
    pub allow_private_hosts: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5000)),
            max_concurrent_jobs: DEFAULT_CAPACITY,
            scratch_dir: PathBuf::from(".data"),
            downloader: PathBuf::from("yt-dlp"),
            download_timeout_secs: 60,
            max_download_bytes: 200 * 1024 * 1024,
            allow_private_hosts: false,
        }
    }
}

impl ServiceConfig {
    /// Load config from `path`, or defaults when no file is given.
    /// An explicitly given file that can't be read or parsed is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            log::debug!("No config file given, using defaults");
            return Ok(Self::default());
        };

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ServiceConfig =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        if self.max_download_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_download_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}
