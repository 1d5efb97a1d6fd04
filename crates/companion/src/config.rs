//! Companion configuration
//!
//! ## Storage Location
//!
//! Everything lives in one per-user directory (`<cache dir>/wolite` by default):
//!
//! - **Linux**: `~/.cache/wolite/`
//! - **macOS**: `~/Library/Caches/wolite/`
//! - **Windows**: `%LOCALAPPDATA%\wolite\`
//!
//! `config.json` holds the listen port; certificates and token files sit beside it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use wolite_core::secure_fs;

pub const DEFAULT_PORT: u16 = 8443;

const APP_DIR: &str = "wolite";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No cache directory found")]
    NoConfigDir,

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted companion settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionConfig {
    pub port: u16,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

impl CompanionConfig {
    /// Default per-user directory for all companion state
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::cache_dir()
            .map(|d| d.join(APP_DIR))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Create `dir` with owner-only permissions
    pub fn ensure_dir(dir: &Path) -> Result<(), ConfigError> {
        secure_fs::ensure_private_dir(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })
    }

    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(CONFIG_FILE)
    }

    /// Load `config.json` from `dir`, creating it on first run
    ///
    /// An explicit `port_override` wins over the file and is written back.
    pub fn load_or_create(dir: &Path, port_override: Option<u16>) -> Result<Self, ConfigError> {
        let path = Self::path_in(dir);

        let mut config = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save(&path)?;
                config
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        if let Some(port) = port_override {
            if port != config.port {
                config.port = port;
                config.save(&path)?;
            }
        }

        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let data = serde_json::to_vec_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        secure_fs::write_private(path, &data).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
