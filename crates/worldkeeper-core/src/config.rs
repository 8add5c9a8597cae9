//! Storage configuration.
//!
//! Parsed from TOML; every key is optional:
//!
//! ```toml
//! policy = "indexeddb"          # "no-storage" | "indexeddb" | "directory"
//! database_path = "worldkeeper.sqlite3"
//! directory = "/srv/minetest-saves"   # required for policy = "directory"
//! root = "/minetest"
//! sync_interval_secs = 10
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum::{Display, EnumString};
use thiserror::Error;

use crate::layout::{DEFAULT_ROOT, SyncLayout};

/// Default pause between periodic passes.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 10;

/// Default database file name.
pub const DEFAULT_DATABASE_PATH: &str = "worldkeeper.sqlite3";

/// Which persistence backend to use.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
pub enum StoragePolicy {
    /// Persistence disabled; every engine operation is a no-op.
    #[serde(rename = "no-storage")]
    #[strum(serialize = "no-storage")]
    NoStorage,
    /// Embedded database backend.
    #[default]
    #[serde(rename = "indexeddb")]
    #[strum(serialize = "indexeddb")]
    Database,
    /// Granted host directory backend.
    #[serde(rename = "directory")]
    #[strum(serialize = "directory")]
    Directory,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("policy \"directory\" requires a `directory` setting")]
    MissingDirectory,

    #[error("sync_interval_secs must be greater than zero")]
    ZeroInterval,

    #[error("root must be an absolute path, got {0:?}")]
    RelativeRoot(String),
}

fn default_database_path() -> PathBuf {
    PathBuf::from(DEFAULT_DATABASE_PATH)
}

fn default_root() -> String {
    DEFAULT_ROOT.to_string()
}

fn default_interval() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

/// Storage configuration for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default)]
    pub policy: StoragePolicy,

    /// SQLite database file for the `indexeddb` policy.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Granted host directory for the `directory` policy.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Game root inside the virtual filesystem.
    #[serde(default = "default_root")]
    pub root: String,

    #[serde(default = "default_interval")]
    pub sync_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            policy: StoragePolicy::default(),
            database_path: default_database_path(),
            directory: None,
            root: default_root(),
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
        }
    }
}

impl StorageConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: StorageConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.policy == StoragePolicy::Directory && self.directory.is_none() {
            return Err(ConfigError::MissingDirectory);
        }
        if self.sync_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if !self.root.starts_with('/') {
            return Err(ConfigError::RelativeRoot(self.root.clone()));
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn layout(&self) -> SyncLayout {
        SyncLayout::new(self.root.clone())
    }
}
