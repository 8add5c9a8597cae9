//! Persistence backends.
//!
//! Two interchangeable implementations of one capability interface:
//!
//! - [`SqliteBackend`] - embedded transactional database (content store +
//!   directory index)
//! - [`DirectoryBackend`] - a user-granted host directory, hierarchical
//!
//! Only one backend is active per session. The engine's walk-and-diff
//! algorithm runs unchanged against either through [`StorageBackend`].

mod directory;
mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use strum::{Display, EnumString};
use thiserror::Error;

pub use crate::db::FileRecord;
pub use directory::DirectoryBackend;
pub use sqlite::SqliteBackend;

use crate::config::{StorageConfig, StoragePolicy};
use crate::stats::AreaStats;
use crate::vfs::FileStat;

/// Which kind of backend is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BackendKind {
    Database,
    Directory,
}

/// Backend error type.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend could not be opened or its root is gone.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Access was denied or revoked.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A path could not be mapped into the backend.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(io::Error),

    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

impl From<io::Error> for BackendError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::PermissionDenied => BackendError::PermissionDenied(e.to_string()),
            _ => BackendError::Io(e),
        }
    }
}

impl From<tokio::task::JoinError> for BackendError {
    fn from(e: tokio::task::JoinError) -> Self {
        BackendError::Task(e.to_string())
    }
}

impl BackendError {
    /// Permission or availability failures. These end the current pass
    /// softly instead of being retried per path.
    pub fn is_access_failure(&self) -> bool {
        matches!(
            self,
            BackendError::PermissionDenied(_) | BackendError::Unavailable(_)
        )
    }
}

/// Backend result type.
pub type BackendResult<T> = Result<T, BackendError>;

/// File content normalized to one canonical byte buffer.
///
/// Whatever shape the producer hands over (owned buffer, borrowed slice,
/// text), it is stored as the same bytes. Text is UTF-8 encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileContent(Vec<u8>);

impl FileContent {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl From<&[u8]> for FileContent {
    fn from(v: &[u8]) -> Self {
        Self(v.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for FileContent {
    fn from(v: &[u8; N]) -> Self {
        Self(v.to_vec())
    }
}

impl From<&str> for FileContent {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for FileContent {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

/// Persistence capability shared by both backends.
///
/// Paths are absolute virtual-filesystem paths. Prefix queries match by
/// plain string prefix; callers pass `base + "/"` to scope to a subtree.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Which implementation this is.
    fn kind(&self) -> BackendKind;

    // ========================================================================
    // Content store
    // ========================================================================

    /// Insert or replace a file. Each path's write is atomic.
    async fn put_file(&self, path: &str, content: FileContent, stat: FileStat)
    -> BackendResult<()>;

    /// Get a file. Absence is `Ok(None)`, never an error.
    async fn get_file(&self, path: &str) -> BackendResult<Option<FileRecord>>;

    /// All files under a prefix, with content. Order is unspecified.
    async fn list_files(&self, prefix: &str) -> BackendResult<Vec<FileRecord>>;

    /// All file paths under a prefix.
    async fn list_paths(&self, prefix: &str) -> BackendResult<Vec<String>>;

    /// Delete a file. Idempotent.
    async fn delete_file(&self, path: &str) -> BackendResult<()>;

    // ========================================================================
    // Directories
    // ========================================================================

    /// Record that a directory exists.
    async fn ensure_directory(&self, path: &str) -> BackendResult<()>;

    /// Delete a directory and everything under `path + "/"`. A missing path,
    /// or one that names a file, is a no-op.
    async fn delete_directory(&self, path: &str) -> BackendResult<()>;

    /// Directories exactly one level below `path`, as full paths.
    async fn list_child_directories(&self, path: &str) -> BackendResult<Vec<String>>;

    /// Every stored directory under a prefix, at any depth, sorted so that
    /// parents come before their children.
    async fn list_directories(&self, prefix: &str) -> BackendResult<Vec<String>>;

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Delete every file and directory record under a prefix.
    async fn clear_prefix(&self, prefix: &str) -> BackendResult<()>;

    /// Wipe everything.
    async fn clear(&self) -> BackendResult<()>;

    /// Count and size of files under a prefix.
    async fn usage(&self, prefix: &str) -> BackendResult<AreaStats> {
        let files = self.list_files(prefix).await?;
        let total = files.iter().map(|f| f.content.len() as u64).sum();
        Ok(AreaStats::new(files.len() as u64, total))
    }
}

/// Open the backend a configuration selects. `Ok(None)` for no-storage.
pub async fn open_backend(
    config: &StorageConfig,
) -> BackendResult<Option<Arc<dyn StorageBackend>>> {
    let backend: Arc<dyn StorageBackend> = match config.policy {
        StoragePolicy::NoStorage => return Ok(None),
        StoragePolicy::Database => Arc::new(SqliteBackend::open(&config.database_path)?),
        StoragePolicy::Directory => {
            let dir = config
                .directory
                .as_ref()
                .ok_or_else(|| BackendError::Unavailable("no directory granted".into()))?;
            Arc::new(DirectoryBackend::open(dir).await?)
        }
    };
    Ok(Some(backend))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_normalization() {
        let from_vec = FileContent::from(b"abc".to_vec());
        let from_slice = FileContent::from(&b"abc"[..]);
        let from_str = FileContent::from("abc");
        let from_string = FileContent::from(String::from("abc"));
        assert_eq!(from_vec, from_slice);
        assert_eq!(from_slice, from_str);
        assert_eq!(from_str, from_string);
        assert_eq!(FileContent::from("é").as_bytes(), &[0xc3, 0xa9]);
    }

    #[test]
    fn test_error_classification() {
        let denied: BackendError =
            io::Error::new(io::ErrorKind::PermissionDenied, "revoked").into();
        assert!(denied.is_access_failure());

        let other: BackendError = io::Error::other("disk full").into();
        assert!(!other.is_access_failure());
        assert!(BackendError::Unavailable("gone".into()).is_access_failure());
    }

    #[tokio::test]
    async fn test_open_backend_by_policy() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = StorageConfig {
            policy: StoragePolicy::NoStorage,
            database_path: tmp.path().join("store.db"),
            directory: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        assert!(open_backend(&config).await.unwrap().is_none());

        config.policy = StoragePolicy::Database;
        let backend = open_backend(&config).await.unwrap().unwrap();
        assert_eq!(backend.kind(), BackendKind::Database);

        config.policy = StoragePolicy::Directory;
        let backend = open_backend(&config).await.unwrap().unwrap();
        assert_eq!(backend.kind(), BackendKind::Directory);
    }
}
