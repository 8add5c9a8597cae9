//! VFS operations trait.
//!
//! The surface matches the sandboxed game filesystem: whole-file reads and
//! writes, name-only directory listings, and stat records. There is no cheap
//! "is this a directory" entry kind; callers discriminate by probing.

use async_trait::async_trait;

use super::types::{FileStat, PathInfo};
use super::VfsResult;

/// Core VFS operations trait.
///
/// Paths are absolute, `/`-separated strings (e.g. `/minetest/worlds/w1`).
#[async_trait]
pub trait VfsOps: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Get the stat record for a path.
    async fn stat(&self, path: &str) -> VfsResult<FileStat>;

    /// List directory entry names.
    ///
    /// Like the sandboxed runtime, the listing includes `.` and `..`.
    /// Fails when `path` is not a directory.
    async fn readdir(&self, path: &str) -> VfsResult<Vec<String>>;

    /// Read the entire contents of a file.
    async fn read_file(&self, path: &str) -> VfsResult<Vec<u8>>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Create or replace a file with `data`. The parent must exist.
    async fn write_file(&self, path: &str, data: &[u8]) -> VfsResult<()>;

    /// Create a directory and all missing ancestors.
    async fn mkdir_tree(&self, path: &str) -> VfsResult<()>;

    /// Set access and modification times (epoch milliseconds).
    async fn utime(&self, path: &str, atime_ms: i64, mtime_ms: i64) -> VfsResult<()>;

    /// Remove a file.
    async fn unlink(&self, path: &str) -> VfsResult<()>;

    /// Remove an empty directory.
    async fn rmdir(&self, path: &str) -> VfsResult<()>;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Probe whether anything exists at a path.
    async fn analyze_path(&self, path: &str) -> PathInfo {
        PathInfo {
            exists: self.stat(path).await.is_ok(),
        }
    }

    /// Remove a path and everything under it.
    ///
    /// Missing paths are not an error.
    async fn remove_tree(&self, path: &str) -> VfsResult<()> {
        let names = match self.readdir(path).await {
            Ok(names) => names,
            Err(_) => {
                return match self.unlink(path).await {
                    Err(e) if e.is_not_found() => Ok(()),
                    other => other,
                };
            }
        };
        for name in names {
            if name == "." || name == ".." {
                continue;
            }
            let child = super::join(path, &name);
            self.remove_tree(&child).await?;
        }
        self.rmdir(path).await
    }
}
