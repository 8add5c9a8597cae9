//! Local filesystem backend.
//!
//! Presents a host directory as a virtual filesystem, with path security
//! to prevent escaping the root directory. Used when a real game data
//! directory is mirrored instead of the in-memory sandbox.

use async_trait::async_trait;
use std::fs::FileTimes;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::VfsOps;
use crate::vfs::types::{FileStat, ms_to_system_time};

/// Local filesystem backend.
///
/// All paths are relative to `root`. For example, if `root` is
/// `/home/amy/game`, then `/minetest/worlds/w1` is
/// `/home/amy/game/minetest/worlds/w1`.
///
/// Path security is enforced: attempts to escape via `..` are blocked.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new local filesystem rooted at the given path.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a host path under the root back to its virtual path.
    pub fn virtual_path(&self, host: &Path) -> Option<String> {
        let rel = host.strip_prefix(&self.root).ok()?;
        let mut out = String::new();
        for component in rel.components() {
            out.push('/');
            out.push_str(&component.as_os_str().to_string_lossy());
        }
        if out.is_empty() {
            out.push('/');
        }
        Some(out)
    }

    /// Resolve a virtual path to an absolute host path within the root.
    ///
    /// Returns an error if the path escapes the root (via `..`).
    fn resolve(&self, path: &str) -> VfsResult<PathBuf> {
        let mut full = self.root.clone();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => return Err(VfsError::path_escapes_root(path)),
                s => full.push(s),
            }
        }

        // Symlinks inside the root may still point outside of it
        if full.exists() {
            let canonical = full.canonicalize()?;
            if !canonical.starts_with(&self.root) {
                return Err(VfsError::path_escapes_root(format!(
                    "{} is not under {}",
                    canonical.display(),
                    self.root.display()
                )));
            }
        }
        Ok(full)
    }
}

#[async_trait]
impl VfsOps for LocalBackend {
    async fn stat(&self, path: &str) -> VfsResult<FileStat> {
        let full_path = self.resolve(path)?;
        let meta = fs::metadata(&full_path).await?;
        Ok(FileStat::from(&meta))
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<String>> {
        let full_path = self.resolve(path)?;
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&full_path).await?;

        while let Some(entry) = dir.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        let mut result = Vec::with_capacity(names.len() + 2);
        result.push(".".to_string());
        result.push("..".to_string());
        result.extend(names);
        Ok(result)
    }

    async fn read_file(&self, path: &str) -> VfsResult<Vec<u8>> {
        let full_path = self.resolve(path)?;
        Ok(fs::read(&full_path).await?)
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        let full_path = self.resolve(path)?;
        fs::write(&full_path, data).await?;
        Ok(())
    }

    async fn mkdir_tree(&self, path: &str) -> VfsResult<()> {
        let full_path = self.resolve(path)?;
        fs::create_dir_all(&full_path).await?;
        Ok(())
    }

    async fn utime(&self, path: &str, atime_ms: i64, mtime_ms: i64) -> VfsResult<()> {
        let full_path = self.resolve(path)?;
        let file = std::fs::OpenOptions::new().write(true).open(&full_path)?;
        let times = FileTimes::new()
            .set_accessed(ms_to_system_time(atime_ms))
            .set_modified(ms_to_system_time(mtime_ms));
        file.set_times(times)?;
        Ok(())
    }

    async fn unlink(&self, path: &str) -> VfsResult<()> {
        let full_path = self.resolve(path)?;
        fs::remove_file(&full_path).await?;
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> VfsResult<()> {
        let full_path = self.resolve(path)?;
        if full_path == self.root {
            return Err(VfsError::permission_denied("cannot remove root"));
        }
        fs::remove_dir(&full_path).await?;
        Ok(())
    }
}
