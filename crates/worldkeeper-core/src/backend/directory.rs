//! Directory backend: persisted files mirrored into a granted host directory.
//!
//! Virtual path `/minetest/worlds/w1/map.sqlite` lives at
//! `<root>/minetest/worlds/w1/map.sqlite`. Directory existence is
//! structural, so there is no separate directory index, and since there is
//! no prefix query, listing walks the on-disk tree into a path map.
//!
//! Modification and access times are stored as the host file's own times,
//! and permission bits as the host file's mode. The owner always keeps read
//! and write access, so a stored mode like `0o444` comes back as `0o644`.
//!
//! Files are written to a sibling `.worldkeeper-*.part` file and renamed over
//! the target, so an interrupted write never replaces the previous copy.
//! Leftover part files are ignored by scans.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{FileTimes, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{BackendError, BackendKind, BackendResult, FileContent, StorageBackend};
use crate::db::FileRecord;
use crate::vfs::{FileStat, ms_to_system_time};

const PART_PREFIX: &str = ".worldkeeper-";
const PART_SUFFIX: &str = ".part";

fn is_part_file(name: &str) -> bool {
    name.starts_with(PART_PREFIX) && name.ends_with(PART_SUFFIX)
}

/// Files and directories found under a prefix.
#[derive(Debug, Default)]
struct Scan {
    files: BTreeMap<String, PathBuf>,
    directories: BTreeSet<String>,
}

/// Persistence into a user-granted host directory.
#[derive(Debug, Clone)]
pub struct DirectoryBackend {
    root: PathBuf,
}

impl DirectoryBackend {
    /// Open a granted directory. It must already exist.
    pub async fn open(root: impl Into<PathBuf>) -> BackendResult<Self> {
        let root: PathBuf = root.into();
        let meta = fs::metadata(&root).await.map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => {
                BackendError::PermissionDenied(format!("{}: {e}", root.display()))
            }
            _ => BackendError::Unavailable(format!("{}: {e}", root.display())),
        })?;
        if !meta.is_dir() {
            return Err(BackendError::Unavailable(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        let root = fs::canonicalize(&root).await.unwrap_or(root);
        tracing::debug!(root = %root.display(), "opened directory backend");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a virtual path to its host path. `..` is rejected.
    fn host_path(&self, path: &str) -> BackendResult<PathBuf> {
        let mut full = self.root.clone();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => return Err(BackendError::InvalidPath(path.to_string())),
                s => full.push(s),
            }
        }
        Ok(full)
    }

    /// Host directory to start a prefix scan from: everything up to the
    /// prefix's last `/`.
    fn scan_root(&self, prefix: &str) -> BackendResult<(String, PathBuf)> {
        let dir = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let dir = if dir.is_empty() { "/" } else { dir };
        Ok((dir.to_string(), self.host_path(dir)?))
    }

    /// The revoked-permission and vanished-root cases are indistinguishable
    /// from a missing subtree by error kind alone, so check the root.
    async fn check_root(&self) -> BackendResult<()> {
        match fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(BackendError::Unavailable(format!(
                "{} is not a directory",
                self.root.display()
            ))),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Err(e.into()),
            Err(e) => Err(BackendError::Unavailable(format!(
                "{}: {e}",
                self.root.display()
            ))),
        }
    }

    /// Enumerate every file and directory under `prefix`. Files map their
    /// virtual path to the host path.
    async fn scan(&self, prefix: &str) -> BackendResult<Scan> {
        self.check_root().await?;
        let (start_virtual, start_host) = self.scan_root(prefix)?;

        let mut found = Scan::default();
        let mut stack = vec![(start_virtual, start_host)];
        while let Some((virtual_dir, host_dir)) = stack.pop() {
            let mut entries = match fs::read_dir(&host_dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let virtual_path = crate::vfs::join(&virtual_dir, &name);
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if virtual_path.starts_with(prefix) {
                        found.directories.insert(virtual_path.clone());
                    }
                    // Only descend where the prefix can still match
                    let dir_prefix = format!("{virtual_path}/");
                    if dir_prefix.starts_with(prefix) || prefix.starts_with(&dir_prefix) {
                        stack.push((virtual_path, entry.path()));
                    }
                } else if file_type.is_file()
                    && !is_part_file(&name)
                    && virtual_path.starts_with(prefix)
                {
                    found.files.insert(virtual_path, entry.path());
                }
            }
        }
        Ok(found)
    }

    async fn read_record(path: String, host: &Path) -> BackendResult<Option<FileRecord>> {
        let meta = match fs::metadata(host).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Ok(None);
        }
        let content = match fs::read(host).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(FileRecord::new(path, content, FileStat::from(&meta))))
    }

    async fn remove_entry(host: &Path) -> io::Result<()> {
        let meta = match fs::symlink_metadata(host).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        let result = if meta.is_dir() {
            fs::remove_dir_all(host).await
        } else {
            fs::remove_file(host).await
        };
        match result {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[async_trait]
impl StorageBackend for DirectoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Directory
    }

    async fn put_file(
        &self,
        path: &str,
        content: FileContent,
        stat: FileStat,
    ) -> BackendResult<()> {
        let host = self.host_path(path)?;
        let parent = host
            .parent()
            .ok_or_else(|| BackendError::InvalidPath(path.to_string()))?
            .to_path_buf();
        self.check_root().await?;
        fs::create_dir_all(&parent).await?;

        let times = FileTimes::new()
            .set_accessed(ms_to_system_time(stat.atime_ms))
            .set_modified(ms_to_system_time(stat.mtime_ms));
        let perm = Permissions::from_mode(stat.perm() | 0o600);
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut part = tempfile::Builder::new()
                .prefix(PART_PREFIX)
                .suffix(PART_SUFFIX)
                .tempfile_in(&parent)?;
            part.write_all(content.as_bytes())?;
            part.as_file().set_permissions(perm)?;
            part.as_file().set_times(times)?;
            part.as_file().sync_all()?;
            part.persist(&host).map_err(|e| e.error)?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    async fn get_file(&self, path: &str) -> BackendResult<Option<FileRecord>> {
        let host = self.host_path(path)?;
        Self::read_record(path.to_string(), &host).await
    }

    async fn list_files(&self, prefix: &str) -> BackendResult<Vec<FileRecord>> {
        let mut records = Vec::new();
        for (path, host) in self.scan(prefix).await?.files {
            if let Some(record) = Self::read_record(path, &host).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn list_paths(&self, prefix: &str) -> BackendResult<Vec<String>> {
        Ok(self.scan(prefix).await?.files.into_keys().collect())
    }

    async fn delete_file(&self, path: &str) -> BackendResult<()> {
        let host = self.host_path(path)?;
        match fs::remove_file(&host).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn ensure_directory(&self, path: &str) -> BackendResult<()> {
        let host = self.host_path(path)?;
        self.check_root().await?;
        fs::create_dir_all(&host).await?;
        Ok(())
    }

    async fn delete_directory(&self, path: &str) -> BackendResult<()> {
        let host = self.host_path(path)?;
        if host == self.root {
            return Err(BackendError::InvalidPath(path.to_string()));
        }
        match fs::symlink_metadata(&host).await {
            Ok(meta) if !meta.is_dir() => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
            Ok(_) => {}
        }
        match fs::remove_dir_all(&host).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn list_child_directories(&self, path: &str) -> BackendResult<Vec<String>> {
        let host = self.host_path(path)?;
        let base = path.trim_end_matches('/');
        let mut entries = match fs::read_dir(&host).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                let name = entry.file_name().to_string_lossy().into_owned();
                children.push(format!("{base}/{name}"));
            }
        }
        children.sort();
        Ok(children)
    }

    async fn list_directories(&self, prefix: &str) -> BackendResult<Vec<String>> {
        Ok(self.scan(prefix).await?.directories.into_iter().collect())
    }

    async fn clear_prefix(&self, prefix: &str) -> BackendResult<()> {
        self.check_root().await?;
        let (dir, host_dir) = self.scan_root(prefix)?;
        let mut entries = match fs::read_dir(&host_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if crate::vfs::join(&dir, &name).starts_with(prefix) {
                Self::remove_entry(&entry.path()).await?;
            }
        }
        Ok(())
    }

    async fn clear(&self) -> BackendResult<()> {
        self.clear_prefix("/").await
    }
}
