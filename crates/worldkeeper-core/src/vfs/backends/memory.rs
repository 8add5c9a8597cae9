//! In-memory filesystem backend.
//!
//! This is the sandboxed filesystem the game process writes into. All data is
//! ephemeral. Optionally reports every write and delete as a [`ChangeNotice`],
//! the way the patched game runtime does.

use async_trait::async_trait;
use std::collections::HashMap;
#[cfg(test)]
use std::collections::HashSet;
use std::sync::RwLock;
use tokio::sync::mpsc;

use crate::notice::ChangeNotice;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::VfsOps;
use crate::vfs::types::{FileStat, now_ms};
use crate::vfs::{normalize, parent};

/// Entry in the memory filesystem.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, stat: FileStat },
    Directory { stat: FileStat },
}

impl Entry {
    fn stat(&self) -> &FileStat {
        match self {
            Entry::File { stat, .. } => stat,
            Entry::Directory { stat } => stat,
        }
    }

    fn stat_mut(&mut self) -> &mut FileStat {
        match self {
            Entry::File { stat, .. } => stat,
            Entry::Directory { stat } => stat,
        }
    }
}

/// In-memory filesystem backend.
///
/// Thread-safe via internal `RwLock`. All data is lost when dropped.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Entry>>,
    notifier: Option<mpsc::Sender<ChangeNotice>>,
    #[cfg(test)]
    failing_reads: RwLock<HashSet<String>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new empty in-memory filesystem.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        // Root directory always exists
        entries.insert(
            "/".to_string(),
            Entry::Directory {
                stat: FileStat::directory(0o755),
            },
        );
        Self {
            entries: RwLock::new(entries),
            notifier: None,
            #[cfg(test)]
            failing_reads: RwLock::new(HashSet::new()),
        }
    }

    /// Create a filesystem that reports changes on `tx`.
    ///
    /// Notices are best-effort: a full channel drops them.
    pub fn with_notifier(tx: mpsc::Sender<ChangeNotice>) -> Self {
        Self {
            notifier: Some(tx),
            ..Self::new()
        }
    }

    /// Snapshot of every file path currently present.
    pub fn file_paths(&self) -> VfsResult<Vec<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| VfsError::other("lock poisoned"))?;
        let mut paths: Vec<String> = entries
            .iter()
            .filter(|(_, e)| matches!(e, Entry::File { .. }))
            .map(|(p, _)| p.clone())
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Make `read_file` fail for a path, simulating an unreadable file.
    #[cfg(test)]
    pub(crate) fn fail_reads(&self, path: &str, failing: bool) {
        let mut set = self.failing_reads.write().expect("lock");
        if failing {
            set.insert(path.to_string());
        } else {
            set.remove(path);
        }
    }

    fn notify(&self, notice: ChangeNotice) {
        if let Some(tx) = &self.notifier {
            let _ = tx.try_send(notice);
        }
    }

    fn lock_err<T>(_: T) -> VfsError {
        VfsError::other("lock poisoned")
    }
}

#[async_trait]
impl VfsOps for MemoryBackend {
    async fn stat(&self, path: &str) -> VfsResult<FileStat> {
        let normalized = normalize(path);
        let entries = self.entries.read().map_err(Self::lock_err)?;
        entries
            .get(&normalized)
            .map(|e| *e.stat())
            .ok_or_else(|| VfsError::not_found(normalized))
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<String>> {
        let normalized = normalize(path);
        let entries = self.entries.read().map_err(Self::lock_err)?;

        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(normalized)),
            None => return Err(VfsError::not_found(normalized)),
        }

        let mut names: Vec<String> = entries
            .keys()
            .filter(|p| p.as_str() != normalized && parent(p) == Some(normalized.as_str()))
            .filter_map(|p| p.rsplit('/').next().map(str::to_string))
            .collect();
        names.sort();

        let mut result = Vec::with_capacity(names.len() + 2);
        result.push(".".to_string());
        result.push("..".to_string());
        result.extend(names);
        Ok(result)
    }

    async fn read_file(&self, path: &str) -> VfsResult<Vec<u8>> {
        let normalized = normalize(path);
        #[cfg(test)]
        {
            let failing = self.failing_reads.read().map_err(Self::lock_err)?;
            if failing.contains(&normalized) {
                return Err(VfsError::permission_denied(normalized));
            }
        }

        let entries = self.entries.read().map_err(Self::lock_err)?;
        match entries.get(&normalized) {
            Some(Entry::File { data, .. }) => Ok(data.clone()),
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(normalized)),
            None => Err(VfsError::not_found(normalized)),
        }
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        let normalized = normalize(path);
        {
            let mut entries = self.entries.write().map_err(Self::lock_err)?;

            let parent_path = parent(&normalized)
                .ok_or_else(|| VfsError::invalid_path(normalized.clone()))?;
            match entries.get(parent_path) {
                Some(Entry::Directory { .. }) => {}
                Some(_) => return Err(VfsError::not_a_directory(parent_path)),
                None => return Err(VfsError::not_found(parent_path)),
            }

            match entries.get_mut(&normalized) {
                Some(Entry::File {
                    data: file_data,
                    stat,
                }) => {
                    file_data.clear();
                    file_data.extend_from_slice(data);
                    stat.size = data.len() as u64;
                    stat.mtime_ms = now_ms();
                }
                Some(Entry::Directory { .. }) => {
                    return Err(VfsError::is_a_directory(normalized));
                }
                None => {
                    entries.insert(
                        normalized.clone(),
                        Entry::File {
                            data: data.to_vec(),
                            stat: FileStat::file(data.len() as u64, 0o644),
                        },
                    );
                }
            }
        }
        self.notify(ChangeNotice::Changed(normalized));
        Ok(())
    }

    async fn mkdir_tree(&self, path: &str) -> VfsResult<()> {
        let normalized = normalize(path);
        let mut created = Vec::new();
        {
            let mut entries = self.entries.write().map_err(Self::lock_err)?;

            let mut current = String::new();
            for segment in normalized.split('/').filter(|s| !s.is_empty()) {
                current.push('/');
                current.push_str(segment);
                match entries.get(&current) {
                    Some(Entry::Directory { .. }) => {}
                    Some(Entry::File { .. }) => {
                        return Err(VfsError::already_exists(current));
                    }
                    None => {
                        entries.insert(
                            current.clone(),
                            Entry::Directory {
                                stat: FileStat::directory(0o755),
                            },
                        );
                        created.push(current.clone());
                    }
                }
            }
        }
        for dir in created {
            self.notify(ChangeNotice::Changed(dir));
        }
        Ok(())
    }

    async fn utime(&self, path: &str, atime_ms: i64, mtime_ms: i64) -> VfsResult<()> {
        let normalized = normalize(path);
        let mut entries = self.entries.write().map_err(Self::lock_err)?;
        let entry = entries
            .get_mut(&normalized)
            .ok_or_else(|| VfsError::not_found(normalized.clone()))?;
        let stat = entry.stat_mut();
        stat.atime_ms = atime_ms;
        stat.mtime_ms = mtime_ms;
        Ok(())
    }

    async fn unlink(&self, path: &str) -> VfsResult<()> {
        let normalized = normalize(path);
        {
            let mut entries = self.entries.write().map_err(Self::lock_err)?;
            match entries.get(&normalized) {
                Some(Entry::Directory { .. }) => {
                    return Err(VfsError::is_a_directory(normalized));
                }
                Some(Entry::File { .. }) => {
                    entries.remove(&normalized);
                }
                None => return Err(VfsError::not_found(normalized)),
            }
        }
        self.notify(ChangeNotice::Deleted(normalized));
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> VfsResult<()> {
        let normalized = normalize(path);
        if normalized == "/" {
            return Err(VfsError::permission_denied("cannot remove root"));
        }
        {
            let mut entries = self.entries.write().map_err(Self::lock_err)?;

            match entries.get(&normalized) {
                Some(Entry::Directory { .. }) => {}
                Some(_) => return Err(VfsError::not_a_directory(normalized)),
                None => return Err(VfsError::not_found(normalized)),
            }

            let has_children = entries
                .keys()
                .any(|k| parent(k) == Some(normalized.as_str()) && k != &normalized);
            if has_children {
                return Err(VfsError::directory_not_empty(normalized));
            }

            entries.remove(&normalized);
        }
        self.notify(ChangeNotice::Deleted(normalized));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_read() {
        let fs = MemoryBackend::new();
        fs.mkdir_tree("/minetest/worlds/w1").await.unwrap();
        fs.write_file("/minetest/worlds/w1/world.mt", b"gameid = minetest")
            .await
            .unwrap();

        let data = fs.read_file("/minetest/worlds/w1/world.mt").await.unwrap();
        assert_eq!(data, b"gameid = minetest");

        let stat = fs.stat("/minetest/worlds/w1/world.mt").await.unwrap();
        assert!(stat.is_file());
        assert_eq!(stat.size, 17);
    }

    #[tokio::test]
    async fn test_write_requires_parent() {
        let fs = MemoryBackend::new();
        let result = fs.write_file("/missing/file.txt", b"x").await;
        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_readdir_lists_dot_entries() {
        let fs = MemoryBackend::new();
        fs.mkdir_tree("/a/sub").await.unwrap();
        fs.write_file("/a/file.txt", b"1").await.unwrap();

        let names = fs.readdir("/a").await.unwrap();
        assert_eq!(names, vec![".", "..", "file.txt", "sub"]);
    }

    #[tokio::test]
    async fn test_readdir_on_file_fails() {
        let fs = MemoryBackend::new();
        fs.mkdir_tree("/a").await.unwrap();
        fs.write_file("/a/file.txt", b"1").await.unwrap();
        assert!(fs.readdir("/a/file.txt").await.is_err());
        assert!(fs.readdir("/nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_utime_sets_times() {
        let fs = MemoryBackend::new();
        fs.mkdir_tree("/a").await.unwrap();
        fs.write_file("/a/f", b"x").await.unwrap();
        fs.utime("/a/f", 50, 100).await.unwrap();

        let stat = fs.stat("/a/f").await.unwrap();
        assert_eq!(stat.mtime_ms, 100);
        assert_eq!(stat.atime_ms, 50);
    }

    #[tokio::test]
    async fn test_rmdir_not_empty() {
        let fs = MemoryBackend::new();
        fs.mkdir_tree("/nonempty").await.unwrap();
        fs.write_file("/nonempty/file.txt", b"x").await.unwrap();

        assert!(fs.rmdir("/nonempty").await.is_err());
        fs.remove_tree("/nonempty").await.unwrap();
        assert!(!fs.analyze_path("/nonempty").await.exists);
    }

    #[tokio::test]
    async fn test_path_normalization() {
        let fs = MemoryBackend::new();
        fs.mkdir_tree("/a/b").await.unwrap();
        fs.write_file("/a/b/c.txt", b"x").await.unwrap();

        assert!(fs.stat("/a/b/c.txt").await.is_ok());
        assert!(fs.stat("/a/./b/c.txt").await.is_ok());
        assert!(fs.stat("/a/b/../b/c.txt").await.is_ok());
    }

    #[tokio::test]
    async fn test_notifier_reports_changes() {
        let (tx, mut rx) = mpsc::channel(16);
        let fs = MemoryBackend::with_notifier(tx);
        fs.mkdir_tree("/w").await.unwrap();
        fs.write_file("/w/f", b"x").await.unwrap();
        fs.unlink("/w/f").await.unwrap();

        assert_eq!(rx.recv().await, Some(ChangeNotice::Changed("/w".into())));
        assert_eq!(rx.recv().await, Some(ChangeNotice::Changed("/w/f".into())));
        assert_eq!(rx.recv().await, Some(ChangeNotice::Deleted("/w/f".into())));
    }
}
