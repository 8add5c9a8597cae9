//! Database backend: [`ContentDb`] behind the [`StorageBackend`] interface.
//!
//! SQLite calls are blocking, so every operation runs in
//! `tokio::task::spawn_blocking` against a shared connection handle.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

use super::{BackendError, BackendKind, BackendResult, FileContent, StorageBackend};
use crate::db::{ContentDb, FileRecord};
use crate::stats::AreaStats;
use crate::vfs::FileStat;

type DbHandle = Arc<Mutex<ContentDb>>;

/// Content store and directory index in one SQLite database.
#[derive(Clone)]
pub struct SqliteBackend {
    db: DbHandle,
}

impl SqliteBackend {
    /// Open (or create) the database file.
    pub fn open<P: AsRef<Path>>(path: P) -> BackendResult<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| {
                BackendError::Unavailable(format!("{}: {e}", dir.display()))
            })?;
        }
        let db = ContentDb::open(path)
            .map_err(|e| BackendError::Unavailable(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "opened content database");
        Ok(Self::from_db(db))
    }

    /// In-memory database, for tests.
    pub fn in_memory() -> BackendResult<Self> {
        Ok(Self::from_db(ContentDb::in_memory()?))
    }

    fn from_db(db: ContentDb) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    async fn with_db<T, F>(&self, f: F) -> BackendResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut ContentDb) -> rusqlite::Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = db.lock();
            f(&mut guard)
        })
        .await?;
        Ok(result?)
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Database
    }

    async fn put_file(
        &self,
        path: &str,
        content: FileContent,
        stat: FileStat,
    ) -> BackendResult<()> {
        let record = FileRecord::new(path, content.into_bytes(), stat);
        self.with_db(move |db| db.put_file(&record)).await
    }

    async fn get_file(&self, path: &str) -> BackendResult<Option<FileRecord>> {
        let path = path.to_string();
        self.with_db(move |db| db.get_file(&path)).await
    }

    async fn list_files(&self, prefix: &str) -> BackendResult<Vec<FileRecord>> {
        let prefix = prefix.to_string();
        self.with_db(move |db| db.list_by_prefix(&prefix)).await
    }

    async fn list_paths(&self, prefix: &str) -> BackendResult<Vec<String>> {
        let prefix = prefix.to_string();
        self.with_db(move |db| db.list_paths_by_prefix(&prefix)).await
    }

    async fn delete_file(&self, path: &str) -> BackendResult<()> {
        let path = path.to_string();
        self.with_db(move |db| db.delete_file(&path)).await
    }

    async fn ensure_directory(&self, path: &str) -> BackendResult<()> {
        let path = path.to_string();
        self.with_db(move |db| db.store_directory(&path)).await
    }

    async fn delete_directory(&self, path: &str) -> BackendResult<()> {
        let path = path.to_string();
        let removed = self
            .with_db(move |db| db.delete_directory(&path))
            .await?;
        tracing::trace!(files = removed, "directory cascade");
        Ok(())
    }

    async fn list_child_directories(&self, path: &str) -> BackendResult<Vec<String>> {
        let path = path.to_string();
        self.with_db(move |db| db.list_direct_children(&path)).await
    }

    async fn list_directories(&self, prefix: &str) -> BackendResult<Vec<String>> {
        let prefix = prefix.to_string();
        self.with_db(move |db| db.list_directories_by_prefix(&prefix))
            .await
    }

    async fn clear_prefix(&self, prefix: &str) -> BackendResult<()> {
        let prefix = prefix.to_string();
        self.with_db(move |db| db.delete_prefix(&prefix).map(|_| ()))
            .await
    }

    async fn clear(&self) -> BackendResult<()> {
        self.with_db(|db| db.clear()).await
    }

    async fn usage(&self, prefix: &str) -> BackendResult<AreaStats> {
        let prefix = prefix.to_string();
        let (count, bytes) = self
            .with_db(move |db| db.usage_by_prefix(&prefix))
            .await?;
        Ok(AreaStats::new(count, bytes))
    }
}
