//! The sync engine.
//!
//! Mirrors the `worlds` and `mods` subtrees of the game's virtual filesystem
//! into durable storage. On startup the stored files are written back into
//! the filesystem (initial load). After that, periodic passes walk the
//! filesystem, persist files whose modify-time changed since the last
//! successful sync, and delete stored files that vanished.
//!
//! ## State machine
//!
//! ```text
//! Uninitialized ──initialize──▶ Loading ──▶ Idle ◀──▶ Syncing
//!                                              │
//!                                           teardown ──▶ TornDown
//! ```
//!
//! At most one pass runs at a time. A `sync_now` that arrives while a pass
//! is in flight is skipped, not queued.
//!
//! ## Failure model
//!
//! - Backend fails to open: downgrade to no-storage, warn once, return Err.
//! - One path fails: log it, skip it, retry next pass (tracker untouched).
//! - Access to storage revoked mid-pass: the pass ends, partial progress
//!   stays recorded.

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Mutex, RwLock};
use strum::Display;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::archive::{self, ArchiveError};
use crate::backend::{self, BackendError, BackendKind, FileContent, StorageBackend};
use crate::config::{StorageConfig, StoragePolicy};
use crate::db::FileRecord;
use crate::layout::{ClearArea, StorageArea, SyncLayout};
use crate::notice::{ChangeNotice, Notice, NoticeBus};
use crate::report::{SyncMetrics, SyncReport};
use crate::stats::{AreaStats, StorageStats, format_size};
use crate::tracker::ChangeTracker;
use crate::vfs::{self, FileStat, VfsError, VfsOps};
use crate::walker::{WalkEntry, walk};

/// Engine error type.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync engine not initialized")]
    NotInitialized,

    #[error("sync engine already initialized")]
    AlreadyInitialized,

    #[error("sync engine has been torn down")]
    TornDown,

    /// The configured backend could not be opened or loaded.
    #[error("storage unavailable: {0}")]
    Unavailable(#[source] BackendError),

    /// The operation needs persistent storage but the policy is no-storage.
    #[error("persistent storage is disabled")]
    Disabled,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Vfs(#[from] VfsError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl SyncError {
    /// Storage access was lost; the pass cannot usefully continue.
    pub fn is_access_failure(&self) -> bool {
        match self {
            SyncError::Backend(e) | SyncError::Unavailable(e) => e.is_access_failure(),
            _ => false,
        }
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    Loading,
    Idle,
    Syncing,
    TornDown,
}

/// Result of a `sync_now` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A pass ran to completion.
    Completed(SyncReport),
    /// Another pass was in flight.
    Skipped,
    /// Persistence is off.
    Disabled,
}

struct PeriodicHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct EngineInner {
    layout: SyncLayout,
    vfs: Arc<dyn VfsOps>,
    backend: RwLock<Option<Arc<dyn StorageBackend>>>,
    policy: RwLock<StoragePolicy>,
    state: Mutex<EngineState>,
    /// Held for the duration of every pass and every bulk mutation.
    pass_lock: tokio::sync::Mutex<()>,
    tracker: ChangeTracker,
    stats: watch::Sender<StorageStats>,
    metrics: Mutex<SyncMetrics>,
    notices: NoticeBus,
    timer: Mutex<Option<PeriodicHandle>>,
    active_world: RwLock<Option<String>>,
    downgrade_warned: AtomicBool,
}

/// Handle to a sync engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Create an engine over `vfs`. Nothing is persisted until
    /// [`initialize`](Self::initialize) is called.
    pub fn new(layout: SyncLayout, vfs: Arc<dyn VfsOps>) -> Self {
        let (stats, _) = watch::channel(StorageStats::default());
        Self {
            inner: Arc::new(EngineInner {
                layout,
                vfs,
                backend: RwLock::new(None),
                policy: RwLock::new(StoragePolicy::NoStorage),
                state: Mutex::new(EngineState::Uninitialized),
                pass_lock: tokio::sync::Mutex::new(()),
                tracker: ChangeTracker::new(),
                stats,
                metrics: Mutex::new(SyncMetrics::default()),
                notices: NoticeBus::new(),
                timer: Mutex::new(None),
                active_world: RwLock::new(None),
                downgrade_warned: AtomicBool::new(false),
            }),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn layout(&self) -> &SyncLayout {
        &self.inner.layout
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.lock()
    }

    /// Effective policy. Reads `NoStorage` after a downgrade.
    pub fn policy(&self) -> StoragePolicy {
        *self.inner.policy.read()
    }

    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.backend().map(|b| b.kind())
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.inner.tracker
    }

    /// Latest computed stats.
    pub fn stats(&self) -> StorageStats {
        self.inner.stats.borrow().clone()
    }

    /// Receive every stats recomputation.
    pub fn subscribe_stats(&self) -> watch::Receiver<StorageStats> {
        self.inner.stats.subscribe()
    }

    pub fn metrics(&self) -> SyncMetrics {
        self.inner.metrics.lock().clone()
    }

    /// Receive user-facing notices.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    /// World most recently touched by the game, from change notices.
    pub fn active_world(&self) -> Option<String> {
        self.inner.active_world.read().clone()
    }

    fn backend(&self) -> Option<Arc<dyn StorageBackend>> {
        self.inner.backend.read().clone()
    }

    fn set_state(&self, state: EngineState) {
        *self.inner.state.lock() = state;
    }

    fn require_ready(&self) -> Result<(), SyncError> {
        match self.state() {
            EngineState::Uninitialized => Err(SyncError::NotInitialized),
            EngineState::TornDown => Err(SyncError::TornDown),
            _ => Ok(()),
        }
    }

    fn require_backend(&self) -> Result<Arc<dyn StorageBackend>, SyncError> {
        self.require_ready()?;
        self.backend().ok_or(SyncError::Disabled)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open the configured backend and load stored files into the
    /// filesystem. Call once per session.
    ///
    /// On backend failure the engine stays usable in no-storage mode and the
    /// error is returned for the caller to report.
    pub async fn initialize(&self, config: &StorageConfig) -> Result<(), SyncError> {
        tracing::info!(policy = %config.policy, "initializing storage");
        self.begin_loading()?;

        let opened = backend::open_backend(config).await;

        match opened {
            Ok(Some(backend)) => self.attach(backend).await,
            Ok(None) => {
                *self.inner.policy.write() = StoragePolicy::NoStorage;
                self.refresh_stats().await;
                self.set_state(EngineState::Idle);
                tracing::info!("persistence disabled");
                Ok(())
            }
            Err(e) => Err(self.downgrade(e).await),
        }
    }

    /// Initialize against an already-opened backend.
    pub async fn initialize_with_backend(
        &self,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<(), SyncError> {
        self.begin_loading()?;
        self.attach(backend).await
    }

    fn begin_loading(&self) -> Result<(), SyncError> {
        let mut state = self.inner.state.lock();
        match *state {
            EngineState::Uninitialized => {
                *state = EngineState::Loading;
                Ok(())
            }
            EngineState::TornDown => Err(SyncError::TornDown),
            _ => Err(SyncError::AlreadyInitialized),
        }
    }

    async fn attach(&self, backend: Arc<dyn StorageBackend>) -> Result<(), SyncError> {
        let _pass = self.inner.pass_lock.lock().await;
        let started = Instant::now();

        let loaded = match self.initial_load(backend.as_ref()).await {
            Ok(loaded) => loaded,
            Err(e) => return Err(self.downgrade(e).await),
        };

        *self.inner.policy.write() = match backend.kind() {
            BackendKind::Database => StoragePolicy::Database,
            BackendKind::Directory => StoragePolicy::Directory,
        };
        *self.inner.backend.write() = Some(Arc::clone(&backend));
        self.refresh_stats().await;
        self.set_state(EngineState::Idle);

        tracing::info!(
            backend = %backend.kind(),
            files = loaded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "storage initialized"
        );
        self.inner
            .notices
            .publish(Notice::info(format!("Storage: {} loaded successfully", backend.kind())));
        Ok(())
    }

    /// Fall back to no-storage. The warning notice is published once per
    /// engine.
    async fn downgrade(&self, error: BackendError) -> SyncError {
        tracing::error!(error = %error, "storage backend unavailable, continuing without persistence");
        *self.inner.policy.write() = StoragePolicy::NoStorage;
        *self.inner.backend.write() = None;
        self.inner.tracker.clear();
        if !self.inner.downgrade_warned.swap(true, Ordering::SeqCst) {
            self.inner.notices.publish(Notice::warning(format!(
                "Storage unavailable ({error}). Game data will not be saved."
            )));
        }
        self.refresh_stats().await;
        self.set_state(EngineState::Idle);
        SyncError::Unavailable(error)
    }

    /// Write every stored file of both areas back into the filesystem.
    async fn initial_load(&self, backend: &dyn StorageBackend) -> Result<usize, BackendError> {
        let mut loaded = 0;
        for (area, base) in self.inner.layout.areas() {
            self.restore_directories(backend, &base).await?;

            let files = backend.list_files(&self.inner.layout.prefix(area)).await?;
            if files.is_empty() {
                tracing::debug!(path = %base, "nothing stored to load");
                continue;
            }
            for record in files {
                match self.restore_file(&record).await {
                    Ok(_) => loaded += 1,
                    Err(e) => {
                        tracing::warn!(path = %record.path, error = %e, "failed to load stored file");
                    }
                }
            }
            tracing::debug!(path = %base, files = loaded, "loaded stored files");
        }
        Ok(loaded)
    }

    /// Recreate the stored directory structure under `base`, so empty
    /// directories survive a restart.
    async fn restore_directories(
        &self,
        backend: &dyn StorageBackend,
        base: &str,
    ) -> Result<(), BackendError> {
        let mut pending = backend.list_child_directories(base).await?;
        while let Some(dir) = pending.pop() {
            if let Err(e) = self.inner.vfs.mkdir_tree(&dir).await {
                tracing::warn!(path = %dir, error = %e, "failed to restore directory");
                continue;
            }
            pending.extend(backend.list_child_directories(&dir).await?);
        }
        Ok(())
    }

    /// Write one record into the filesystem and restore its modify-time.
    ///
    /// The tracker records whatever modify-time the filesystem ends up
    /// reporting, so the next pass does not write the file straight back.
    async fn restore_file(&self, record: &FileRecord) -> Result<FileStat, VfsError> {
        let fs = &self.inner.vfs;
        if let Some(dir) = vfs::parent(&record.path) {
            if !fs.analyze_path(dir).await.exists {
                fs.mkdir_tree(dir).await?;
            }
        }
        fs.write_file(&record.path, &record.content).await?;
        if let Err(e) = fs
            .utime(&record.path, record.stat.atime_ms, record.stat.mtime_ms)
            .await
        {
            tracing::debug!(path = %record.path, error = %e, "could not restore modify-time");
        }
        let stat = fs.stat(&record.path).await?;
        self.inner.tracker.record_synced(&record.path, stat.mtime_ms);
        Ok(stat)
    }

    /// Stop the timer, run a final pass, and refuse further work.
    ///
    /// Returns the final pass's report, or `None` when nothing is persisted.
    pub async fn teardown(&self) -> Result<Option<SyncReport>, SyncError> {
        self.stop_periodic().await;

        match self.state() {
            EngineState::TornDown => return Err(SyncError::TornDown),
            EngineState::Uninitialized => {
                self.set_state(EngineState::TornDown);
                return Ok(None);
            }
            _ => {}
        }

        tracing::info!("performing final sync on teardown");
        let _pass = self.inner.pass_lock.lock().await;
        let result = match self.backend() {
            Some(backend) => {
                self.set_state(EngineState::Syncing);
                self.run_pass(backend.as_ref()).await.map(Some)
            }
            None => Ok(None),
        };
        self.set_state(EngineState::TornDown);

        match result {
            Ok(Some(report)) => {
                self.finish_pass(&report).await;
                tracing::info!(summary = %report.summary(), "final sync complete");
                Ok(Some(report))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::error!(error = %e, "final sync failed");
                Err(e)
            }
        }
    }

    // ========================================================================
    // Periodic sync
    // ========================================================================

    /// Run a pass every `period` until [`stop_periodic`](Self::stop_periodic)
    /// or teardown. Restarting replaces the previous timer.
    pub async fn start_periodic(&self, period: Duration) -> Result<(), SyncError> {
        self.require_ready()?;
        if self.backend().is_none() {
            tracing::debug!("persistence disabled, periodic sync not started");
            return Ok(());
        }
        self.stop_periodic().await;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let engine = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = engine.sync_now().await {
                            tracing::warn!(error = %e, "periodic sync failed");
                        }
                    }
                }
            }
        });

        *self.inner.timer.lock() = Some(PeriodicHandle { shutdown_tx, task });
        tracing::info!(
            interval_ms = period.as_millis() as u64,
            policy = %self.policy(),
            "periodic sync started"
        );
        Ok(())
    }

    /// Stop the periodic timer, waiting for an in-flight tick to finish.
    pub async fn stop_periodic(&self) {
        let handle = self.inner.timer.lock().take();
        if let Some(handle) = handle {
            let _ = handle.shutdown_tx.send(());
            if let Err(e) = handle.task.await {
                tracing::warn!(error = %e, "periodic sync task ended abnormally");
            }
            tracing::info!("periodic sync stopped");
        }
    }

    pub fn is_periodic_running(&self) -> bool {
        self.inner.timer.lock().is_some()
    }

    // ========================================================================
    // Sync passes
    // ========================================================================

    /// Run one pass now.
    ///
    /// A failed pass publishes a warning notice; the tracker keeps whatever
    /// progress was made before the failure.
    pub async fn sync_now(&self) -> Result<SyncOutcome, SyncError> {
        match self.state() {
            EngineState::Uninitialized => return Err(SyncError::NotInitialized),
            EngineState::TornDown => return Err(SyncError::TornDown),
            EngineState::Loading => return Ok(SyncOutcome::Skipped),
            EngineState::Idle | EngineState::Syncing => {}
        }
        let Some(backend) = self.backend() else {
            return Ok(SyncOutcome::Disabled);
        };
        let Ok(_pass) = self.inner.pass_lock.try_lock() else {
            tracing::debug!("sync pass already in flight, skipping");
            return Ok(SyncOutcome::Skipped);
        };
        // Teardown may have finished since the state check
        if self.state() == EngineState::TornDown {
            return Err(SyncError::TornDown);
        }

        self.set_state(EngineState::Syncing);
        let result = self.run_pass(backend.as_ref()).await;
        self.set_state(EngineState::Idle);

        match result {
            Ok(report) => {
                self.finish_pass(&report).await;
                Ok(SyncOutcome::Completed(report))
            }
            Err(e) => {
                tracing::error!(error = %e, "sync pass aborted");
                self.inner.notices.publish(Notice::warning(
                    "Storage sync failed. Some changes may not be saved.",
                ));
                Err(e)
            }
        }
    }

    /// Walk both areas, persist stale files, then delete stored files and
    /// directories that the walk did not see.
    ///
    /// The presence sets for an area are complete before any deletion is
    /// judged.
    async fn run_pass(&self, backend: &dyn StorageBackend) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let mut report = SyncReport::default();
        let tracker = &self.inner.tracker;

        for (area, base) in self.inner.layout.areas() {
            let prefix = self.inner.layout.prefix(area);
            let mut present = HashSet::new();
            let mut present_dirs = HashSet::new();

            for entry in walk(self.inner.vfs.as_ref(), &base).await {
                match entry {
                    WalkEntry::Directory(path) => {
                        let recorded = backend.ensure_directory(&path).await;
                        present_dirs.insert(path.clone());
                        if let Err(e) = recorded {
                            if e.is_access_failure() {
                                return Err(e.into());
                            }
                            tracing::warn!(path = %path, error = %e, "failed to record directory");
                        }
                    }
                    WalkEntry::File { path, stat } => {
                        report.files_processed += 1;
                        present.insert(path.clone());
                        if !tracker.is_stale(&path, stat.mtime_ms) {
                            continue;
                        }
                        match self.persist_file(backend, &path, stat).await {
                            Ok(bytes) => {
                                tracing::debug!(path = %path, bytes, "persisted");
                                report.record_write(area, bytes);
                            }
                            Err(e) if e.is_access_failure() => return Err(e),
                            Err(e) => {
                                tracing::warn!(path = %path, error = %e, "failed to persist, will retry");
                                report.files_failed += 1;
                            }
                        }
                    }
                }
            }

            for path in backend.list_paths(&prefix).await? {
                if present.contains(&path) {
                    continue;
                }
                match backend.delete_file(&path).await {
                    Ok(()) => {
                        tracker.forget(&path);
                        report.files_deleted += 1;
                        tracing::debug!(path = %path, "deleted from storage");
                    }
                    Err(e) if e.is_access_failure() => return Err(e.into()),
                    Err(e) => {
                        tracing::warn!(path = %path, error = %e, "failed to delete, will retry");
                        report.files_failed += 1;
                    }
                }
            }

            // Parents sort first and their delete cascades to children
            let mut pruned: Vec<String> = Vec::new();
            for dir in backend.list_directories(&prefix).await? {
                if present_dirs.contains(&dir)
                    || pruned.iter().any(|p| dir.starts_with(p.as_str()))
                {
                    continue;
                }
                match backend.delete_directory(&dir).await {
                    Ok(()) => {
                        let descendants = format!("{dir}/");
                        tracker.forget_prefix(&descendants);
                        pruned.push(descendants);
                        report.directories_deleted += 1;
                        tracing::debug!(path = %dir, "directory deleted from storage");
                    }
                    Err(e) if e.is_access_failure() => return Err(e.into()),
                    Err(e) => {
                        tracing::warn!(path = %dir, error = %e, "failed to delete directory, will retry");
                    }
                }
            }
        }

        report.duration = started.elapsed();
        Ok(report)
    }

    async fn persist_file(
        &self,
        backend: &dyn StorageBackend,
        path: &str,
        stat: FileStat,
    ) -> Result<u64, SyncError> {
        let content = FileContent::from(self.inner.vfs.read_file(path).await?);
        let bytes = content.len() as u64;
        backend.put_file(path, content, stat).await?;
        self.inner.tracker.record_synced(path, stat.mtime_ms);
        Ok(bytes)
    }

    async fn finish_pass(&self, report: &SyncReport) {
        self.inner.metrics.lock().record(report);

        if report.changed() {
            tracing::info!(
                written = report.files_written,
                processed = report.files_processed,
                deleted = report.files_deleted,
                directories_deleted = report.directories_deleted,
                bytes = report.bytes_written,
                duration_ms = report.duration.as_millis() as u64,
                "sync complete"
            );
            self.refresh_stats().await;
            if report.is_notable() {
                self.inner.notices.publish(Notice::info(format!(
                    "Game data saved: {} files ({}) synced, {} files deleted",
                    report.files_written,
                    format_size(report.bytes_written),
                    report.files_deleted
                )));
            }
        } else {
            tracing::debug!(
                processed = report.files_processed,
                duration_ms = report.duration.as_millis() as u64,
                "sync complete, no changes"
            );
        }
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Recompute stats from scratch and notify subscribers.
    ///
    /// With persistence off, the numbers describe the live filesystem.
    pub async fn refresh_stats(&self) -> StorageStats {
        let mut stats = self.stats();
        let backend = self.backend();
        for area in [StorageArea::Worlds, StorageArea::Mods] {
            let computed = match &backend {
                Some(backend) => backend.usage(&self.inner.layout.prefix(area)).await,
                None => Ok(self.live_usage(area).await),
            };
            match computed {
                Ok(area_stats) => stats.set_area(area, area_stats),
                Err(e) => {
                    tracing::warn!(area = %area, error = %e, "failed to compute storage stats");
                }
            }
        }
        stats.last_update = Some(SystemTime::now());
        self.inner.stats.send_replace(stats.clone());
        stats
    }

    async fn live_usage(&self, area: StorageArea) -> AreaStats {
        let base = self.inner.layout.base_path(area);
        walk(self.inner.vfs.as_ref(), &base)
            .await
            .iter()
            .fold(AreaStats::default(), |acc, entry| match entry {
                WalkEntry::File { stat, .. } => acc + AreaStats::new(1, stat.size),
                WalkEntry::Directory(_) => acc,
            })
    }

    // ========================================================================
    // Storage management
    // ========================================================================

    /// Delete persisted data for an area. The live filesystem is untouched;
    /// the tracker forgets the area, so the next pass re-persists whatever
    /// is still live.
    pub async fn clear_storage(&self, target: ClearArea) -> Result<(), SyncError> {
        self.require_ready()?;
        let _pass = self.inner.pass_lock.lock().await;
        let backend = self.backend();

        for area in target.areas() {
            let prefix = self.inner.layout.prefix(area);
            if let Some(backend) = &backend {
                if let Err(e) = backend.clear_prefix(&prefix).await {
                    tracing::error!(area = %area, error = %e, "failed to clear storage");
                    self.inner
                        .notices
                        .publish(Notice::error(format!("Failed to clear storage: {e}")));
                    return Err(e.into());
                }
            }
            let forgotten = self.inner.tracker.forget_prefix(&prefix);
            tracing::info!(area = %area, forgotten, "cleared storage");
        }
        self.refresh_stats().await;
        Ok(())
    }

    /// Wipe every stored file and directory, in every area.
    pub async fn force_clear_storage(&self) -> Result<(), SyncError> {
        let backend = self.require_backend()?;
        let _pass = self.inner.pass_lock.lock().await;
        backend.clear().await?;
        self.inner.tracker.clear();
        tracing::info!("storage wiped");
        self.refresh_stats().await;
        Ok(())
    }

    /// Names of the persisted worlds.
    pub async fn list_worlds(&self) -> Result<Vec<String>, SyncError> {
        self.require_ready()?;
        let Some(backend) = self.backend() else {
            return Ok(Vec::new());
        };
        let base = self.inner.layout.base_path(StorageArea::Worlds);
        let dirs = backend.list_child_directories(&base).await?;
        Ok(dirs
            .iter()
            .filter_map(|d| d.rsplit('/').next())
            .map(str::to_string)
            .collect())
    }

    // ========================================================================
    // Export / import
    // ========================================================================

    /// Zip every persisted file of an area. Entry names are relative to the
    /// area's base path.
    pub async fn export_area(&self, area: StorageArea) -> Result<Vec<u8>, SyncError> {
        let backend = self.require_backend()?;
        let records = backend.list_files(&self.inner.layout.prefix(area)).await?;
        let base = self.inner.layout.base_path(area);
        let count = records.len();

        let bytes = tokio::task::spawn_blocking(move || {
            archive::write_archive(Cursor::new(Vec::new()), &base, &records)
                .map(Cursor::into_inner)
        })
        .await
        .map_err(BackendError::from)??;

        tracing::info!(area = %area, files = count, bytes = bytes.len(), "exported area");
        Ok(bytes)
    }

    /// Replace an area with the contents of a zip archive.
    ///
    /// Prior content of the area is discarded in both the filesystem and
    /// storage. Each entry then goes through the initial-load write path
    /// and is persisted. Returns the number of files restored.
    pub async fn import_area(&self, area: StorageArea, zip: Vec<u8>) -> Result<usize, SyncError> {
        let backend = self.require_backend()?;
        let entries = tokio::task::spawn_blocking(move || archive::read_archive(Cursor::new(zip)))
            .await
            .map_err(BackendError::from)??;

        let _pass = self.inner.pass_lock.lock().await;
        let fs = &self.inner.vfs;
        let base = self.inner.layout.base_path(area);
        let prefix = self.inner.layout.prefix(area);

        fs.remove_tree(&base).await?;
        backend.clear_prefix(&prefix).await?;
        self.inner.tracker.forget_prefix(&prefix);

        fs.mkdir_tree(&base).await?;
        let mut restored = 0;
        for entry in entries {
            let path = vfs::join(&base, &entry.name);
            let mut dir = vfs::parent(&path).map(str::to_string);
            while let Some(d) = dir.filter(|d| d.starts_with(&prefix)) {
                backend.ensure_directory(&d).await?;
                dir = vfs::parent(&d).map(str::to_string);
            }

            let record = FileRecord::new(path, entry.content, FileStat::file(0, 0o644));
            let stat = self.restore_file(&record).await?;
            backend
                .put_file(&record.path, FileContent::from(record.content), stat)
                .await?;
            restored += 1;
        }

        tracing::info!(area = %area, files = restored, "imported area");
        self.refresh_stats().await;
        Ok(restored)
    }

    // ========================================================================
    // Change notices
    // ========================================================================

    /// The game wrote or created `path`.
    ///
    /// Directories are recorded right away instead of waiting for the next
    /// pass; file content is left to the pass.
    pub async fn on_file_changed(&self, path: &str) -> Result<(), SyncError> {
        let path = vfs::normalize(path);
        let Some(area) = self.inner.layout.area_of(&path) else {
            return Ok(());
        };
        if area == StorageArea::Worlds {
            self.track_active_world(&path);
        }
        let Some(backend) = self.backend() else {
            return Ok(());
        };

        let stat = match self.inner.vfs.stat(&path).await {
            Ok(stat) => stat,
            // Already gone again; the pass will reconcile
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let dir = if stat.is_dir() {
            path.as_str()
        } else {
            match vfs::parent(&path) {
                Some(parent) => parent,
                None => return Ok(()),
            }
        };
        if self.inner.layout.area_of(dir).is_some() {
            backend.ensure_directory(dir).await?;
            tracing::trace!(path = %dir, "directory recorded");
        }
        Ok(())
    }

    /// The game deleted `path`, file or directory.
    pub async fn on_file_deleted(&self, path: &str) -> Result<(), SyncError> {
        let path = vfs::normalize(path);
        if self.inner.layout.area_of(&path).is_none() {
            return Ok(());
        }
        let Some(backend) = self.backend() else {
            return Ok(());
        };

        backend.delete_directory(&path).await?;
        backend.delete_file(&path).await?;
        self.inner.tracker.forget(&path);
        self.inner.tracker.forget_prefix(&format!("{path}/"));
        tracing::debug!(path = %path, "removed from storage");
        self.refresh_stats().await;
        Ok(())
    }

    fn track_active_world(&self, path: &str) {
        let prefix = self.inner.layout.prefix(StorageArea::Worlds);
        let Some((world, _)) = path
            .strip_prefix(&prefix)
            .and_then(|rest| rest.split_once('/'))
        else {
            return;
        };
        let mut active = self.inner.active_world.write();
        if active.as_deref() != Some(world) {
            tracing::info!(world = %world, "active world changed");
            *active = Some(world.to_string());
        }
    }

    /// Consume change notices until the channel closes or the engine is
    /// torn down.
    pub fn spawn_change_listener(&self, mut rx: mpsc::Receiver<ChangeNotice>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            while let Some(notice) = rx.recv().await {
                if engine.state() == EngineState::TornDown {
                    break;
                }
                let result = match &notice {
                    ChangeNotice::Changed(path) => engine.on_file_changed(path).await,
                    ChangeNotice::Deleted(path) => engine.on_file_deleted(path).await,
                };
                if let Err(e) = result {
                    tracing::warn!(path = %notice.path(), error = %e, "failed to apply change notice");
                }
            }
            tracing::debug!("change listener stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendResult;
    use crate::notice::{NoticeLevel, change_channel};
    use crate::vfs::MemoryBackend;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    const MAP: &str = "/minetest/worlds/w1/map.sqlite";

    /// Counts writes and deletes on the way to a real backend.
    struct CountingBackend {
        inner: crate::backend::SqliteBackend,
        puts: AtomicUsize,
        deletes: AtomicUsize,
        /// Puts beyond this count fail as if access were revoked.
        revoke_after: AtomicUsize,
    }

    impl CountingBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: crate::backend::SqliteBackend::in_memory().unwrap(),
                puts: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
                revoke_after: AtomicUsize::new(usize::MAX),
            })
        }

        fn revoke_after(&self, puts: usize) {
            self.revoke_after.store(puts, Ordering::SeqCst);
        }

        fn puts(&self) -> usize {
            self.puts.load(Ordering::SeqCst)
        }

        fn deletes(&self) -> usize {
            self.deletes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StorageBackend for CountingBackend {
        fn kind(&self) -> BackendKind {
            self.inner.kind()
        }
        async fn put_file(&self, path: &str, content: FileContent, stat: FileStat) -> BackendResult<()> {
            if self.puts.load(Ordering::SeqCst) >= self.revoke_after.load(Ordering::SeqCst) {
                return Err(BackendError::PermissionDenied(path.to_string()));
            }
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.inner.put_file(path, content, stat).await
        }
        async fn get_file(&self, path: &str) -> BackendResult<Option<FileRecord>> {
            self.inner.get_file(path).await
        }
        async fn list_files(&self, prefix: &str) -> BackendResult<Vec<FileRecord>> {
            self.inner.list_files(prefix).await
        }
        async fn list_paths(&self, prefix: &str) -> BackendResult<Vec<String>> {
            self.inner.list_paths(prefix).await
        }
        async fn delete_file(&self, path: &str) -> BackendResult<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.inner.delete_file(path).await
        }
        async fn ensure_directory(&self, path: &str) -> BackendResult<()> {
            self.inner.ensure_directory(path).await
        }
        async fn delete_directory(&self, path: &str) -> BackendResult<()> {
            self.inner.delete_directory(path).await
        }
        async fn list_child_directories(&self, path: &str) -> BackendResult<Vec<String>> {
            self.inner.list_child_directories(path).await
        }
        async fn list_directories(&self, prefix: &str) -> BackendResult<Vec<String>> {
            self.inner.list_directories(prefix).await
        }
        async fn clear_prefix(&self, prefix: &str) -> BackendResult<()> {
            self.inner.clear_prefix(prefix).await
        }
        async fn clear(&self) -> BackendResult<()> {
            self.inner.clear().await
        }
    }

    async fn write_with_mtime(fs: &MemoryBackend, path: &str, data: &[u8], mtime: i64) {
        if let Some(dir) = vfs::parent(path) {
            fs.mkdir_tree(dir).await.unwrap();
        }
        fs.write_file(path, data).await.unwrap();
        fs.utime(path, mtime, mtime).await.unwrap();
    }

    async fn setup() -> (Arc<MemoryBackend>, Arc<CountingBackend>, SyncEngine) {
        let fs = Arc::new(MemoryBackend::new());
        let backend = CountingBackend::new();
        let engine = SyncEngine::new(SyncLayout::default(), fs.clone());
        engine
            .initialize_with_backend(backend.clone())
            .await
            .unwrap();
        (fs, backend, engine)
    }

    fn completed(outcome: SyncOutcome) -> SyncReport {
        match outcome {
            SyncOutcome::Completed(report) => report,
            other => panic!("expected a completed pass, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_new_file_is_put_once() {
        let (fs, backend, engine) = setup().await;
        write_with_mtime(&fs, MAP, b"B1", 100).await;

        let report = completed(engine.sync_now().await.unwrap());
        assert_eq!(report.files_written, 1);
        assert_eq!(report.worlds_written, 1);
        assert_eq!(backend.puts(), 1);
        assert_eq!(engine.tracker().last_synced(MAP), Some(100));

        let stored = backend.get_file(MAP).await.unwrap().unwrap();
        assert_eq!(stored.content, b"B1");
        assert_eq!(stored.stat.mtime_ms, 100);
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let (fs, backend, engine) = setup().await;
        write_with_mtime(&fs, MAP, b"B1", 100).await;
        write_with_mtime(&fs, "/minetest/mods/foo/init.lua", b"-- foo", 200).await;

        engine.sync_now().await.unwrap();
        let (puts, deletes) = (backend.puts(), backend.deletes());

        let report = completed(engine.sync_now().await.unwrap());
        assert!(!report.changed());
        assert_eq!(report.files_processed, 2);
        assert_eq!(backend.puts(), puts);
        assert_eq!(backend.deletes(), deletes);
    }

    #[tokio::test]
    async fn test_vanished_files_are_deleted() {
        let (_fs, backend, engine) = setup().await;
        for name in ["init.lua", "mod.conf", "textures/a.png"] {
            backend
                .put_file(
                    &format!("/minetest/mods/foo/{name}"),
                    "x".into(),
                    FileStat::file(1, 0o644),
                )
                .await
                .unwrap();
        }
        backend
            .put_file(MAP, "keep".into(), FileStat::file(4, 0o644))
            .await
            .unwrap();
        engine.refresh_stats().await;
        assert_eq!(engine.stats().mods.file_count, 3);

        // The world file is also absent from the filesystem, so it goes too
        let report = completed(engine.sync_now().await.unwrap());
        assert_eq!(report.files_deleted, 4);
        assert_eq!(engine.stats().mods, AreaStats::new(0, 0));
    }

    #[tokio::test]
    async fn test_deletion_spares_siblings() {
        let (fs, backend, engine) = setup().await;
        write_with_mtime(&fs, "/minetest/mods/foo/a.lua", b"a", 1).await;
        write_with_mtime(&fs, "/minetest/mods/foo/b.lua", b"b", 1).await;
        engine.sync_now().await.unwrap();

        fs.unlink("/minetest/mods/foo/a.lua").await.unwrap();
        let report = completed(engine.sync_now().await.unwrap());
        assert_eq!(report.files_deleted, 1);
        assert!(backend.get_file("/minetest/mods/foo/a.lua").await.unwrap().is_none());
        assert!(backend.get_file("/minetest/mods/foo/b.lua").await.unwrap().is_some());
        assert_eq!(engine.tracker().last_synced("/minetest/mods/foo/a.lua"), None);
    }

    #[tokio::test]
    async fn test_same_mtime_is_not_resynced() {
        let (fs, backend, engine) = setup().await;
        write_with_mtime(&fs, MAP, b"B1", 100).await;
        engine.sync_now().await.unwrap();

        // Content changes but the clock did not advance
        write_with_mtime(&fs, MAP, b"B2", 100).await;
        let report = completed(engine.sync_now().await.unwrap());
        assert_eq!(report.files_written, 0);
        assert_eq!(backend.get_file(MAP).await.unwrap().unwrap().content, b"B1");

        write_with_mtime(&fs, MAP, b"B3", 101).await;
        let report = completed(engine.sync_now().await.unwrap());
        assert_eq!(report.files_written, 1);
        assert_eq!(backend.get_file(MAP).await.unwrap().unwrap().content, b"B3");
    }

    #[tokio::test]
    async fn test_failed_path_is_retried() {
        let (fs, backend, engine) = setup().await;
        write_with_mtime(&fs, MAP, b"B1", 100).await;
        write_with_mtime(&fs, "/minetest/worlds/w1/world.mt", b"w", 100).await;
        fs.fail_reads(MAP, true);

        let report = completed(engine.sync_now().await.unwrap());
        assert_eq!(report.files_written, 1);
        assert_eq!(report.files_failed, 1);
        assert!(backend.get_file(MAP).await.unwrap().is_none());
        assert_eq!(engine.tracker().last_synced(MAP), None);

        fs.fail_reads(MAP, false);
        let report = completed(engine.sync_now().await.unwrap());
        assert_eq!(report.files_written, 1);
        assert!(backend.get_file(MAP).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_vanished_directory_is_pruned() {
        let (fs, backend, engine) = setup().await;
        write_with_mtime(&fs, MAP, b"B1", 1).await;
        write_with_mtime(&fs, "/minetest/worlds/w1/players/amy", b"p", 1).await;
        write_with_mtime(&fs, "/minetest/worlds/w2/map.sqlite", b"B2", 1).await;
        engine.sync_now().await.unwrap();
        assert_eq!(engine.list_worlds().await.unwrap(), vec!["w1", "w2"]);

        fs.remove_tree("/minetest/worlds/w1").await.unwrap();
        let report = completed(engine.sync_now().await.unwrap());
        assert_eq!(report.files_deleted, 2);
        assert_eq!(report.directories_deleted, 1);
        assert_eq!(engine.list_worlds().await.unwrap(), vec!["w2"]);
        assert!(
            backend
                .list_directories("/minetest/worlds/w1/")
                .await
                .unwrap()
                .is_empty()
        );

        let report = completed(engine.sync_now().await.unwrap());
        assert!(!report.changed());
    }

    #[tokio::test]
    async fn test_revoked_access_aborts_pass_and_recovers() {
        let (fs, backend, engine) = setup().await;
        let mut notices = engine.notices();
        for name in ["a", "b", "c"] {
            write_with_mtime(&fs, &format!("/minetest/mods/m/{name}.lua"), b"x", 1).await;
        }
        backend.revoke_after(1);

        let err = engine.sync_now().await.unwrap_err();
        assert!(err.is_access_failure());
        assert_eq!(engine.state(), EngineState::Idle);
        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.level, NoticeLevel::Warning);
        assert_eq!(
            notice.message,
            "Storage sync failed. Some changes may not be saved."
        );
        // Progress made before the failure is kept
        assert_eq!(backend.puts(), 1);
        assert_eq!(engine.tracker().len(), 1);

        backend.revoke_after(usize::MAX);
        let report = completed(engine.sync_now().await.unwrap());
        assert_eq!(report.files_written, 2);
        assert_eq!(engine.stats().mods.file_count, 3);
    }

    #[tokio::test]
    async fn test_busy_pass_is_skipped() {
        let (_fs, _backend, engine) = setup().await;
        let held = engine.inner.pass_lock.lock().await;
        assert_eq!(engine.sync_now().await.unwrap(), SyncOutcome::Skipped);
        drop(held);
        assert!(matches!(
            engine.sync_now().await.unwrap(),
            SyncOutcome::Completed(_)
        ));
    }

    #[tokio::test]
    async fn test_initial_load_restores_files_and_mtimes() {
        let backend = CountingBackend::new();
        backend
            .put_file(
                MAP,
                "stored".into(),
                FileStat {
                    mode: crate::vfs::S_IFREG | 0o644,
                    size: 0,
                    mtime_ms: 1_650_000_000_000,
                    atime_ms: 1_650_000_000_000,
                },
            )
            .await
            .unwrap();
        backend.ensure_directory("/minetest/worlds/w1").await.unwrap();
        backend.ensure_directory("/minetest/worlds/empty").await.unwrap();
        let puts = backend.puts();

        let fs = Arc::new(MemoryBackend::new());
        let engine = SyncEngine::new(SyncLayout::default(), fs.clone());
        engine.initialize_with_backend(backend.clone()).await.unwrap();

        assert_eq!(fs.read_file(MAP).await.unwrap(), b"stored");
        assert_eq!(fs.stat(MAP).await.unwrap().mtime_ms, 1_650_000_000_000);
        assert!(fs.stat("/minetest/worlds/empty").await.unwrap().is_dir());
        assert_eq!(engine.stats().worlds.file_count, 1);
        assert_eq!(engine.list_worlds().await.unwrap(), vec!["empty", "w1"]);

        let report = completed(engine.sync_now().await.unwrap());
        assert!(!report.changed());
        assert_eq!(backend.puts(), puts);
    }

    #[tokio::test]
    async fn test_clear_storage_forgets_tracker() {
        let (fs, backend, engine) = setup().await;
        write_with_mtime(&fs, MAP, b"B1", 100).await;
        write_with_mtime(&fs, "/minetest/mods/foo/init.lua", b"m", 100).await;
        engine.sync_now().await.unwrap();

        engine.clear_storage(ClearArea::Worlds).await.unwrap();
        assert!(backend.get_file(MAP).await.unwrap().is_none());
        assert!(
            backend
                .get_file("/minetest/mods/foo/init.lua")
                .await
                .unwrap()
                .is_some()
        );
        assert_eq!(engine.stats().worlds.file_count, 0);
        // The live filesystem is untouched
        assert!(fs.analyze_path(MAP).await.exists);

        let report = completed(engine.sync_now().await.unwrap());
        assert_eq!(report.files_written, 1);
        assert!(backend.get_file(MAP).await.unwrap().is_some());

        engine.force_clear_storage().await.unwrap();
        assert!(engine.tracker().is_empty());
        assert_eq!(engine.stats().total().file_count, 0);
    }

    #[tokio::test]
    async fn test_unavailable_backend_downgrades_once() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = Arc::new(MemoryBackend::new());
        let engine = SyncEngine::new(SyncLayout::default(), fs);
        let mut notices = engine.notices();

        let config = StorageConfig {
            policy: StoragePolicy::Directory,
            directory: Some(tmp.path().join("revoked")),
            ..Default::default()
        };
        let err = engine.initialize(&config).await.unwrap_err();
        assert!(matches!(err, SyncError::Unavailable(_)));
        assert_eq!(engine.policy(), StoragePolicy::NoStorage);
        assert_eq!(engine.state(), EngineState::Idle);

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.level, NoticeLevel::Warning);
        assert!(notices.try_recv().is_err());

        assert_eq!(engine.sync_now().await.unwrap(), SyncOutcome::Disabled);
        assert!(matches!(
            engine.export_area(StorageArea::Worlds).await,
            Err(SyncError::Disabled)
        ));
    }

    #[tokio::test]
    async fn test_no_storage_stats_describe_live_fs() {
        let fs = Arc::new(MemoryBackend::new());
        write_with_mtime(&fs, MAP, &[0u8; 1536], 1).await;
        let engine = SyncEngine::new(SyncLayout::default(), fs);
        let config = StorageConfig {
            policy: StoragePolicy::NoStorage,
            ..Default::default()
        };
        engine.initialize(&config).await.unwrap();
        assert_eq!(engine.stats().worlds.formatted(), "1 files (1.50 KB)");
        assert!(engine.list_worlds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let fs = Arc::new(MemoryBackend::new());
        let engine = SyncEngine::new(SyncLayout::default(), fs);
        assert!(matches!(
            engine.sync_now().await,
            Err(SyncError::NotInitialized)
        ));

        engine
            .initialize_with_backend(CountingBackend::new())
            .await
            .unwrap();
        assert!(matches!(
            engine
                .initialize_with_backend(CountingBackend::new())
                .await,
            Err(SyncError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn test_teardown_runs_final_pass() {
        let (fs, backend, engine) = setup().await;
        engine.start_periodic(Duration::from_secs(3600)).await.unwrap();
        assert!(engine.is_periodic_running());

        write_with_mtime(&fs, MAP, b"last words", 5).await;
        let report = engine.teardown().await.unwrap().unwrap();
        assert_eq!(report.files_written, 1);
        assert!(!engine.is_periodic_running());
        assert_eq!(engine.state(), EngineState::TornDown);
        assert!(backend.get_file(MAP).await.unwrap().is_some());

        assert!(matches!(engine.sync_now().await, Err(SyncError::TornDown)));
        assert!(matches!(engine.teardown().await, Err(SyncError::TornDown)));
    }

    #[tokio::test]
    async fn test_periodic_sync_persists() {
        let (fs, backend, engine) = setup().await;
        let mut stats = engine.subscribe_stats();
        stats.borrow_and_update();

        engine.start_periodic(Duration::from_millis(20)).await.unwrap();
        write_with_mtime(&fs, MAP, b"tick", 7).await;

        tokio::time::timeout(Duration::from_secs(5), stats.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.borrow().worlds.file_count, 1);
        assert!(backend.get_file(MAP).await.unwrap().is_some());
        assert!(engine.metrics().sync_count >= 1);

        engine.stop_periodic().await;
    }

    #[tokio::test]
    async fn test_notable_pass_publishes_notice() {
        let (fs, _backend, engine) = setup().await;
        let mut notices = engine.notices();
        for i in 0..3 {
            write_with_mtime(&fs, &format!("/minetest/mods/m/{i}.lua"), b"x", 1).await;
        }
        engine.sync_now().await.unwrap();

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.level, NoticeLevel::Info);
        assert!(notice.message.starts_with("Game data saved: 3 files"));
    }

    #[tokio::test]
    async fn test_change_notices() {
        let (fs, backend, engine) = setup().await;
        fs.mkdir_tree("/minetest/worlds/fresh/players").await.unwrap();

        engine
            .on_file_changed("/minetest/bin/../worlds/fresh/players")
            .await
            .unwrap();
        assert_eq!(engine.list_worlds().await.unwrap(), Vec::<String>::new());
        assert_eq!(
            backend
                .list_child_directories("/minetest/worlds/fresh")
                .await
                .unwrap(),
            vec!["/minetest/worlds/fresh/players"]
        );
        assert_eq!(engine.active_world().as_deref(), Some("fresh"));

        // Outside the synchronized areas: ignored
        engine.on_file_changed("/minetest/minetest.conf").await.unwrap();

        write_with_mtime(&fs, "/minetest/worlds/fresh/players/amy", b"p", 1).await;
        engine.sync_now().await.unwrap();
        assert_eq!(engine.list_worlds().await.unwrap(), vec!["fresh"]);

        engine.on_file_deleted("/minetest/worlds/fresh").await.unwrap();
        assert!(
            backend
                .get_file("/minetest/worlds/fresh/players/amy")
                .await
                .unwrap()
                .is_none()
        );
        assert!(engine.list_worlds().await.unwrap().is_empty());
        assert_eq!(
            engine
                .tracker()
                .last_synced("/minetest/worlds/fresh/players/amy"),
            None
        );
    }

    #[tokio::test]
    async fn test_change_listener_applies_notices() {
        let (tx, rx) = change_channel();
        let fs = Arc::new(MemoryBackend::with_notifier(tx));
        let backend = CountingBackend::new();
        let engine = SyncEngine::new(SyncLayout::default(), fs.clone());
        engine.initialize_with_backend(backend.clone()).await.unwrap();
        let listener = engine.spawn_change_listener(rx);

        fs.mkdir_tree("/minetest/worlds/w9").await.unwrap();
        for _ in 0..50 {
            if !backend
                .list_child_directories("/minetest/worlds")
                .await
                .unwrap()
                .is_empty()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(engine.list_worlds().await.unwrap(), vec!["w9"]);

        // The filesystem keeps the sender alive, so stop the task directly
        listener.abort();
    }

    #[tokio::test]
    async fn test_export_import() {
        let (fs, backend, engine) = setup().await;
        write_with_mtime(&fs, MAP, b"map-bytes", 10).await;
        write_with_mtime(&fs, "/minetest/worlds/w1/players/amy", b"hp=20", 10).await;
        engine.sync_now().await.unwrap();

        let zip = engine.export_area(StorageArea::Worlds).await.unwrap();

        // Diverge, then restore from the archive
        write_with_mtime(&fs, "/minetest/worlds/w2/map.sqlite", b"other", 11).await;
        fs.unlink(MAP).await.unwrap();
        engine.sync_now().await.unwrap();

        let restored = engine.import_area(StorageArea::Worlds, zip).await.unwrap();
        assert_eq!(restored, 2);
        assert_eq!(fs.read_file(MAP).await.unwrap(), b"map-bytes");
        assert!(!fs.analyze_path("/minetest/worlds/w2").await.exists);
        assert!(backend.get_file("/minetest/worlds/w2/map.sqlite").await.unwrap().is_none());
        assert_eq!(
            backend
                .get_file("/minetest/worlds/w1/players/amy")
                .await
                .unwrap()
                .unwrap()
                .content,
            b"hp=20"
        );
        assert_eq!(engine.stats().worlds.file_count, 2);

        let puts = backend.puts();
        let report = completed(engine.sync_now().await.unwrap());
        assert!(!report.changed());
        assert_eq!(backend.puts(), puts);
    }
}
