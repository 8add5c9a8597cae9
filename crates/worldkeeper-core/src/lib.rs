//! # worldkeeper-core
//!
//! Persistence for a game's sandboxed virtual filesystem.
//!
//! The game writes its worlds and mods into an in-memory filesystem that
//! vanishes when the process ends. The [`SyncEngine`] mirrors the two
//! synchronized subtrees into durable storage and restores them on the next
//! launch:
//!
//! - Initial load: stored files are written back into the filesystem
//! - Incremental passes: walk, persist files whose modify-time changed,
//!   delete stored files that vanished
//! - Two interchangeable backends behind [`StorageBackend`]: an embedded
//!   SQLite database and a granted host directory

pub mod archive;
pub mod backend;
pub mod config;
pub mod db;
pub mod engine;
pub mod layout;
pub mod notice;
pub mod report;
pub mod stats;
pub mod tracker;
pub mod vfs;
pub mod walker;
pub mod watch;

pub use archive::{ArchiveEntry, ArchiveError};
pub use backend::{
    BackendError, BackendKind, BackendResult, DirectoryBackend, FileContent, SqliteBackend,
    StorageBackend,
};
pub use config::{ConfigError, StorageConfig, StoragePolicy};
pub use db::{ContentDb, FileRecord};
pub use engine::{EngineState, SyncEngine, SyncError, SyncOutcome};
pub use layout::{ClearArea, StorageArea, SyncLayout};
pub use notice::{ChangeNotice, Notice, NoticeBus, NoticeLevel, change_channel};
pub use report::{SyncMetrics, SyncReport};
pub use stats::{AreaStats, FormattedStats, StorageStats, format_size};
pub use tracker::ChangeTracker;
pub use vfs::{FileStat, LocalBackend, MemoryBackend, VfsError, VfsOps, VfsResult};
pub use walker::{WalkEntry, walk};
pub use watch::{WatchError, WatcherHandle, watch_local};
