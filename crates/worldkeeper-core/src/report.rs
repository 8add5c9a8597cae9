//! Per-pass reports and lifetime counters.

use serde::Serialize;
use std::time::{Duration, SystemTime};

use crate::layout::StorageArea;
use crate::stats::format_size;

/// Passes that wrote at least this many files are announced to the user.
pub const NOTABLE_WRITE_COUNT: u64 = 3;

/// What one sync pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Files seen by the walk.
    pub files_processed: u64,
    /// Files persisted because their modify-time changed.
    pub files_written: u64,
    /// Files removed from storage because they vanished from the filesystem.
    pub files_deleted: u64,
    /// Directory records removed because the directory vanished.
    pub directories_deleted: u64,
    pub bytes_written: u64,
    pub worlds_written: u64,
    pub mods_written: u64,
    /// Paths skipped after a per-path failure; retried next pass.
    pub files_failed: u64,
    pub duration: Duration,
}

impl SyncReport {
    pub(crate) fn record_write(&mut self, area: StorageArea, bytes: u64) {
        self.files_written += 1;
        self.bytes_written += bytes;
        match area {
            StorageArea::Worlds => self.worlds_written += 1,
            StorageArea::Mods => self.mods_written += 1,
        }
    }

    /// Whether storage was modified.
    pub fn changed(&self) -> bool {
        self.files_written > 0 || self.files_deleted > 0 || self.directories_deleted > 0
    }

    /// Whether the pass is worth a user-facing notice.
    pub fn is_notable(&self) -> bool {
        self.files_written >= NOTABLE_WRITE_COUNT || self.files_deleted > 0
    }

    /// One-line summary for logs and notices.
    pub fn summary(&self) -> String {
        format!(
            "{}/{} files synced ({}), {} files deleted",
            self.files_written,
            self.files_processed,
            format_size(self.bytes_written),
            self.files_deleted
        )
    }
}

/// Counters accumulated over the engine's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncMetrics {
    pub sync_count: u64,
    pub total_duration: Duration,
    pub last_sync: Option<SystemTime>,
}

impl SyncMetrics {
    pub(crate) fn record(&mut self, report: &SyncReport) {
        self.sync_count += 1;
        self.total_duration += report.duration;
        self.last_sync = Some(SystemTime::now());
    }

    /// Mean pass duration, zero before the first pass.
    pub fn average_duration(&self) -> Duration {
        match u32::try_from(self.sync_count) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_duration / n,
            Err(_) => Duration::from_secs_f64(
                self.total_duration.as_secs_f64() / self.sync_count as f64,
            ),
        }
    }
}
