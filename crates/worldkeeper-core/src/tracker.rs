//! Change tracker: last-synchronized modify-time per path.
//!
//! Process-local and never persisted. It starts empty on every launch and is
//! seeded by the initial load, so the first pass only writes what changed
//! since the last session.

use dashmap::DashMap;

/// Map of path → modify-time (epoch ms) at last successful sync.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    synced: DashMap<String, i64>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful sync of `path` at `mtime_ms`.
    pub fn record_synced(&self, path: &str, mtime_ms: i64) {
        self.synced.insert(path.to_string(), mtime_ms);
    }

    /// Modify-time recorded at the last sync, if any.
    pub fn last_synced(&self, path: &str) -> Option<i64> {
        self.synced.get(path).map(|v| *v)
    }

    /// Whether `path` needs syncing. Equality of modify-time is the sole
    /// "unchanged" criterion; content is never compared.
    pub fn is_stale(&self, path: &str, mtime_ms: i64) -> bool {
        self.last_synced(path) != Some(mtime_ms)
    }

    pub fn forget(&self, path: &str) {
        self.synced.remove(path);
    }

    /// Forget every entry whose path starts with `prefix`.
    pub fn forget_prefix(&self, prefix: &str) -> usize {
        let before = self.synced.len();
        self.synced.retain(|path, _| !path.starts_with(prefix));
        before - self.synced.len()
    }

    pub fn clear(&self) {
        self.synced.clear();
    }

    pub fn len(&self) -> usize {
        self.synced.len()
    }

    pub fn is_empty(&self) -> bool {
        self.synced.is_empty()
    }
}
