//! Core VFS types.
//!
//! These mirror what the sandboxed game filesystem reports: a stat record
//! with mode bits and millisecond timestamps, and an existence check.

use serde::{Deserialize, Serialize};
use std::os::unix::fs::PermissionsExt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// File type mask in `mode`.
pub const S_IFMT: u32 = 0o170_000;
/// Directory bit pattern.
pub const S_IFDIR: u32 = 0o040_000;
/// Regular file bit pattern.
pub const S_IFREG: u32 = 0o100_000;

/// Stat record for a path in the virtual filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// Unix mode bits, including the file type.
    pub mode: u32,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, milliseconds since the epoch.
    pub mtime_ms: i64,
    /// Last access time, milliseconds since the epoch.
    pub atime_ms: i64,
}

impl FileStat {
    /// Stat for a regular file written now.
    pub fn file(size: u64, perm: u32) -> Self {
        let now = now_ms();
        Self {
            mode: S_IFREG | (perm & 0o7777),
            size,
            mtime_ms: now,
            atime_ms: now,
        }
    }

    /// Stat for a directory created now.
    pub fn directory(perm: u32) -> Self {
        let now = now_ms();
        Self {
            mode: S_IFDIR | (perm & 0o7777),
            size: 0,
            mtime_ms: now,
            atime_ms: now,
        }
    }

    /// Returns true if the mode describes a directory.
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Returns true if the mode describes a regular file.
    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    /// Permission bits only.
    pub fn perm(&self) -> u32 {
        self.mode & 0o7777
    }
}

impl From<&std::fs::Metadata> for FileStat {
    fn from(meta: &std::fs::Metadata) -> Self {
        let kind = if meta.is_dir() { S_IFDIR } else { S_IFREG };
        Self {
            mode: kind | (meta.permissions().mode() & 0o7777),
            size: meta.len(),
            mtime_ms: meta.modified().map(system_time_to_ms).unwrap_or(0),
            atime_ms: meta.accessed().map(system_time_to_ms).unwrap_or(0),
        }
    }
}

/// Result of `analyze_path`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PathInfo {
    /// Whether anything exists at the path.
    pub exists: bool,
}

/// Current wall clock in epoch milliseconds.
pub fn now_ms() -> i64 {
    system_time_to_ms(SystemTime::now())
}

/// Convert a `SystemTime` to epoch milliseconds (negative before 1970).
pub fn system_time_to_ms(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// Convert epoch milliseconds back to a `SystemTime`.
pub fn ms_to_system_time(ms: i64) -> SystemTime {
    if ms >= 0 {
        UNIX_EPOCH + Duration::from_millis(ms as u64)
    } else {
        UNIX_EPOCH - Duration::from_millis(ms.unsigned_abs())
    }
}
