//! Storage statistics.
//!
//! Derived numbers for display only. They are always rebuilt by re-querying
//! the backend, never maintained incrementally.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::layout::StorageArea;

/// File count and total size for one area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaStats {
    pub file_count: u64,
    pub total_size_bytes: u64,
}

impl AreaStats {
    pub fn new(file_count: u64, total_size_bytes: u64) -> Self {
        Self {
            file_count,
            total_size_bytes,
        }
    }

    /// Human-readable form: `"3 files (1.50 KB)"`.
    pub fn formatted(&self) -> String {
        format!(
            "{} files ({})",
            self.file_count,
            format_size(self.total_size_bytes)
        )
    }
}

impl std::ops::Add for AreaStats {
    type Output = AreaStats;

    fn add(self, rhs: AreaStats) -> AreaStats {
        AreaStats {
            file_count: self.file_count + rhs.file_count,
            total_size_bytes: self.total_size_bytes + rhs.total_size_bytes,
        }
    }
}

/// Stats for both synchronized areas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub worlds: AreaStats,
    pub mods: AreaStats,
    /// When the numbers were last recomputed.
    #[serde(skip)]
    pub last_update: Option<SystemTime>,
}

impl StorageStats {
    pub fn area(&self, area: StorageArea) -> AreaStats {
        match area {
            StorageArea::Worlds => self.worlds,
            StorageArea::Mods => self.mods,
        }
    }

    pub fn set_area(&mut self, area: StorageArea, stats: AreaStats) {
        match area {
            StorageArea::Worlds => self.worlds = stats,
            StorageArea::Mods => self.mods = stats,
        }
    }

    pub fn total(&self) -> AreaStats {
        self.worlds + self.mods
    }

    pub fn formatted(&self) -> FormattedStats {
        FormattedStats {
            worlds: self.worlds.formatted(),
            mods: self.mods.formatted(),
            total: self.total().formatted(),
        }
    }
}

/// Display strings for [`StorageStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormattedStats {
    pub worlds: String,
    pub mods: String,
    pub total: String,
}

const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

/// Format a byte count with 1024-based units and two decimals.
///
/// The unit is the largest one where the value is at least 1. Plain bytes
/// have no fractional part and are printed as an integer.
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} Bytes")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}
