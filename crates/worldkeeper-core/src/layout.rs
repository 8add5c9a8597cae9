//! Synchronized subtrees.
//!
//! Only two trees are ever persisted: `<root>/worlds` and `<root>/mods`.
//! Everything outside them is invisible to the engine.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// Default game root inside the virtual filesystem.
pub const DEFAULT_ROOT: &str = "/minetest";

/// One of the two synchronized subtrees.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
    AsRefStr, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StorageArea {
    Worlds,
    Mods,
}

/// Target of a clear request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ClearArea {
    Worlds,
    Mods,
    All,
}

impl ClearArea {
    /// The areas this request covers.
    pub fn areas(self) -> Vec<StorageArea> {
        match self {
            ClearArea::Worlds => vec![StorageArea::Worlds],
            ClearArea::Mods => vec![StorageArea::Mods],
            ClearArea::All => StorageArea::iter().collect(),
        }
    }
}

impl From<StorageArea> for ClearArea {
    fn from(area: StorageArea) -> Self {
        match area {
            StorageArea::Worlds => ClearArea::Worlds,
            StorageArea::Mods => ClearArea::Mods,
        }
    }
}

/// Maps areas to their base paths under a game root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncLayout {
    root: String,
}

impl Default for SyncLayout {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

impl SyncLayout {
    /// Create a layout rooted at `root` (e.g. `/minetest`).
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let trimmed = root.trim_end_matches('/');
        Self {
            root: if trimmed.is_empty() {
                String::new()
            } else {
                trimmed.to_string()
            },
        }
    }

    pub fn root(&self) -> &str {
        if self.root.is_empty() { "/" } else { &self.root }
    }

    /// Base path of an area, e.g. `/minetest/worlds`.
    pub fn base_path(&self, area: StorageArea) -> String {
        format!("{}/{}", self.root, area.as_ref())
    }

    /// Key prefix covering everything strictly under an area's base path.
    pub fn prefix(&self, area: StorageArea) -> String {
        format!("{}/", self.base_path(area))
    }

    /// All synchronized areas with their base paths.
    pub fn areas(&self) -> Vec<(StorageArea, String)> {
        StorageArea::iter().map(|a| (a, self.base_path(a))).collect()
    }

    /// Which area a path belongs to, if any. The base path itself counts.
    pub fn area_of(&self, path: &str) -> Option<StorageArea> {
        StorageArea::iter().find(|&area| {
            let base = self.base_path(area);
            path == base || path.starts_with(&format!("{base}/"))
        })
    }
}
