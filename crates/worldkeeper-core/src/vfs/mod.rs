//! Virtual filesystem abstraction.
//!
//! The game runs against a sandboxed, in-memory filesystem. The sync engine
//! only ever sees it through [`VfsOps`]:
//!
//! - [`VfsOps`] - Core trait for filesystem operations
//! - [`MemoryBackend`] - In-memory filesystem (the sandbox itself, testing)
//! - [`LocalBackend`] - A host directory presented as a virtual filesystem
//!
//! ## Design Decisions
//!
//! - **Path strings, no inodes**: absolute `/`-separated paths.
//! - **Whole-file I/O**: the sandbox API reads and writes complete files.
//! - **Name-only listings**: `readdir` does not report entry kinds.

pub mod backends;
mod error;
mod ops;
mod types;

pub use backends::{LocalBackend, MemoryBackend};
pub use error::{VfsError, VfsResult};
pub use ops::VfsOps;
pub use types::{
    FileStat, PathInfo, S_IFDIR, S_IFMT, S_IFREG, ms_to_system_time, now_ms, system_time_to_ms,
};

/// Join a directory path and an entry name with `/`.
pub fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Parent directory of a path, or `None` for `/` and bare names.
pub fn parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    if idx == 0 {
        if trimmed.len() > 1 { Some("/") } else { None }
    } else {
        Some(&trimmed[..idx])
    }
}

/// Normalize a path reported by the game: collapse `//` and `.`, resolve `..`.
///
/// The result is always absolute. `..` at the root stays at the root.
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}
