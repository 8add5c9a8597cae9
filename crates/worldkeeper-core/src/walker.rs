//! Filesystem walker.
//!
//! The sandboxed filesystem's `readdir` reports names only, so each entry is
//! classified by probing: try to list it as a directory, and if that fails,
//! `stat` it as a file. Entries that fail both are skipped.

use crate::vfs::{self, FileStat, VfsOps};

/// One entry found by a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEntry {
    Directory(String),
    File { path: String, stat: FileStat },
}

impl WalkEntry {
    pub fn path(&self) -> &str {
        match self {
            WalkEntry::Directory(path) | WalkEntry::File { path, .. } => path,
        }
    }
}

/// Walk everything under `root`, depth-first, directories before their
/// contents. The root itself is not reported.
///
/// A root that cannot be listed yields nothing; a subtree that does not
/// exist is simply "nothing to sync".
pub async fn walk(fs: &dyn VfsOps, root: &str) -> Vec<WalkEntry> {
    let mut out = Vec::new();
    let mut stack = match fs.readdir(root).await {
        Ok(names) => vec![(root.to_string(), names.into_iter())],
        Err(e) => {
            tracing::debug!(path = %root, error = %e, "walk root not listable");
            return out;
        }
    };

    while let Some((dir, names)) = stack.last_mut() {
        let Some(name) = names.next() else {
            stack.pop();
            continue;
        };
        if name == "." || name == ".." {
            continue;
        }
        let path = vfs::join(dir, &name);

        match fs.readdir(&path).await {
            Ok(children) => {
                out.push(WalkEntry::Directory(path.clone()));
                stack.push((path, children.into_iter()));
            }
            Err(_) => match fs.stat(&path).await {
                Ok(stat) if stat.is_dir() => {
                    // Listed as a directory but unreadable; keep the marker
                    out.push(WalkEntry::Directory(path));
                }
                Ok(stat) => out.push(WalkEntry::File { path, stat }),
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "skipping unreadable entry");
                }
            },
        }
    }
    out
}
