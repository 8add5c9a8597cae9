//! Host directory watcher.
//!
//! When a host directory is mounted as the virtual filesystem
//! ([`LocalBackend`](crate::vfs::LocalBackend)), there is no game hook to
//! report writes. This watcher turns `notify` events into [`ChangeNotice`]s
//! so the engine sees the same stream it would get from the game.

use std::path::PathBuf;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::notice::ChangeNotice;
use crate::vfs::LocalBackend;

/// Error starting a watcher.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Handle to a running watcher. Dropping it stops the watch.
pub struct WatcherHandle {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl WatcherHandle {
    /// The watched host directory.
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Stop the watcher.
    pub fn stop(self) {
        tracing::info!(path = %self.root.display(), "host watcher stopped");
    }
}

/// Watch `fs.root()` recursively and forward events on `tx` as virtual paths.
pub fn watch_local(
    fs: &LocalBackend,
    tx: mpsc::Sender<ChangeNotice>,
) -> Result<WatcherHandle, WatchError> {
    let mapper = fs.clone();
    let mut watcher = RecommendedWatcher::new(
        move |result: Result<Event, notify::Error>| {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "host watcher error");
                    return;
                }
            };
            let deleted = match event.kind {
                EventKind::Create(_) | EventKind::Modify(_) => false,
                EventKind::Remove(_) => true,
                _ => return,
            };
            for path in event.paths {
                let Some(virtual_path) = mapper.virtual_path(&path) else {
                    continue;
                };
                let notice = if deleted {
                    ChangeNotice::Deleted(virtual_path)
                } else {
                    ChangeNotice::Changed(virtual_path)
                };
                // Best-effort: the periodic walk is the source of truth
                let _ = tx.try_send(notice);
            }
        },
        notify::Config::default().with_poll_interval(Duration::from_millis(500)),
    )?;

    watcher.watch(fs.root(), RecursiveMode::Recursive)?;
    tracing::info!(path = %fs.root().display(), "host watcher started");

    Ok(WatcherHandle {
        _watcher: watcher,
        root: fs.root().to_path_buf(),
    })
}
