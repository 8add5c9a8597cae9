//! Notifications flowing into and out of the sync engine.
//!
//! Inbound: [`ChangeNotice`] is what the running game reports on every file
//! write or delete. Outbound: [`Notice`] is a non-blocking, user-facing
//! message (the UI decides how to render it).

use tokio::sync::{broadcast, mpsc};

/// Capacity of the inbound change channel.
pub const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Capacity of the outbound notice channel.
pub const NOTICE_CHANNEL_CAPACITY: usize = 64;

/// A file-change report from the game process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeNotice {
    /// A file or directory was written or created.
    Changed(String),
    /// A file or directory was deleted.
    Deleted(String),
}

impl ChangeNotice {
    /// The path the notice refers to.
    pub fn path(&self) -> &str {
        match self {
            ChangeNotice::Changed(p) | ChangeNotice::Deleted(p) => p,
        }
    }
}

/// Create a bounded channel for change notices.
pub fn change_channel() -> (mpsc::Sender<ChangeNotice>, mpsc::Receiver<ChangeNotice>) {
    mpsc::channel(CHANGE_CHANNEL_CAPACITY)
}

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A user-facing message published by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Broadcast bus for outbound notices.
///
/// Publishing never blocks and never fails: with no subscribers the notice
/// is dropped.
#[derive(Debug, Clone)]
pub struct NoticeBus {
    tx: broadcast::Sender<Notice>,
}

impl Default for NoticeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NoticeBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, notice: Notice) {
        let _ = self.tx.send(notice);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notice_bus_delivers_to_subscribers() {
        let bus = NoticeBus::new();
        bus.publish(Notice::info("dropped, nobody listening"));

        let mut rx = bus.subscribe();
        bus.publish(Notice::warning("storage sync failed"));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.level, NoticeLevel::Warning);
        assert_eq!(got.message, "storage sync failed");
    }

    #[test]
    fn test_change_notice_path() {
        assert_eq!(ChangeNotice::Deleted("/a/b".into()).path(), "/a/b");
    }
}
