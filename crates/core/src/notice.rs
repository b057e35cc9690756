//! Single user-facing message with auto-expiry.

use parking_lot::RwLock;
use std::time::Duration;
use tokio::time::Instant;

/// Severity of a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// A message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

/// Holds the current notice. Posting replaces the previous one; a notice
/// disappears once its lifetime has elapsed.
#[derive(Debug)]
pub struct NoticeBoard {
    ttl: Duration,
    current: RwLock<Option<(Notice, Instant)>>,
}

impl NoticeBoard {
    /// Board whose notices live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            current: RwLock::new(None),
        }
    }

    /// Replace the current notice.
    pub fn post(&self, level: NoticeLevel, text: impl Into<String>) {
        let notice = Notice {
            level,
            text: text.into(),
        };
        *self.current.write() = Some((notice, Instant::now() + self.ttl));
    }

    pub fn info(&self, text: impl Into<String>) {
        self.post(NoticeLevel::Info, text);
    }

    pub fn success(&self, text: impl Into<String>) {
        self.post(NoticeLevel::Success, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.post(NoticeLevel::Error, text);
    }

    /// Current notice, if it has not expired.
    pub fn current(&self) -> Option<Notice> {
        let mut slot = self.current.write();
        match slot.as_ref() {
            Some((_, expires_at)) if Instant::now() >= *expires_at => {
                *slot = None;
                None
            }
            Some((notice, _)) => Some(notice.clone()),
            None => None,
        }
    }

    /// Drop the current notice.
    pub fn clear(&self) {
        *self.current.write() = None;
    }
}

impl Default for NoticeBoard {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
