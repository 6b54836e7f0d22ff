//! User-facing notices
//!
//! The storage layer raises a [`Notice`] whenever something happens that the
//! person using the dashboard should know about: a failed queued operation, a
//! database changed by another window, a failed clear. The presentation layer
//! decides how to show them.

use crate::error::StorageError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Notice severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    /// Informational
    Info,
    /// Degraded but recoverable
    Warning,
    /// Operation failed
    Error,
}

/// A short title and message for the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Severity
    pub level: NoticeLevel,
    /// Short title
    pub title: String,
    /// Message body
    pub message: String,
}

impl Notice {
    /// Informational notice
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, title, message)
    }

    /// Warning notice
    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, title, message)
    }

    /// Error notice
    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, title, message)
    }

    /// Error notice for a storage failure, asking for a reload when the
    /// storage state is unknown
    #[must_use]
    pub fn from_error(error: &StorageError) -> Self {
        let message = if error.requires_reload() {
            format!("{} Please reload the page.", error.message())
        } else {
            error.message()
        };
        Self::error(error.notice_title(), message)
    }

    fn new(level: NoticeLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Sink for user-facing notices
pub trait Notifier: Send + Sync {
    /// Deliver a notice
    fn notify(&self, notice: Notice);
}

/// Renders notices as tracing events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info => {
                tracing::info!(title = %notice.title, "{}", notice.message);
            }
            NoticeLevel::Warning => {
                tracing::warn!(title = %notice.title, "{}", notice.message);
            }
            NoticeLevel::Error => {
                tracing::error!(title = %notice.title, "{}", notice.message);
            }
        }
    }
}

/// Collects notices until drained
#[derive(Debug, Default)]
pub struct NoticeBuffer {
    notices: Mutex<Vec<Notice>>,
}

impl NoticeBuffer {
    /// Create an empty buffer
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every buffered notice
    pub fn drain(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.notices.lock())
    }

    /// Copy of buffered notices
    #[must_use]
    pub fn snapshot(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    /// Number of buffered notices
    #[must_use]
    pub fn len(&self) -> usize {
        self.notices.lock().len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notices.lock().is_empty()
    }
}

impl Notifier for NoticeBuffer {
    fn notify(&self, notice: Notice) {
        tracing::debug!(title = %notice.title, level = ?notice.level, "notice buffered");
        self.notices.lock().push(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_collects_and_drains() {
        let buffer = NoticeBuffer::new();
        buffer.notify(Notice::error("Clear Failed", "reload"));
        buffer.notify(Notice::info("Database Cleared", "done"));

        assert_eq!(buffer.len(), 2);
        let notices = buffer.drain();
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert_eq!(notices[1].title, "Database Cleared");
        assert!(buffer.is_empty());
    }

    #[test]
    fn error_notice_asks_for_reload_when_needed() {
        let blocked = Notice::from_error(&StorageError::Blocked {
            name: "db".into(),
            attempts: 3,
        });
        assert!(blocked.message.ends_with("Please reload the page."));

        let invalid = Notice::from_error(&StorageError::Validation("bad".into()));
        assert_eq!(invalid.message, "bad");
        assert_eq!(invalid.title, "Invalid Data");
    }
}
