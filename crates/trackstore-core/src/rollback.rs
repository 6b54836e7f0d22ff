//! Rollback manager
//!
//! Best-effort compensation for multi-step operations. Each persisted step
//! registers an undo action; on failure the actions run newest first.

use crate::error::Result;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

/// Compensating action
pub type UndoAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

struct UndoEntry {
    label: String,
    undo: UndoAction,
}

/// Outcome of a rollback sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    /// Undo actions run
    pub attempted: usize,
    /// Labels of undo actions that failed
    pub failed: Vec<String>,
}

impl RollbackReport {
    /// Check if every undo action succeeded
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// LIFO stack of undo actions
#[derive(Default)]
pub struct RollbackManager {
    stack: Mutex<Vec<UndoEntry>>,
    rolling_back: AtomicBool,
}

impl RollbackManager {
    /// Create an empty manager
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an undo action
    ///
    /// Ignored while a rollback is running. Returns whether it was recorded.
    pub fn add_rollback_operation(&self, label: impl Into<String>, undo: UndoAction) -> bool {
        let label = label.into();
        if self.rolling_back.load(Ordering::SeqCst) {
            tracing::debug!(label = %label, "undo ignored during rollback");
            return false;
        }
        self.stack.lock().push(UndoEntry { label, undo });
        true
    }

    /// Run `operation`, rolling back registered undo actions if it fails
    ///
    /// # Errors
    /// The operation's own error, after the rollback ran
    pub async fn execute_with_rollback<T, Fut>(&self, operation: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match operation.await {
            Ok(value) => {
                self.stack.lock().clear();
                Ok(value)
            }
            Err(error) => {
                tracing::warn!(%error, "operation failed, rolling back");
                let report = self.rollback().await;
                if !report.is_clean() {
                    tracing::error!(
                        attempted = report.attempted,
                        failed = ?report.failed,
                        "rollback incomplete"
                    );
                }
                Err(error)
            }
        }
    }

    /// Run every undo action newest first and empty the stack
    pub async fn rollback(&self) -> RollbackReport {
        self.rolling_back.store(true, Ordering::SeqCst);
        let mut report = RollbackReport::default();

        loop {
            let Some(entry) = self.stack.lock().pop() else { break };
            report.attempted += 1;
            if let Err(error) = (entry.undo)().await {
                tracing::error!(label = %entry.label, %error, "undo action failed");
                report.failed.push(entry.label);
            } else {
                tracing::debug!(label = %entry.label, "undo action completed");
            }
        }

        self.stack.lock().clear();
        self.rolling_back.store(false, Ordering::SeqCst);
        tracing::info!(attempted = report.attempted, failed = report.failed.len(), "rollback finished");
        report
    }

    /// Number of registered undo actions
    #[must_use]
    pub fn pending(&self) -> usize {
        self.stack.lock().len()
    }

    /// Check if a rollback is running
    #[must_use]
    pub fn is_rolling_back(&self) -> bool {
        self.rolling_back.load(Ordering::SeqCst)
    }

    /// Drop all undo actions without running them
    pub fn discard(&self) {
        self.stack.lock().clear();
    }
}

impl fmt::Debug for RollbackManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollbackManager")
            .field("pending", &self.pending())
            .field("rolling_back", &self.is_rolling_back())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use futures::FutureExt;
    use std::sync::Arc;

    fn undo(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str, fail: bool) -> UndoAction {
        let log = Arc::clone(log);
        Box::new(move || {
            async move {
                log.lock().push(label);
                if fail {
                    Err(StorageError::Validation(format!("{label} failed")))
                } else {
                    Ok(())
                }
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn rollback_runs_lifo_and_empties_stack() {
        let manager = RollbackManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let err = manager
            .execute_with_rollback(async {
                manager.add_rollback_operation("a", undo(&log, "a", false));
                manager.add_rollback_operation("b", undo(&log, "b", true));
                manager.add_rollback_operation("c", undo(&log, "c", false));
                Err::<(), _>(StorageError::Validation("boom".into()))
            })
            .await
            .unwrap_err();

        assert_eq!(err.message(), "boom");
        assert_eq!(*log.lock(), vec!["c", "b", "a"]);
        assert_eq!(manager.pending(), 0);
        assert!(!manager.is_rolling_back());
    }

    #[tokio::test]
    async fn success_discards_undo_actions() {
        let manager = RollbackManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let value = manager
            .execute_with_rollback(async {
                manager.add_rollback_operation("a", undo(&log, "a", false));
                Ok(7)
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(manager.pending(), 0);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn report_lists_failed_labels() {
        let manager = RollbackManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        manager.add_rollback_operation("keep", undo(&log, "keep", false));
        manager.add_rollback_operation("broken", undo(&log, "broken", true));

        let report = manager.rollback().await;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, vec!["broken".to_string()]);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn registrations_during_rollback_are_ignored() {
        let manager = Arc::new(RollbackManager::new());
        let accepted = Arc::new(Mutex::new(None));

        let inner = Arc::clone(&manager);
        let seen = Arc::clone(&accepted);
        manager.add_rollback_operation(
            "reentrant",
            Box::new(move || {
                async move {
                    let ok = inner.add_rollback_operation("late", Box::new(|| async { Ok::<(), StorageError>(()) }.boxed()));
                    *seen.lock() = Some(ok);
                    Ok::<(), StorageError>(())
                }
                .boxed()
            }),
        );

        let report = manager.rollback().await;
        assert_eq!(report.attempted, 1);
        assert_eq!(*accepted.lock(), Some(false));
        assert_eq!(manager.pending(), 0);
    }
}
