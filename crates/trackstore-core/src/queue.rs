//! Transaction queue
//!
//! Holds work submitted before the database is ready and drains it one
//! transaction at a time, highest priority first, FIFO within a priority.
//! A failed transaction is retried from the back of its priority band with a
//! linearly growing delay until its attempt budget runs out.
//!
//! Draining runs on a spawned tokio task, so enqueueing must happen inside a
//! runtime.

use crate::config::StoreConfig;
use crate::error::{Result, StorageError};
use crate::notify::{Notice, Notifier};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Priority used when the caller has no preference
pub const DEFAULT_PRIORITY: i32 = 1;

/// Re-runnable unit of queued work
pub type QueuedOperation = Box<dyn FnMut() -> BoxFuture<'static, Result<()>> + Send>;

struct QueuedTransaction {
    sequence: u64,
    priority: i32,
    enqueued_at: DateTime<Utc>,
    retry_count: u32,
    operation: QueuedOperation,
    completion: Option<oneshot::Sender<Result<()>>>,
}

impl QueuedTransaction {
    fn complete(&mut self, outcome: Result<()>) {
        if let Some(sender) = self.completion.take() {
            let _ = sender.send(outcome);
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Transactions accepted
    pub enqueued: usize,
    /// Transactions that eventually succeeded
    pub completed: usize,
    /// Failed attempts that were requeued
    pub retried: usize,
    /// Transactions dropped after their last attempt
    pub dropped: usize,
    /// Transactions waiting
    pub pending: usize,
}

struct QueueState {
    pending: Vec<QueuedTransaction>,
    initialized: bool,
    draining: bool,
    generation: u64,
    next_sequence: u64,
    stats: QueueStats,
}

impl QueueState {
    /// Insert keeping `(priority desc, sequence asc)` order
    fn insert(&mut self, mut tx: QueuedTransaction) {
        tx.sequence = self.next_sequence;
        self.next_sequence += 1;
        let index = self
            .pending
            .iter()
            .position(|queued| queued.priority < tx.priority)
            .unwrap_or(self.pending.len());
        self.pending.insert(index, tx);
        self.stats.pending = self.pending.len();
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
    exec_lock: tokio::sync::Mutex<()>,
    max_retries: u32,
    retry_delay: Duration,
    notifier: Arc<dyn Notifier>,
}

/// Handle resolving to the final outcome of a queued transaction
#[derive(Debug)]
pub struct QueueTicket {
    receiver: oneshot::Receiver<Result<()>>,
}

impl QueueTicket {
    /// Wait for the transaction to succeed, be dropped, or be cleared
    ///
    /// # Errors
    /// - [`StorageError::RetriesExhausted`] if every attempt failed
    /// - [`StorageError::QueueCleared`] if the queue was cleared first
    pub async fn wait(self) -> Result<()> {
        self.receiver.await.unwrap_or(Err(StorageError::QueueCleared))
    }
}

/// Priority queue of pending transactions
///
/// Cloning is cheap and shares the queue.
#[derive(Clone)]
pub struct TransactionQueue {
    inner: Arc<QueueInner>,
}

impl TransactionQueue {
    /// Create an uninitialized queue
    #[must_use]
    pub fn new(max_retries: u32, retry_delay: Duration, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    pending: Vec::new(),
                    initialized: false,
                    draining: false,
                    generation: 0,
                    next_sequence: 0,
                    stats: QueueStats::default(),
                }),
                exec_lock: tokio::sync::Mutex::new(()),
                max_retries: max_retries.max(1),
                retry_delay,
                notifier,
            }),
        }
    }

    /// Create a queue from configuration
    #[must_use]
    pub fn from_config(config: &StoreConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self::new(config.max_retries, config.retry_delay(), notifier)
    }

    /// Add a transaction
    ///
    /// Draining starts right away when the queue is initialized and idle.
    pub fn enqueue_transaction(&self, operation: QueuedOperation, priority: i32) -> QueueTicket {
        let (sender, receiver) = oneshot::channel();
        let tx = QueuedTransaction {
            sequence: 0,
            priority,
            enqueued_at: Utc::now(),
            retry_count: 0,
            operation,
            completion: Some(sender),
        };

        let start = {
            let mut state = self.inner.state.lock();
            state.insert(tx);
            state.stats.enqueued += 1;
            tracing::debug!(priority, pending = state.pending.len(), "transaction queued");
            Self::claim_drain(&mut state)
        };
        if let Some(generation) = start {
            self.spawn_drain(generation);
        }

        QueueTicket { receiver }
    }

    /// Queue a value-returning operation and await its result
    ///
    /// The operation is queued immediately; the returned future only waits.
    pub fn submit<T, F, Fut>(&self, priority: i32, mut op: F) -> impl Future<Output = Result<T>> + Send
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let slot: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
        let writer = Arc::clone(&slot);
        let ticket = self.enqueue_transaction(
            Box::new(move || {
                let attempt = op();
                let writer = Arc::clone(&writer);
                async move {
                    let value = attempt.await?;
                    *writer.lock() = Some(value);
                    Ok::<(), StorageError>(())
                }
                .boxed()
            }),
            priority,
        );

        async move {
            ticket.wait().await?;
            slot.lock().take().ok_or(StorageError::QueueCleared)
        }
    }

    /// Mark the database ready (starts draining) or not ready (pauses after
    /// the current transaction)
    pub fn set_initialized(&self, initialized: bool) {
        let start = {
            let mut state = self.inner.state.lock();
            state.initialized = initialized;
            Self::claim_drain(&mut state)
        };
        if let Some(generation) = start {
            self.spawn_drain(generation);
        }
    }

    /// Drop all pending work
    ///
    /// Tickets of dropped transactions resolve to [`StorageError::QueueCleared`].
    /// A drain loop in flight exits without running anything else.
    pub fn clear_queue(&self) -> usize {
        self.fail_pending(&StorageError::QueueCleared)
    }

    /// Drop all pending work, resolving every ticket with `error`
    ///
    /// Used when the database will not become ready, so waiters see the
    /// reason instead of a bare cancellation.
    pub fn fail_pending(&self, error: &StorageError) -> usize {
        let dropped = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.draining = false;
            state.stats.pending = 0;
            std::mem::take(&mut state.pending)
        };
        let count = dropped.len();
        for mut tx in dropped {
            tx.complete(Err(error.clone()));
        }
        if count > 0 {
            tracing::info!(count, %error, "pending transactions dropped");
        }
        count
    }

    /// Check if the database is marked ready
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.state.lock().initialized
    }

    /// Check if a drain loop is running
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.inner.state.lock().draining
    }

    /// Number of waiting transactions
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Check if nothing is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get queue statistics
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.inner.state.lock().stats
    }

    fn claim_drain(state: &mut QueueState) -> Option<u64> {
        if state.initialized && !state.draining && !state.pending.is_empty() {
            state.draining = true;
            Some(state.generation)
        } else {
            None
        }
    }

    fn spawn_drain(&self, generation: u64) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(drain(inner, generation));
    }
}

impl fmt::Debug for TransactionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TransactionQueue")
            .field("pending", &state.pending.len())
            .field("initialized", &state.initialized)
            .field("draining", &state.draining)
            .finish_non_exhaustive()
    }
}

async fn drain(inner: Arc<QueueInner>, generation: u64) {
    loop {
        let mut tx = {
            let mut state = inner.state.lock();
            if state.generation != generation {
                return;
            }
            if !state.initialized || state.pending.is_empty() {
                state.draining = false;
                return;
            }
            let tx = state.pending.remove(0);
            state.stats.pending = state.pending.len();
            tx
        };

        let outcome = {
            let _running = inner.exec_lock.lock().await;
            (tx.operation)().await
        };

        let error = match outcome {
            Ok(()) => {
                inner.state.lock().stats.completed += 1;
                tx.complete(Ok(()));
                continue;
            }
            Err(error) => error,
        };

        tx.retry_count += 1;
        let attempt = tx.retry_count;
        let priority = tx.priority;
        let waited_ms = (Utc::now() - tx.enqueued_at).num_milliseconds();

        let verdict = {
            let mut state = inner.state.lock();
            if state.generation != generation {
                Verdict::Cleared(tx)
            } else if attempt < inner.max_retries {
                state.stats.retried += 1;
                state.insert(tx);
                Verdict::Retry
            } else {
                state.stats.dropped += 1;
                Verdict::Exhausted(tx)
            }
        };

        match verdict {
            Verdict::Cleared(mut tx) => {
                tx.complete(Err(error));
                return;
            }
            Verdict::Retry => {
                let delay = inner.retry_delay * attempt;
                tracing::warn!(
                    attempt,
                    priority,
                    waited_ms,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    %error,
                    "queued transaction failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Verdict::Exhausted(mut tx) => {
                tracing::error!(
                    attempts = attempt,
                    priority,
                    sequence = tx.sequence,
                    waited_ms,
                    %error,
                    "queued transaction dropped"
                );
                inner.notifier.notify(Notice::error(
                    "Transaction Failed",
                    format!("An operation failed after {attempt} attempts: {}", error.message()),
                ));
                tx.complete(Err(StorageError::RetriesExhausted {
                    attempts: attempt,
                    last_error: Box::new(error),
                }));
            }
        }
    }
}

enum Verdict {
    Cleared(QueuedTransaction),
    Retry,
    Exhausted(QueuedTransaction),
}
