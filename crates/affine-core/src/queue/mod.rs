//! Queue module: FIFO work queue, wait signal, and lifecycle state.
//!
//! # 構成
//! - **WorkQueue**: 複数 producer / 単一 consumer の FIFO キュー
//! - **WaitSignal**: consumer が空キューで待つための counting semaphore
//! - **Consuming**: close 済みかつ空になるまで item を返す blocking iterator
//! - **QueueState**: OpenEmpty / OpenHasWork / ClosingHasWork / ClosedDrained

mod consume;
mod item;
mod signal;
mod state;

pub use consume::Consuming;
pub use item::WorkItem;
pub use signal::WaitSignal;
pub use state::QueueState;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::observability::QueueStats;

/// Default upper bound on a single consumer wait.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(50);

/// Items and closure marker share one lock so that "closed and empty" can
/// never be observed while an accepted item is still on its way in.
struct Pending<T> {
    items: VecDeque<WorkItem<T>>,

    /// Number of `complete_adding` calls. Only `> 0` matters for behavior.
    completion_requests: u64,
}

/// Multi-producer / single-consumer FIFO work queue.
///
/// Design:
/// - `try_add` / `complete_adding` may be called from any thread, including
///   from inside an item running on the consumer thread.
/// - `consume` is driven by exactly one consumer.
/// - The queue never fails; a closed queue answers `try_add` with `false`.
pub struct WorkQueue<T> {
    pending: Mutex<Pending<T>>,
    signal: WaitSignal,
    wait_timeout: Duration,

    admitted: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self::with_wait_timeout(DEFAULT_WAIT_TIMEOUT)
    }

    /// Create a queue whose consumer re-checks at least every `wait_timeout`.
    pub fn with_wait_timeout(wait_timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(Pending {
                items: VecDeque::new(),
                completion_requests: 0,
            }),
            signal: WaitSignal::new(),
            wait_timeout,
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// Append `payload` unless adding has been completed.
    ///
    /// Returns `false` (and drops nothing that was accepted) when the queue is
    /// closed. Callers must treat `false` as "submission refused".
    pub fn try_add(&self, payload: T, propagate_failure: bool) -> bool {
        {
            let mut pending = self.pending.lock();
            if pending.completion_requests > 0 {
                drop(pending);
                self.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("work queue closed; admission rejected");
                return false;
            }
            pending
                .items
                .push_back(WorkItem::new(payload, propagate_failure));
        }

        self.admitted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(propagate_failure, "work item admitted");
        self.signal.release();
        true
    }

    /// Close the queue for admission. Idempotent, callable from any thread.
    pub fn complete_adding(&self) {
        let requests = {
            let mut pending = self.pending.lock();
            pending.completion_requests += 1;
            pending.completion_requests
        };
        if requests == 1 {
            tracing::debug!("work queue completed for adding");
        }
        self.signal.release();
    }

    /// Blocking iterator that drains the queue until it is closed and empty.
    pub fn consume(&self) -> Consuming<'_, T> {
        Consuming::new(self)
    }

    /// Remove every pending item without delivering it.
    ///
    /// Teardown for a queue whose consumer stopped early: the caller owns the
    /// returned items and decides when they are dropped.
    pub fn take_pending(&self) -> Vec<WorkItem<T>> {
        let taken: Vec<_> = self.pending.lock().items.drain(..).collect();
        if !taken.is_empty() {
            tracing::debug!(discarded = taken.len(), "pending work items taken without delivery");
        }
        taken
    }

    pub fn is_adding_completed(&self) -> bool {
        self.pending.lock().completion_requests > 0
    }

    pub fn len(&self) -> usize {
        self.pending.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().items.is_empty()
    }

    pub fn state(&self) -> QueueState {
        let pending = self.pending.lock();
        QueueState::from_parts(pending.completion_requests > 0, pending.items.len())
    }

    pub fn stats(&self) -> QueueStats {
        let (state, pending, completion_requests) = {
            let pending = self.pending.lock();
            (
                QueueState::from_parts(pending.completion_requests > 0, pending.items.len()),
                pending.items.len(),
                pending.completion_requests,
            )
        };
        QueueStats {
            state,
            pending,
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            completion_requests,
        }
    }
}

impl<T: Clone> WorkQueue<T> {
    /// Copy of the payloads currently pending, head first.
    ///
    /// Diagnostic only: the queue is not modified and the copy may be stale
    /// as soon as it is returned.
    pub fn snapshot(&self) -> Vec<T> {
        self.pending
            .lock()
            .items
            .iter()
            .map(|item| item.payload.clone())
            .collect()
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for WorkQueue<T> {
    fn drop(&mut self) {
        let undelivered = self.pending.get_mut().items.len();
        if undelivered > 0 {
            tracing::debug!(undelivered, "work queue dropped with undelivered items");
        }
    }
}
