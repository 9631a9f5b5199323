//! Jobs run by the context thread.
//!
//! # 学習ポイント
//! - `std::task::Wake` による Waker 実装（Arc<Task> をそのまま Waker にする）
//! - wake → `try_add` で同じキューに再投入（thread-affine な継続）
//! - 重複 wake は `scheduled` フラグでまとめる

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Wake, Waker};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use ulid::Ulid;

use super::Shared;
use crate::error::ContextError;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Unit of work executed on the context thread.
///
/// Object-safe so heterogeneous jobs share one `WorkQueue<Arc<dyn Runnable>>`.
pub trait Runnable: Send + Sync {
    /// Run once on the context thread. A panic is a job failure.
    fn run(self: Arc<Self>);

    /// Diagnostic description for queue snapshots.
    fn describe(&self) -> JobInfo;
}

/// What kind of submission produced a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// The future passed to `AsyncContext::run`.
    Entry,

    /// A future submitted with `ContextHandle::spawn`.
    Spawned,

    /// A callback submitted with `ContextHandle::post`.
    Callback,
}

/// Serializable view of a queued job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: Ulid,
    pub kind: JobKind,
    pub scheduled_at: DateTime<Utc>,
}

/// A future polled on the context thread.
pub(crate) struct Task {
    id: Ulid,
    kind: JobKind,
    future: Mutex<Option<BoxFuture>>,
    shared: Arc<Shared>,
    propagate_failure: bool,

    /// True while the task sits in the queue.
    scheduled: AtomicBool,
    scheduled_at: Mutex<DateTime<Utc>>,
}

impl Task {
    pub(crate) fn new(
        kind: JobKind,
        future: impl Future<Output = ()> + Send + 'static,
        shared: Arc<Shared>,
        propagate_failure: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Ulid::new(),
            kind,
            future: Mutex::new(Some(Box::pin(future))),
            shared,
            propagate_failure,
            scheduled: AtomicBool::new(false),
            scheduled_at: Mutex::new(Utc::now()),
        })
    }

    /// Put the task on the context queue unless it is already there.
    ///
    /// Returns `false` when the context refused the admission.
    pub(crate) fn schedule(self: &Arc<Self>) -> bool {
        if self.scheduled.swap(true, Ordering::AcqRel) {
            return true;
        }
        *self.scheduled_at.lock() = Utc::now();

        let job: Arc<dyn Runnable> = Arc::clone(self) as Arc<dyn Runnable>;
        if self.shared.queue.try_add(job, self.propagate_failure) {
            return true;
        }
        self.scheduled.store(false, Ordering::Release);
        false
    }
}

impl Runnable for Task {
    fn run(self: Arc<Self>) {
        // poll 中の wake で再投入できるよう、poll 前にフラグを下ろす
        self.scheduled.store(false, Ordering::Release);

        let Some(mut future) = self.future.lock().take() else {
            return;
        };

        let waker = Waker::from(Arc::clone(&self));
        let mut cx = Context::from_waker(&waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Pending => {
                *self.future.lock() = Some(future);
            }
            Poll::Ready(()) => {
                tracing::trace!(task = %self.id, "task completed");
            }
        }
    }

    fn describe(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            kind: self.kind,
            scheduled_at: *self.scheduled_at.lock(),
        }
    }
}

impl Wake for Task {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if !self.schedule() {
            tracing::debug!(task = %self.id, "context closed; wake dropped");
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("propagate_failure", &self.propagate_failure)
            .finish()
    }
}

/// A synchronous callback run once on the context thread.
pub(crate) struct Callback {
    id: Ulid,
    scheduled_at: DateTime<Utc>,
    callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Callback {
    pub(crate) fn new(callback: impl FnOnce() + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            id: Ulid::new(),
            scheduled_at: Utc::now(),
            callback: Mutex::new(Some(Box::new(callback))),
        })
    }
}

impl Runnable for Callback {
    fn run(self: Arc<Self>) {
        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            callback();
        }
    }

    fn describe(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            kind: JobKind::Callback,
            scheduled_at: self.scheduled_at,
        }
    }
}

/// Keeps the context open while a task is alive.
///
/// Owned by the task's future, so it is released when the future completes
/// or is dropped (including by a panic during poll).
pub(crate) struct OperationGuard {
    shared: Arc<Shared>,
}

impl OperationGuard {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        shared.operation_started();
        Self { shared }
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.shared.operation_completed();
    }
}

/// Result channel of a spawned task.
///
/// Resolves to the task's output, or to `ContextError::TaskAborted` when the
/// task failed (panicked) or was dropped without finishing.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(rx: oneshot::Receiver<T>) -> Self {
        Self { rx }
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, ContextError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| ContextError::TaskAborted))
    }
}

/// Yield once to the other jobs queued on the context.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
