//! Context - single-threaded async context driven by a [`WorkQueue`]
//!
//! `AsyncContext::run` は専用スレッドを 1 本立て、その上で entry future と
//! そこから spawn / post された job をすべて投入順に実行します。
//!
//! # フロー
//! 1. entry future を `propagate_failure = true` でキューに投入
//! 2. 専用スレッドで `executor::drain()` がキューを消費
//! 3. Waker は `try_add` で同じキューに task を再投入
//! 4. 生きている task（operation）が 0 になったら `complete_adding()`
//! 5. drain 終了後、entry future の出力を返す

pub mod executor;
mod current;
mod task;

pub use self::task::{JobInfo, JobKind, Runnable, TaskHandle, YieldNow, yield_now};

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use ulid::Ulid;

use self::task::{Callback, OperationGuard, Task};
use crate::config::ContextConfig;
use crate::error::ContextError;
use crate::observability::QueueStats;
use crate::queue::WorkQueue;

/// State shared by the context thread, its handles, and its tasks.
pub(crate) struct Shared {
    id: Ulid,
    queue: WorkQueue<Arc<dyn Runnable>>,
    outstanding: AtomicUsize,
}

impl Shared {
    fn new(wait_timeout: Duration) -> Self {
        Self {
            id: Ulid::new(),
            queue: WorkQueue::with_wait_timeout(wait_timeout),
            outstanding: AtomicUsize::new(0),
        }
    }

    fn operation_started(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    /// The last live operation closes the queue so the drain can finish.
    fn operation_completed(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            tracing::debug!(context_id = %self.id, "no outstanding operations; completing context");
            self.queue.complete_adding();
        }
    }
}

/// Cloneable handle to a running context.
#[derive(Clone)]
pub struct ContextHandle {
    shared: Arc<Shared>,
}

impl ContextHandle {
    /// Handle of the context running on this thread, if any.
    pub fn current() -> Option<Self> {
        current::current()
    }

    pub fn id(&self) -> Ulid {
        self.shared.id
    }

    /// Submit a future to run on the context thread.
    ///
    /// A failure inside the future does not stop the context; it is reported
    /// through the returned handle as `ContextError::TaskAborted`.
    pub fn spawn<F>(&self, future: F) -> Result<TaskHandle<F::Output>, ContextError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let guard = OperationGuard::new(Arc::clone(&self.shared));
        let task = Task::new(
            JobKind::Spawned,
            async move {
                let _guard = guard;
                let output = future.await;
                // receiver が drop されていても構わない
                let _ = tx.send(output);
            },
            Arc::clone(&self.shared),
            false,
        );

        if !task.schedule() {
            return Err(ContextError::Closed);
        }
        Ok(TaskHandle::new(rx))
    }

    /// Submit a callback to run on the context thread.
    ///
    /// The callback keeps the context open until it has run, so it may submit
    /// further work. A panic in the callback stops the whole context.
    pub fn post<F>(&self, callback: F) -> Result<(), ContextError>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = OperationGuard::new(Arc::clone(&self.shared));
        let job: Arc<dyn Runnable> = Callback::new(move || {
            let _guard = guard;
            callback();
        });
        if self.shared.queue.try_add(job, true) {
            Ok(())
        } else {
            Err(ContextError::Closed)
        }
    }

    /// Jobs currently waiting in the queue, head first.
    pub fn scheduled_jobs(&self) -> Vec<JobInfo> {
        self.shared
            .queue
            .snapshot()
            .iter()
            .map(|job| job.describe())
            .collect()
    }

    pub fn outstanding_operations(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.queue.stats()
    }
}

/// Spawn onto the context owning the current thread.
pub fn spawn<F>(future: F) -> Result<TaskHandle<F::Output>, ContextError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    ContextHandle::current()
        .ok_or(ContextError::NoContext)?
        .spawn(future)
}

/// Entry point of the single-threaded async context.
pub struct AsyncContext;

impl AsyncContext {
    /// Run `future` to completion on a dedicated context thread.
    pub fn run<F>(future: F) -> Result<F::Output, ContextError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        Self::run_with_config(future, ContextConfig::default())
    }

    /// Run `future` with explicit settings.
    ///
    /// Returns once the entry future and every task it spawned have finished.
    pub fn run_with_config<F>(future: F, config: ContextConfig) -> Result<F::Output, ContextError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let shared = Arc::new(Shared::new(config.wait_timeout));
        let output = Arc::new(Mutex::new(None));

        let guard = OperationGuard::new(Arc::clone(&shared));
        let slot = Arc::clone(&output);
        let entry = Task::new(
            JobKind::Entry,
            async move {
                let _guard = guard;
                let value = future.await;
                *slot.lock() = Some(value);
            },
            Arc::clone(&shared),
            true,
        );
        if !entry.schedule() {
            return Err(ContextError::Closed);
        }

        let span = tracing::info_span!("async_context", context_id = %shared.id);
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        let handle = ContextHandle {
            shared: Arc::clone(&shared),
        };
        let spawned = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                let _enter = span.enter();
                let queue = &handle.shared.queue;
                let result = current::enter(handle.clone(), || executor::drain(queue));
                let _ = done_tx.send(result);
            });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                shared.queue.complete_adding();
                executor::discard_pending(&shared.queue);
                return Err(ContextError::ThreadSpawn(e));
            }
        };

        let result = match config.run_timeout {
            Some(timeout) => match done_rx.recv_timeout(timeout) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(context_id = %shared.id, ?timeout, "async context timed out; closing queue");
                    shared.queue.complete_adding();
                    // 実行中の job は context スレッドに任せ、未着手の job だけ手放す
                    executor::discard_pending(&shared.queue);
                    return Err(ContextError::Timeout(timeout));
                }
                Err(RecvTimeoutError::Disconnected) => Err(ContextError::LoopPanicked),
            },
            None => done_rx.recv().unwrap_or(Err(ContextError::LoopPanicked)),
        };
        if thread.join().is_err() {
            return Err(ContextError::LoopPanicked);
        }

        let report = result?;
        tracing::debug!(
            context_id = %shared.id,
            executed = report.executed,
            swallowed_failures = report.swallowed_failures,
            "async context finished"
        );
        output.lock().take().ok_or(ContextError::TaskAborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn run_returns_entry_output() {
        let value = AsyncContext::run(async { 40 + 2 }).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn runs_on_dedicated_named_thread() {
        let config = ContextConfig::default().with_thread_name("ctx-test");
        let name = AsyncContext::run_with_config(
            async { thread::current().name().map(str::to_string) },
            config,
        )
        .unwrap();
        assert_eq!(name.as_deref(), Some("ctx-test"));
    }

    #[test]
    fn current_handle_is_installed_on_context_thread() {
        assert!(ContextHandle::current().is_none());
        let inside = AsyncContext::run(async { ContextHandle::current().is_some() }).unwrap();
        assert!(inside);
        assert!(ContextHandle::current().is_none());
    }

    #[test]
    fn spawned_tasks_run_on_same_thread() {
        let same_thread = AsyncContext::run(async {
            let outer = thread::current().id();
            let handle = spawn(async { thread::current().id() }).unwrap();
            handle.await.unwrap() == outer
        })
        .unwrap();
        assert!(same_thread);
    }

    #[test]
    fn jobs_run_in_submission_order() {
        let order = AsyncContext::run(async {
            let log = Arc::new(Mutex::new(Vec::new()));
            let ctx = ContextHandle::current().unwrap();

            let mut handles = Vec::new();
            for i in 0..5 {
                let log = Arc::clone(&log);
                handles.push(ctx.spawn(async move { log.lock().push(i) }).unwrap());
            }
            for handle in handles {
                handle.await.unwrap();
            }
            let order = log.lock().clone();
            order
        })
        .unwrap();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn run_waits_for_detached_tasks() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        AsyncContext::run(async move {
            spawn(async move {
                yield_now().await;
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();
        })
        .unwrap();
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn post_runs_callback_on_context_thread() {
        let ran_on = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&ran_on);
        let context_thread = AsyncContext::run(async move {
            ContextHandle::current()
                .unwrap()
                .post(move || *slot.lock() = Some(thread::current().id()))
                .unwrap();
            thread::current().id()
        })
        .unwrap();
        assert_eq!(*ran_on.lock(), Some(context_thread));
    }

    #[test]
    fn spawn_outside_context_is_rejected() {
        assert!(matches!(spawn(async {}), Err(ContextError::NoContext)));
    }

    #[test]
    fn spawned_panic_is_reported_through_handle_only() {
        let result = AsyncContext::run(async {
            let handle = spawn(async {
                let fail = true;
                if fail {
                    panic!("spawned failure");
                }
                7
            })
            .unwrap();
            handle.await
        })
        .unwrap();
        assert!(matches!(result, Err(ContextError::TaskAborted)));
    }

    #[test]
    fn entry_panic_fails_the_run() {
        let err = AsyncContext::run(async {
            let fail = true;
            if fail {
                panic!("entry failure");
            }
        })
        .unwrap_err();
        assert!(matches!(err, ContextError::JobFailed { ref message, .. } if message == "entry failure"));
    }

    #[test]
    fn posted_panic_fails_the_run() {
        let err = AsyncContext::run(async {
            ContextHandle::current()
                .unwrap()
                .post(|| panic!("callback failure"))
                .unwrap();
        })
        .unwrap_err();
        assert!(matches!(err, ContextError::JobFailed { .. }));
    }

    #[test]
    fn handle_rejects_work_after_completion() {
        let (handle_tx, handle_rx) = mpsc::channel();
        AsyncContext::run(async move {
            handle_tx.send(ContextHandle::current().unwrap()).unwrap();
        })
        .unwrap();

        let handle = handle_rx.recv().unwrap();
        assert!(matches!(handle.post(|| {}), Err(ContextError::Closed)));
        assert!(matches!(handle.spawn(async {}), Err(ContextError::Closed)));
        assert_eq!(handle.outstanding_operations(), 0);
        assert!(handle.stats().rejected >= 1);
    }

    #[test]
    fn scheduled_jobs_lists_queued_work() {
        let kinds = AsyncContext::run(async {
            let ctx = ContextHandle::current().unwrap();
            ctx.post(|| {}).unwrap();
            let _ = ctx.spawn(async {}).unwrap();
            ctx.scheduled_jobs()
                .into_iter()
                .map(|job| job.kind)
                .collect::<Vec<_>>()
        })
        .unwrap();
        assert_eq!(kinds, vec![JobKind::Callback, JobKind::Spawned]);
    }

    fn block_on_with_deadline<T>(handle: TaskHandle<T>) -> Result<T, ContextError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async { tokio::time::timeout(Duration::from_secs(2), handle).await })
            .expect("task handle resolved")
    }

    #[test]
    fn propagated_failure_aborts_queued_tasks() {
        let (handle_tx, handle_rx) = mpsc::channel();
        let err = AsyncContext::run(async move {
            let ctx = ContextHandle::current().unwrap();
            ctx.post(|| panic!("fatal")).unwrap();
            handle_tx.send(ctx.spawn(async { 1 }).unwrap()).unwrap();
        })
        .unwrap_err();
        assert!(matches!(err, ContextError::JobFailed { ref message, .. } if message == "fatal"));

        let handle = handle_rx.recv().unwrap();
        assert!(matches!(block_on_with_deadline(handle), Err(ContextError::TaskAborted)));
    }

    #[test]
    fn timeout_aborts_queued_tasks() {
        let (handle_tx, handle_rx) = mpsc::channel();
        let config = ContextConfig::default().with_run_timeout(Duration::from_millis(50));
        let err = AsyncContext::run_with_config(
            async move {
                let ctx = ContextHandle::current().unwrap();
                ctx.post(|| thread::sleep(Duration::from_millis(300))).unwrap();
                handle_tx.send(ctx.spawn(async { 1 }).unwrap()).unwrap();
                std::future::pending::<()>().await;
            },
            config,
        )
        .unwrap_err();
        assert!(matches!(err, ContextError::Timeout(_)));

        let handle = handle_rx.recv().unwrap();
        assert!(matches!(block_on_with_deadline(handle), Err(ContextError::TaskAborted)));
    }

    #[test]
    fn posted_callback_can_spawn_after_entry_returns() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        AsyncContext::run(async move {
            ContextHandle::current()
                .unwrap()
                .post(move || {
                    spawn(async move { flag.store(true, Ordering::SeqCst) }).unwrap();
                })
                .unwrap();
        })
        .unwrap();
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn pending_post_counts_as_outstanding_operation() {
        let outstanding = AsyncContext::run(async {
            let ctx = ContextHandle::current().unwrap();
            ctx.post(|| {}).unwrap();
            ctx.outstanding_operations()
        })
        .unwrap();
        assert_eq!(outstanding, 2);
    }

    #[test]
    fn run_times_out_on_never_ending_future() {
        let config = ContextConfig::default().with_run_timeout(Duration::from_millis(100));
        let err = AsyncContext::run_with_config(std::future::pending::<()>(), config).unwrap_err();
        assert!(matches!(err, ContextError::Timeout(t) if t == Duration::from_millis(100)));
    }
}
