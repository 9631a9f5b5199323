//! Consuming iterator over a [`WorkQueue`].

use std::iter::FusedIterator;
use std::sync::atomic::Ordering;

use super::{WorkItem, WorkQueue};

/// Blocking, single-pass iterator that removes items from the queue.
///
/// Yields every admitted item exactly once in FIFO order and returns `None`
/// only after `complete_adding` was called and the queue is empty. While the
/// queue is open and empty, `next()` parks the calling thread on the queue's
/// [`WaitSignal`](super::WaitSignal) for at most one wait interval at a time.
pub struct Consuming<'a, T> {
    queue: &'a WorkQueue<T>,
    finished: bool,
}

impl<'a, T> Consuming<'a, T> {
    pub(super) fn new(queue: &'a WorkQueue<T>) -> Self {
        Self {
            queue,
            finished: false,
        }
    }
}

impl<T> Iterator for Consuming<'_, T> {
    type Item = WorkItem<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            {
                // dequeue と「閉じていて空」の判定は同じロックの中で行う
                let mut pending = self.queue.pending.lock();
                if let Some(item) = pending.items.pop_front() {
                    drop(pending);
                    self.queue.delivered.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(propagate_failure = item.propagate_failure, "work item delivered");
                    return Some(item);
                }
                if pending.completion_requests > 0 {
                    self.finished = true;
                    tracing::debug!("work queue drained");
                    return None;
                }
            }

            self.queue.signal.wait(self.queue.wait_timeout);
        }
    }
}

impl<T> FusedIterator for Consuming<'_, T> {}
