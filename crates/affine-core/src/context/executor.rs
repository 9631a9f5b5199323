use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::task::Runnable;
use crate::error::ContextError;
use crate::observability::DrainReport;
use crate::queue::WorkQueue;

/// Run every job of `queue` on the calling thread until the queue is closed and drained.
///
/// A job failure (panic) is handled by the item's own policy:
/// - `propagate_failure == true`: the queue is closed and the failure is returned.
/// - `propagate_failure == false`: logged and swallowed; the submitter sees it
///   through the job's own result channel.
pub fn drain(queue: &WorkQueue<Arc<dyn Runnable>>) -> Result<DrainReport, ContextError> {
    let mut report = DrainReport::default();

    for item in queue.consume() {
        let (job, propagate_failure) = item.into_parts();
        let info = job.describe();
        report.executed += 1;

        let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job.run())) else {
            continue;
        };
        let message = panic_message(&*payload);

        if propagate_failure {
            tracing::error!(job = %info.id, kind = ?info.kind, %message, "job failed; stopping context");
            // 以降の投入は拒否させ、残りの job はここで手放す。
            // job は Shared 経由でキューを参照しているので、キューに残すと解放されない
            queue.complete_adding();
            discard_pending(queue);
            return Err(ContextError::JobFailed {
                job: info.id,
                message,
            });
        }

        report.swallowed_failures += 1;
        tracing::warn!(job = %info.id, kind = ?info.kind, %message, "job failed; failure not propagated");
    }

    Ok(report)
}

/// Drop every job still queued, so their futures and result channels are released.
pub(crate) fn discard_pending(queue: &WorkQueue<Arc<dyn Runnable>>) -> usize {
    let discarded = queue.take_pending();
    let count = discarded.len();
    if count > 0 {
        tracing::debug!(discarded = count, "dropping jobs that will never run");
    }
    drop(discarded);
    count
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
