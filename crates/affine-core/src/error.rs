use std::time::Duration;

use thiserror::Error;
use ulid::Ulid;

#[derive(Debug, Error)]
pub enum ContextError {
    /// The context's queue no longer accepts work.
    #[error("async context is closed; submission refused")]
    Closed,

    #[error("job {job} failed: {message}")]
    JobFailed { job: Ulid, message: String },

    #[error("not running inside an async context")]
    NoContext,

    #[error("async context did not finish within {0:?}")]
    Timeout(Duration),

    /// The task was dropped before producing its output.
    #[error("task aborted before completion")]
    TaskAborted,

    #[error("failed to spawn context thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    #[error("context thread panicked outside of a job")]
    LoopPanicked,
}
