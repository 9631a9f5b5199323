use serde::{Deserialize, Serialize};

use crate::queue::QueueState;

/// Point-in-time counters of a work queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub state: QueueState,
    pub pending: usize,
    pub admitted: u64,
    pub rejected: u64,
    pub delivered: u64,
    pub completion_requests: u64,
}

/// Summary of one executor drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Jobs taken off the queue and run (including ones that failed).
    pub executed: u64,

    /// Failed jobs whose failure was not propagated out of the loop.
    pub swallowed_failures: u64,
}
