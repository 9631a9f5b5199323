//! Queue lifecycle state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`WorkQueue`](super::WorkQueue).
///
/// State transitions:
/// - OpenEmpty <-> OpenHasWork (try_add / dequeue)
/// - OpenEmpty -> ClosedDrained (complete_adding)
/// - OpenHasWork -> ClosingHasWork (complete_adding)
/// - ClosingHasWork -> ClosedDrained (last dequeue)
///
/// ClosedDrained is terminal: nothing is admitted and nothing is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Accepting work, nothing pending.
    OpenEmpty,

    /// Accepting work, items pending.
    OpenHasWork,

    /// Closed for admission, items still to deliver.
    ClosingHasWork,

    /// Closed and drained.
    ClosedDrained,
}

impl QueueState {
    pub(crate) fn from_parts(closed: bool, pending: usize) -> Self {
        match (closed, pending) {
            (false, 0) => QueueState::OpenEmpty,
            (false, _) => QueueState::OpenHasWork,
            (true, 0) => QueueState::ClosedDrained,
            (true, _) => QueueState::ClosingHasWork,
        }
    }

    /// Is this the terminal state (consumer iteration ends)?
    pub fn is_terminal(self) -> bool {
        matches!(self, QueueState::ClosedDrained)
    }

    /// Does the queue still accept `try_add`?
    pub fn accepts_work(self) -> bool {
        matches!(self, QueueState::OpenEmpty | QueueState::OpenHasWork)
    }
}
