//! Work item: payload + failure policy.

/// One deferred computation as held by the queue.
///
/// Ownership of `payload` moves to the consumer when the item is dequeued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem<T> {
    pub payload: T,

    /// If true, a failure while executing this item stops the executor loop.
    /// If false, the failure is the submitter's concern and the loop keeps going.
    pub propagate_failure: bool,
}

impl<T> WorkItem<T> {
    pub fn new(payload: T, propagate_failure: bool) -> Self {
        Self {
            payload,
            propagate_failure,
        }
    }

    pub fn into_parts(self) -> (T, bool) {
        (self.payload, self.propagate_failure)
    }
}
