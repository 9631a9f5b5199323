//! WaitSignal - consumer 側の待機プリミティブ
//!
//! counting semaphore: `release()` で permit を 1 つ積み、
//! `wait()` は permit を 1 つ消費するか timeout まで待つ。

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Counting wait/release handle.
///
/// Every state change on the queue releases exactly one permit, so a consumer
/// that checked "nothing to do" and then waits is woken at least once per
/// change. The timeout bounds the damage of a lost wakeup.
///
/// Permits are only taken by `wait`. A consumer that drains a burst of N
/// admissions without waiting leaves N permits behind, so its next N waits
/// return immediately before it actually sleeps.
#[derive(Debug, Default)]
pub struct WaitSignal {
    permits: Mutex<usize>,
    condvar: Condvar,
}

impl WaitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one permit. Never blocks on the consumer.
    pub fn release(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        drop(permits);
        self.condvar.notify_one();
    }

    /// Block until a permit is available (consuming it) or `timeout` elapses.
    ///
    /// Returns `true` when a permit was taken, `false` on timeout. A timeout
    /// is not an error: the caller just re-checks its own condition.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut permits = self.permits.lock();
        while *permits == 0 {
            // spurious wakeup のときは残り時間で待ち直す
            if self.condvar.wait_until(&mut permits, deadline).timed_out() {
                break;
            }
        }
        if *permits > 0 {
            *permits -= 1;
            true
        } else {
            false
        }
    }

    /// Permits released but not yet consumed.
    pub fn available(&self) -> usize {
        *self.permits.lock()
    }
}
