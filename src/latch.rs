use std::time::Duration;

use tokio::sync::watch;

/// Counts in-flight operations and lets one task block until they all finish.
///
/// `add()` before handing work to the transport, `remove()` exactly once from
/// the completion path, `wait()` from the task that needs the results. The
/// counter must never go below zero: a surplus `remove()` is a bug in the
/// calling code and is reported, not absorbed.
pub struct CountdownLatch {
    count: watch::Sender<i64>,
}

impl CountdownLatch {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        CountdownLatch { count }
    }

    /// Register one in-flight operation.
    pub fn add(&self) {
        self.count.send_modify(|c| *c += 1);
    }

    /// Mark one in-flight operation complete.
    pub fn remove(&self) {
        let mut underflow = false;
        self.count.send_modify(|c| {
            if *c == 0 {
                underflow = true;
            } else {
                *c -= 1;
            }
        });
        if underflow {
            log::error!("countdown latch removed below zero");
            debug_assert!(false, "countdown latch removed below zero");
        }
    }

    /// Current number of in-flight operations.
    pub fn count(&self) -> i64 {
        *self.count.borrow()
    }

    /// Block until the counter reaches zero or the timeout elapses.
    ///
    /// Returns true when everything completed in time. A latch already at
    /// zero returns true immediately.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.count.subscribe();
        let completed = match tokio::time::timeout(timeout, rx.wait_for(|c| *c == 0)).await {
            Ok(result) => result.is_ok(),
            Err(_) => false,
        };
        completed
    }
}

impl Default for CountdownLatch {
    fn default() -> Self {
        Self::new()
    }
}
