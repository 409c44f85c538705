use std::sync::atomic::{AtomicU32, Ordering};

/// Consecutive-failure circuit breaker.
///
/// Every requeued task counts one failure, every delivered task resets the
/// count. Once the count exceeds the threshold the agent must stop.
#[derive(Debug)]
pub struct FailureBreaker {
    failures: AtomicU32,
    threshold: u32,
}

impl FailureBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            failures: AtomicU32::new(0),
            threshold,
        }
    }

    /// Count one failure; returns the new count.
    pub fn record_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    pub fn reset(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn is_tripped(&self) -> bool {
        self.failures() > self.threshold
    }
}
