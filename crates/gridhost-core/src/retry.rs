//! Retry policy: runs an action until it succeeds, gives up, or is vetoed.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, error};

/// Caller's answer to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDirective {
    /// Wait and try again.
    Retry,
    /// Stop now and surface this error.
    Abort,
}

/// Retry policy shared by every network operation of the agent.
///
/// The policy itself is immutable configuration. Each call to [`RetryPolicy::execute`]
/// builds its own [`RetryState`], so concurrent operations never share counters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub interval: Duration,

    /// Number of retries after the first attempt. `None` retries forever.
    pub max_retries: Option<u32>,

    /// Double the delay after every retry instead of keeping it fixed.
    ///
    /// Growth has no upper bound; only arithmetic overflow saturates it.
    pub incremental: bool,
}

impl RetryPolicy {
    pub const BACKOFF_FACTOR: u32 = 2;

    /// Fixed delay, bounded retries.
    pub fn fixed(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            max_retries: Some(max_retries),
            incremental: false,
        }
    }

    /// Doubling delay, bounded retries.
    pub fn incremental(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            max_retries: Some(max_retries),
            incremental: true,
        }
    }

    /// Fixed delay, retries forever.
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_retries: None,
            incremental: false,
        }
    }

    /// Retry `action` with every attempt counted against the budget.
    pub async fn execute<T, E, A, Fut, F>(&self, action: A, on_failure: F) -> Result<T, E>
    where
        A: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        F: FnMut(&E, &RetryState) -> RetryDirective,
        E: std::fmt::Display,
    {
        self.execute_counting(action, on_failure, || true).await
    }

    /// Retry `action`, consulting `counts` after each failure to decide whether
    /// that attempt consumes the retry budget.
    ///
    /// `on_failure` is called only while attempts remain; returning
    /// [`RetryDirective::Abort`] surfaces the error immediately. Once the budget
    /// is spent the last error is returned as-is.
    pub async fn execute_counting<T, E, A, Fut, F, C>(
        &self,
        mut action: A,
        mut on_failure: F,
        counts: C,
    ) -> Result<T, E>
    where
        A: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        F: FnMut(&E, &RetryState) -> RetryDirective,
        C: Fn() -> bool,
        E: std::fmt::Display,
    {
        let mut state = RetryState::new(self);
        loop {
            match action().await {
                Ok(value) => {
                    state.reset();
                    return Ok(value);
                }
                Err(err) => {
                    if !state.has_attempts_left() {
                        error!(retries = state.attempt_count, error = %err, "retries exhausted");
                        return Err(err);
                    }
                    if on_failure(&err, &state) == RetryDirective::Abort {
                        return Err(err);
                    }
                    let delay = state.advance(counts());
                    debug!(attempt = state.attempt_count, ?delay, "waiting before next attempt");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Mutable bookkeeping for one in-flight retry operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    pub attempt_count: u32,
    pub current_delay: Duration,
    pub next_delay: Duration,
    pub max_retries: Option<u32>,
    interval: Duration,
    incremental: bool,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt_count: 0,
            current_delay: Duration::ZERO,
            next_delay: policy.interval,
            max_retries: policy.max_retries,
            interval: policy.interval,
            incremental: policy.incremental,
        }
    }

    pub fn has_attempts_left(&self) -> bool {
        self.max_retries.is_none_or(|max| self.attempt_count < max)
    }

    /// Move to the next attempt and return how long to wait before it.
    ///
    /// `counted == false` leaves the attempt budget untouched; the delay
    /// schedule advances either way.
    pub fn advance(&mut self, counted: bool) -> Duration {
        self.current_delay = self.next_delay;
        self.next_delay = if self.incremental {
            self.current_delay
                .saturating_mul(RetryPolicy::BACKOFF_FACTOR)
        } else {
            self.interval
        };
        if counted {
            self.attempt_count += 1;
        }
        self.current_delay
    }

    pub fn reset(&mut self) {
        self.attempt_count = 0;
        self.current_delay = Duration::ZERO;
        self.next_delay = self.interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn fixed_policy_keeps_interval() {
        let policy = RetryPolicy::fixed(Duration::from_secs(1), 3);
        let mut state = RetryState::new(&policy);

        assert_eq!(state.advance(true), Duration::from_secs(1));
        assert_eq!(state.advance(true), Duration::from_secs(1));
        assert_eq!(state.attempt_count, 2);
    }

    #[test]
    fn incremental_policy_doubles_without_cap() {
        let policy = RetryPolicy::incremental(Duration::from_secs(2), 10);
        let mut state = RetryState::new(&policy);

        let delays: Vec<Duration> = (0..6).map(|_| state.advance(true)).collect();
        let secs: Vec<u64> = delays.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![2, 4, 8, 16, 32, 64]);
    }

    #[test]
    fn reset_restores_initial_schedule() {
        let policy = RetryPolicy::incremental(Duration::from_millis(100), 5);
        let mut state = RetryState::new(&policy);
        state.advance(true);
        state.advance(true);

        state.reset();
        assert_eq!(state, RetryState::new(&policy));
    }

    #[test]
    fn unbounded_policy_always_has_attempts() {
        let policy = RetryPolicy::unbounded(Duration::from_millis(1));
        let mut state = RetryState::new(&policy);
        for _ in 0..1000 {
            state.advance(true);
        }
        assert!(state.has_attempts_left());
    }

    #[tokio::test(start_paused = true)]
    async fn execute_returns_first_success() {
        let policy = RetryPolicy::fixed(Duration::from_secs(1), 3);
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = policy
            .execute(
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 { Err(format!("boom {n}")) } else { Ok(n) }
                },
                |_, _| RetryDirective::Retry,
            )
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn execute_surfaces_last_error_when_exhausted() {
        let policy = RetryPolicy::fixed(Duration::from_secs(1), 3);
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result: Result<(), String> = policy
            .execute(
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Err(format!("boom {n}"))
                },
                |_, _| RetryDirective::Retry,
            )
            .await;

        assert_eq!(result, Err("boom 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_directive_stops_immediately() {
        let policy = RetryPolicy::fixed(Duration::from_secs(1), 3);
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = policy
            .execute(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("fatal".to_string())
                },
                |_, _| RetryDirective::Abort,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn uncounted_attempts_do_not_consume_budget() {
        let policy = RetryPolicy::fixed(Duration::from_millis(10), 1);
        let calls = AtomicU32::new(0);

        // The first five failures happen "during warm-up" and are not counted.
        let result: Result<(), String> = policy
            .execute_counting(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("not yet".to_string())
                },
                |_, _| RetryDirective::Retry,
                || calls.load(Ordering::SeqCst) > 5,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 7);
    }
}
