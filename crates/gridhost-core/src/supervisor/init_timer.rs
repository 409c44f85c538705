use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Grace period after a load attempt during which connectivity errors from the
/// service are treated as "still starting".
///
/// A timer that was never started, or whose grace has elapsed, reports timed
/// out. Once elapsed it stays elapsed until the next [`InitTimer::start`].
#[derive(Debug)]
pub struct InitTimer {
    timeout: Duration,
    started: Mutex<Option<Instant>>,
}

impl InitTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            started: Mutex::new(None),
        }
    }

    /// (Re)start the grace period from now.
    pub fn start(&self) {
        if let Ok(mut started) = self.started.lock() {
            *started = Some(Instant::now());
        }
    }

    pub fn stop(&self) {
        if let Ok(mut started) = self.started.lock() {
            *started = None;
        }
    }

    pub fn is_timed_out(&self) -> bool {
        let Ok(mut started) = self.started.lock() else {
            return true;
        };
        match *started {
            None => true,
            Some(at) if at.elapsed() >= self.timeout => {
                *started = None;
                true
            }
            Some(_) => false,
        }
    }
}
