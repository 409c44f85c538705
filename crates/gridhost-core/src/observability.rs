//! Logging setup and dispatch counters.

use std::sync::Once;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the fmt subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        // another subscriber may already be installed by an embedding process
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init();
    });
}

/// Live counters shared by the workers.
#[derive(Debug, Default)]
pub struct DispatchCounters {
    finished: AtomicU64,
    requeued: AtomicU64,
    failed_calls: AtomicU64,
}

impl DispatchCounters {
    pub fn record_finished(&self, call_failed: bool) {
        self.finished.fetch_add(1, Ordering::Relaxed);
        if call_failed {
            self.failed_calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_requeued(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            finished: self.finished.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`DispatchCounters`], logged as JSON on exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Reports sent with `Finished`, successful or not.
    pub finished: u64,
    /// Reports sent with `Requeue`.
    pub requeued: u64,
    /// Service calls that did not succeed.
    pub failed_calls: u64,
}

impl DispatchStats {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
