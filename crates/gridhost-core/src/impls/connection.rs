//! Versioned handle to the current service connection.
//!
//! The supervisor swaps the whole invoker on every restart. Workers take a
//! snapshot right before a call, so they hold either the new invoker or an old
//! one whose channel fails cleanly; never a half-replaced one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use crate::ports::MethodInvoker;

#[derive(Clone)]
pub struct ConnectionSnapshot {
    pub generation: u64,
    pub invoker: Arc<dyn MethodInvoker>,
}

#[derive(Default)]
struct Inner {
    slot: RwLock<Option<ConnectionSnapshot>>,
    generation: AtomicU64,
}

#[derive(Clone, Default)]
pub struct ServiceConnection {
    inner: Arc<Inner>,
}

impl ServiceConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `invoker` and return its generation.
    pub async fn replace(&self, invoker: Arc<dyn MethodInvoker>) -> u64 {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut slot = self.inner.slot.write().await;
        *slot = Some(ConnectionSnapshot {
            generation,
            invoker,
        });
        generation
    }

    pub async fn current(&self) -> Option<ConnectionSnapshot> {
        self.inner.slot.read().await.clone()
    }

    /// Drop the current invoker; later snapshots see `None` until the next replace.
    pub async fn clear(&self) {
        self.inner.slot.write().await.take();
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }
}
