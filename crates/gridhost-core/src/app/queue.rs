use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::proto::WrappedTask;

/// FIFO shared by the fetch loop (producer) and the workers (consumers).
///
/// Unbounded by itself; the fetch loop keeps it at or below the prefetch count.
#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<VecDeque<WrappedTask>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: WrappedTask) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(task);
    }

    /// Atomic pop: two workers never receive the same task.
    pub fn pop(&self) -> Option<WrappedTask> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
