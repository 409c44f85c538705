//! TaskFetchLoop - dispatcher からの先読み
//!
//! # 状態
//! `Fetching → {Enqueue, EmptyBackoff, Exit}`
//! - キュー長 >= prefetch: dispatcher に触れずに一定時間待つ（背圧）
//! - `Running`: enqueue、空振りカウンタをリセット
//! - `TempNoTask`: 空振りカウンタ × 基本間隔だけ待つ（上限なし）
//! - `EndTask`: セッション終了フラグを立てて抜ける
//!
//! pull の失敗は固定間隔でリトライし、使い切ったら致命的。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::TaskQueue;
use crate::config::AgentTimings;
use crate::error::AgentError;
use crate::ports::Dispatcher;
use crate::proto::{SessionState, WrappedTask};
use crate::retry::{RetryDirective, RetryPolicy};

pub struct TaskFetchLoop {
    dispatcher: Arc<dyn Dispatcher>,
    queue: Arc<TaskQueue>,
    session_id: String,
    prefetch: usize,
    timings: AgentTimings,
    session_ended: Arc<AtomicBool>,
}

impl TaskFetchLoop {
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        queue: Arc<TaskQueue>,
        session_id: impl Into<String>,
        prefetch: usize,
        timings: AgentTimings,
        session_ended: Arc<AtomicBool>,
    ) -> Self {
        Self {
            dispatcher,
            queue,
            session_id: session_id.into(),
            prefetch,
            timings,
            session_ended,
        }
    }

    /// Run until `EndTask`, cancellation, or pull exhaustion.
    ///
    /// The session-ended flag is raised on every exit, so workers drain what is
    /// queued and stop instead of waiting for tasks that will never come.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), AgentError> {
        let result = self.fetch(&cancel).await;
        self.session_ended.store(true, Ordering::SeqCst);
        result
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<(), AgentError> {
        let mut empty_streak: u32 = 0;
        info!(prefetch = self.prefetch, "fetch loop started");

        while !self.session_ended.load(Ordering::SeqCst) && !cancel.is_cancelled() {
            let queued = self.queue.len();
            if queued >= self.prefetch {
                debug!(queued, prefetch = self.prefetch, "prefetch satisfied");
                sleep_or_cancel(cancel, self.timings.queue_full_interval).await;
                continue;
            }

            let wrapped = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.pull() => r?,
            };

            match SessionState::try_from(wrapped.session_state) {
                Ok(SessionState::Running) => {
                    debug!(task_id = %wrapped.task_id, "task fetched");
                    self.queue.push(wrapped);
                    empty_streak = 0;
                }
                Ok(SessionState::EndTask) => {
                    info!("dispatcher signalled end of session");
                    self.session_ended.store(true, Ordering::SeqCst);
                }
                Ok(SessionState::TempNoTask) => {
                    empty_streak = empty_streak.saturating_add(1);
                    let delay = self.timings.retry_interval.saturating_mul(empty_streak);
                    debug!(empty_streak, ?delay, "no task available");
                    sleep_or_cancel(cancel, delay).await;
                }
                Err(_) => {
                    empty_streak = empty_streak.saturating_add(1);
                    let delay = self.timings.retry_interval.saturating_mul(empty_streak);
                    warn!(
                        state = wrapped.session_state,
                        ?delay,
                        "unknown session state, treating as no task"
                    );
                    sleep_or_cancel(cancel, delay).await;
                }
            }
        }

        info!("fetch loop stopped");
        Ok(())
    }

    async fn pull(&self) -> Result<WrappedTask, AgentError> {
        let policy = RetryPolicy::fixed(self.timings.retry_interval, self.timings.max_retries);
        policy
            .execute(
                || {
                    self.dispatcher
                        .pull_task(&self.session_id, self.timings.dispatcher_deadline)
                },
                |status, state| {
                    warn!(error = %status, attempt = state.attempt_count, "pulling task failed");
                    RetryDirective::Retry
                },
            )
            .await
            .map_err(|status| AgentError::dispatcher("pull_task", status))
    }
}

async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}
