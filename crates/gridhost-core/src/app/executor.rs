//! TaskExecutor - 1 タスクの呼び出しと結果の分類
//!
//! # 分類
//! | 失敗                                             | outcome  | breaker |
//! |--------------------------------------------------|----------|---------|
//! | 成功                                             | Finished | reset   |
//! | Internal / Unknown / Unimplemented / Unavailable | Finished | reset   |
//! | その他の RPC エラー、接続なし（リトライ後）      | Requeue  | +1      |
//! | duplex の応答数 != 1、未対応 shape、decode 失敗  | Finished | reset   |
//!
//! サービス系コードは起動猶予中だけリトライし、試行回数にも数えない。
//! 猶予が切れたら即座に打ち切る。

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use prost::Message;
use thiserror::Error;
use tonic::{Code, Status};
use tracing::{debug, info, warn};

use crate::app::FailureBreaker;
use crate::domain::{MethodDescriptor, ReportBuilder, failure_result, success_result};
use crate::error::AgentError;
use crate::impls::ServiceConnection;
use crate::observability::DispatchCounters;
use crate::proto::{InnerTask, MethodShape, ResultReport, TaskOutcome, WrappedTask};
use crate::retry::{RetryDirective, RetryPolicy, RetryState};
use crate::supervisor::InitTimer;

/// Why one service call failed.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("service call failed: {0}")]
    Rpc(Status),

    #[error("duplex call returned {0} responses, expected exactly one")]
    ResponseCount(usize),

    #[error("{0:?} calls are not supported")]
    Unsupported(MethodShape),

    #[error("unknown method shape {0}")]
    UnknownShape(i32),

    #[error("inner task could not be decoded: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("service connection is not available")]
    NotConnected,
}

/// Codes that mean the service itself answered badly, not that it was unreachable.
pub fn is_service_code(code: Code) -> bool {
    matches!(
        code,
        Code::Internal | Code::Unknown | Code::Unimplemented | Code::Unavailable
    )
}

impl InvokeError {
    pub fn outcome(&self) -> TaskOutcome {
        match self {
            InvokeError::Rpc(status) if is_service_code(status.code()) => TaskOutcome::Finished,
            InvokeError::Rpc(_) | InvokeError::NotConnected => TaskOutcome::Requeue,
            InvokeError::ResponseCount(_)
            | InvokeError::Unsupported(_)
            | InvokeError::UnknownShape(_)
            | InvokeError::Decode(_) => TaskOutcome::Finished,
        }
    }
}

pub struct TaskExecutor {
    connection: ServiceConnection,
    init_timer: Arc<InitTimer>,
    breaker: Arc<FailureBreaker>,
    counters: Arc<DispatchCounters>,
    call_timeout: Duration,
    retry: RetryPolicy,
}

impl TaskExecutor {
    pub fn new(
        connection: ServiceConnection,
        init_timer: Arc<InitTimer>,
        breaker: Arc<FailureBreaker>,
        counters: Arc<DispatchCounters>,
        call_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            connection,
            init_timer,
            breaker,
            counters,
            call_timeout,
            retry,
        }
    }

    /// Invoke the task and build its report.
    ///
    /// Only a tripped breaker is an `Err`; every other failure becomes data in
    /// the report.
    pub async fn execute(&self, wrapped: &WrappedTask) -> Result<ResultReport, AgentError> {
        let builder = ReportBuilder::new(wrapped);
        let inner = match InnerTask::decode(wrapped.serialized_inner_task.clone()) {
            Ok(inner) => inner,
            Err(e) => return self.failed(&builder, None, InvokeError::Decode(e)),
        };
        let builder = builder.client(&inner);

        match self.invoke(&inner).await {
            Ok(payload) => {
                self.breaker.reset();
                self.counters.record_finished(false);
                debug!(task_id = %wrapped.task_id, message_id = %inner.message_id, "task finished");
                Ok(builder.build(TaskOutcome::Finished, &success_result(&inner, payload)))
            }
            Err(err) => self.failed(&builder, Some(&inner), err),
        }
    }

    fn failed(
        &self,
        builder: &ReportBuilder,
        inner: Option<&InnerTask>,
        err: InvokeError,
    ) -> Result<ResultReport, AgentError> {
        let outcome = err.outcome();
        let result = failure_result(inner, err.to_string());
        match outcome {
            TaskOutcome::Finished => {
                self.breaker.reset();
                self.counters.record_finished(true);
                info!(error = %err, "task failed in the service, reporting finished");
            }
            TaskOutcome::Requeue => {
                let failures = self.breaker.record_failure();
                self.counters.record_requeued();
                warn!(error = %err, failures, "task failed to reach the service, requeueing");
                if self.breaker.is_tripped() {
                    return Err(AgentError::CircuitOpen { failures });
                }
            }
        }
        Ok(builder.build(outcome, &result))
    }

    async fn invoke(&self, inner: &InnerTask) -> Result<Bytes, InvokeError> {
        let method = MethodDescriptor::from_task(inner).map_err(InvokeError::UnknownShape)?;
        if matches!(method.shape, MethodShape::ClientStream | MethodShape::ServerStream) {
            return Err(InvokeError::Unsupported(method.shape));
        }

        self.retry
            .execute_counting(
                || self.call_once(&method, inner.payload.clone()),
                |err, state| self.retry_directive(&method, err, state),
                || self.init_timer.is_timed_out(),
            )
            .await
    }

    async fn call_once(
        &self,
        method: &MethodDescriptor,
        payload: Bytes,
    ) -> Result<Bytes, InvokeError> {
        let Some(connection) = self.connection.current().await else {
            return Err(InvokeError::NotConnected);
        };
        let invoker = connection.invoker;
        match method.shape {
            MethodShape::Unary => invoker
                .unary(method, payload, self.call_timeout)
                .await
                .map_err(InvokeError::Rpc),
            MethodShape::DuplexStream => {
                let mut responses = invoker
                    .duplex(method, payload, self.call_timeout)
                    .await
                    .map_err(InvokeError::Rpc)?;
                match responses.len() {
                    1 => Ok(responses.remove(0)),
                    n => Err(InvokeError::ResponseCount(n)),
                }
            }
            other => Err(InvokeError::Unsupported(other)),
        }
    }

    fn retry_directive(
        &self,
        method: &MethodDescriptor,
        err: &InvokeError,
        state: &RetryState,
    ) -> RetryDirective {
        match err {
            InvokeError::Rpc(status) if is_service_code(status.code()) => {
                if self.init_timer.is_timed_out() {
                    RetryDirective::Abort
                } else {
                    debug!(%method, code = ?status.code(), "service still starting, retrying");
                    RetryDirective::Retry
                }
            }
            InvokeError::Rpc(_) | InvokeError::NotConnected => {
                warn!(
                    %method,
                    error = %err,
                    attempt = state.attempt_count,
                    "service call failed, retrying"
                );
                RetryDirective::Retry
            }
            _ => RetryDirective::Abort,
        }
    }
}
