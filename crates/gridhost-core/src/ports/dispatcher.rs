//! Dispatcher port - タスクの取得と結果の返送

use std::time::Duration;

use async_trait::async_trait;
use tonic::Status;

use crate::proto::{ResultReport, WrappedTask};

/// Central dispatcher as seen by one host agent.
///
/// Both calls are bounded by the caller-supplied deadline. Retrying is the
/// caller's concern; implementations make exactly one attempt.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Pull the next task for `session_id`. Session lifecycle is signalled
    /// through [`WrappedTask::session_state`].
    async fn pull_task(&self, session_id: &str, deadline: Duration) -> Result<WrappedTask, Status>;

    async fn report_result(&self, report: ResultReport, deadline: Duration) -> Result<(), Status>;
}
