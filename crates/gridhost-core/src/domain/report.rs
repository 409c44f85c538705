use bytes::Bytes;
use prost::Message;

use crate::proto::{
    InnerResult, InnerTask, ResultReport, STATUS_FAILURE, STATUS_SUCCESS, TaskOutcome, WrappedTask,
};

pub fn success_result(task: &InnerTask, payload: Bytes) -> InnerResult {
    InnerResult {
        payload,
        status_code: STATUS_SUCCESS,
        status_detail: String::new(),
        session_id: task.session_id.clone(),
        client_id: task.client_id.clone(),
        message_id: task.message_id.clone(),
    }
}

/// Failed call. `task` is `None` when the inner task could not be decoded.
pub fn failure_result(task: Option<&InnerTask>, detail: impl Into<String>) -> InnerResult {
    let mut result = InnerResult {
        status_code: STATUS_FAILURE,
        status_detail: detail.into(),
        ..Default::default()
    };
    if let Some(task) = task {
        result.session_id = task.session_id.clone();
        result.client_id = task.client_id.clone();
        result.message_id = task.message_id.clone();
    }
    result
}

/// Builds the `ResultReport` for one wrapped task.
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    session_id: String,
    task_id: String,
    client_id: String,
}

impl ReportBuilder {
    pub fn new(wrapped: &WrappedTask) -> Self {
        Self {
            session_id: wrapped.session_id.clone(),
            task_id: wrapped.task_id.clone(),
            client_id: String::new(),
        }
    }

    pub fn client(mut self, task: &InnerTask) -> Self {
        self.client_id = task.client_id.clone();
        self
    }

    pub fn build(&self, outcome: TaskOutcome, result: &InnerResult) -> ResultReport {
        ResultReport {
            session_id: self.session_id.clone(),
            task_id: self.task_id.clone(),
            client_id: self.client_id.clone(),
            task_outcome: outcome as i32,
            serialized_inner_result: Bytes::from(result.encode_to_vec()),
        }
    }
}
