//! Scripted fakes for the ports.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use tonic::{Code, Status};

use crate::domain::MethodDescriptor;
use crate::ports::{Dispatcher, MethodInvoker};
use crate::proto::{InnerTask, MethodShape, ResultReport, SessionState, WrappedTask};

pub fn inner_task(message_id: &str, shape: MethodShape) -> InnerTask {
    InnerTask {
        service_name: "echo.Echo".to_string(),
        method_name: "Say".to_string(),
        method_shape: shape as i32,
        payload: Bytes::from(format!("payload-{message_id}")),
        session_id: "session-1".to_string(),
        client_id: "client-1".to_string(),
        message_id: message_id.to_string(),
    }
}

pub fn running(task_id: &str) -> WrappedTask {
    running_with(task_id, &inner_task(task_id, MethodShape::Unary))
}

pub fn running_with(task_id: &str, inner: &InnerTask) -> WrappedTask {
    WrappedTask {
        session_id: "session-1".to_string(),
        task_id: task_id.to_string(),
        session_state: SessionState::Running as i32,
        serialized_inner_task: Bytes::from(inner.encode_to_vec()),
    }
}

pub fn signal(state: SessionState) -> WrappedTask {
    WrappedTask {
        session_id: "session-1".to_string(),
        session_state: state as i32,
        ..Default::default()
    }
}

/// Dispatcher that replays a fixed script of pull replies, then `EndTask`.
#[derive(Default)]
pub struct ScriptedDispatcher {
    pulls: Mutex<VecDeque<Result<WrappedTask, Status>>>,
    report_failures: Mutex<VecDeque<Status>>,
    reports: Mutex<Vec<ResultReport>>,
    pull_count: AtomicUsize,
}

impl ScriptedDispatcher {
    pub fn new(script: impl IntoIterator<Item = Result<WrappedTask, Status>>) -> Self {
        Self {
            pulls: Mutex::new(script.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Fail the next `statuses.len()` reports before accepting any.
    pub fn failing_reports(self, statuses: impl IntoIterator<Item = Status>) -> Self {
        *self.report_failures.lock().unwrap() = statuses.into_iter().collect();
        self
    }

    pub fn pull_count(&self) -> usize {
        self.pull_count.load(Ordering::SeqCst)
    }

    pub fn reports(&self) -> Vec<ResultReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    async fn pull_task(
        &self,
        _session_id: &str,
        _deadline: Duration,
    ) -> Result<WrappedTask, Status> {
        self.pull_count.fetch_add(1, Ordering::SeqCst);
        let next = self.pulls.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(signal(SessionState::EndTask)))
    }

    async fn report_result(&self, report: ResultReport, _deadline: Duration) -> Result<(), Status> {
        if let Some(status) = self.report_failures.lock().unwrap().pop_front() {
            return Err(status);
        }
        self.reports.lock().unwrap().push(report);
        Ok(())
    }
}

type Responder = Box<dyn Fn(usize, &Bytes) -> Result<Vec<Bytes>, Status> + Send + Sync>;

/// Invoker whose replies come from a closure of (call index, payload).
pub struct ScriptedInvoker {
    responder: Responder,
    calls: AtomicUsize,
}

impl ScriptedInvoker {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(usize, &Bytes) -> Result<Vec<Bytes>, Status> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn echo() -> Self {
        Self::new(|_, payload| Ok(vec![payload.clone()]))
    }

    pub fn failing(code: Code) -> Self {
        Self::new(move |_, _| Err(Status::new(code, "scripted failure")))
    }

    /// Duplex replies with `n` copies of the request.
    pub fn responses(n: usize) -> Self {
        Self::new(move |_, payload| Ok(vec![payload.clone(); n]))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn respond(&self, payload: &Bytes) -> Result<Vec<Bytes>, Status> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.responder)(index, payload)
    }
}

#[async_trait]
impl MethodInvoker for ScriptedInvoker {
    async fn unary(
        &self,
        _method: &MethodDescriptor,
        payload: Bytes,
        _timeout: Duration,
    ) -> Result<Bytes, Status> {
        let replies = self.respond(&payload)?;
        Ok(replies.into_iter().next().unwrap_or_default())
    }

    async fn duplex(
        &self,
        _method: &MethodDescriptor,
        payload: Bytes,
        _timeout: Duration,
    ) -> Result<Vec<Bytes>, Status> {
        self.respond(&payload)
    }
}
