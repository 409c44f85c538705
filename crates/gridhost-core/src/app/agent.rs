//! HostAgent - 全体のワイヤリング
//!
//! # 起動順
//! 1. サービスの初回ロード（リトライ付き、失敗は致命的）
//! 2. monitor / fetch loop / worker pool を並行に起動
//! 3. いずれかが致命的エラーで終わればエージェント全体を止める
//! 4. ワーカーが全員抜けたら monitor を止め、子プロセスを kill する
//!
//! キャンセルは fetch loop と monitor を止めるだけで、ワーカーはキューを
//! 捌き切ってから終わる。

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use ulid::Ulid;

use crate::app::{
    DispatchWorkerPool, FailureBreaker, TaskExecutor, TaskFetchLoop, TaskQueue, WorkerContext,
};
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::impls::{GrpcDispatcher, ServiceConnection};
use crate::observability::{DispatchCounters, DispatchStats};
use crate::ports::Dispatcher;
use crate::retry::RetryPolicy;
use crate::supervisor::{LaunchError, ServiceSupervisor};

pub struct HostAgent {
    agent_id: Ulid,
    config: AgentConfig,
    dispatcher: Arc<dyn Dispatcher>,
}

impl HostAgent {
    /// Agent talking to the configured dispatcher over gRPC.
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let dispatcher = GrpcDispatcher::connect_lazy(&config.dispatcher_address)?;
        Ok(Self::with_dispatcher(config, Arc::new(dispatcher)))
    }

    pub fn with_dispatcher(config: AgentConfig, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            agent_id: Ulid::new(),
            config,
            dispatcher,
        }
    }

    pub fn agent_id(&self) -> Ulid {
        self.agent_id
    }

    /// Run until the session ends and the queue drains, or a fatal error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<DispatchStats, AgentError> {
        let span = info_span!(
            "host_agent",
            agent_id = %self.agent_id,
            session_id = %self.config.session_id,
        );
        self.run_inner(cancel).instrument(span).await
    }

    async fn run_inner(&self, cancel: CancellationToken) -> Result<DispatchStats, AgentError> {
        info!(config = %self.config.to_json(), "host agent starting");
        let timings = self.config.timings.clone();
        let counters = Arc::new(DispatchCounters::default());
        let connection = ServiceConnection::new();
        let supervisor = Arc::new(ServiceSupervisor::new(&self.config, connection.clone()));

        let loaded = tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancelled before the service was loaded");
                supervisor.stop().await;
                return Ok(counters.snapshot());
            }
            r = supervisor.load_with_retry() => r,
        };
        if let Err(err) = loaded {
            error!(error = %err, "initial service load failed");
            supervisor.stop().await;
            return Err(err.into());
        }

        let queue = Arc::new(TaskQueue::new());
        let session_ended = Arc::new(AtomicBool::new(false));
        let breaker = Arc::new(FailureBreaker::new(timings.max_consecutive_failures));
        let executor = TaskExecutor::new(
            connection,
            supervisor.init_timer(),
            Arc::clone(&breaker),
            Arc::clone(&counters),
            self.config.service_call_timeout(),
            RetryPolicy::fixed(timings.retry_interval, timings.max_retries),
        );

        let monitor_token = cancel.child_token();
        let fetch_token = cancel.child_token();

        let mut monitor = {
            let supervisor = Arc::clone(&supervisor);
            let token = monitor_token.clone();
            tokio::spawn(async move { supervisor.monitor(token).await }.in_current_span())
        };

        let fetch_loop = TaskFetchLoop::new(
            Arc::clone(&self.dispatcher),
            Arc::clone(&queue),
            self.config.session_id.clone(),
            self.config.prefetch_count,
            timings.clone(),
            Arc::clone(&session_ended),
        );
        let mut fetch = {
            let token = fetch_token.clone();
            tokio::spawn(async move { fetch_loop.run(token).await }.in_current_span())
        };

        let ctx = Arc::new(WorkerContext {
            queue,
            executor: Arc::new(executor),
            dispatcher: Arc::clone(&self.dispatcher),
            service_state: supervisor.subscribe(),
            session_ended,
            breaker,
            timings,
            cancel: cancel.clone(),
        });
        let pool = DispatchWorkerPool::spawn(self.config.service_concurrency, ctx);
        let halt = pool.halt_token();
        let mut workers = tokio::spawn(pool.join().in_current_span());

        let mut fetch_done = false;
        let mut monitor_done = false;
        let mut workers_done = false;
        // fetch / monitor を先に見る。fetch が失敗してもワーカーは Ok で抜ける
        let mut outcome = loop {
            tokio::select! {
                biased;
                r = &mut fetch, if !fetch_done => {
                    fetch_done = true;
                    if let Err(err) = flatten(r) {
                        break Err(err);
                    }
                }
                r = &mut monitor, if !monitor_done => {
                    monitor_done = true;
                    if let Err(err) = monitor_result(r) {
                        break Err(err);
                    }
                }
                r = &mut workers => {
                    workers_done = true;
                    break flatten(r);
                }
            }
        };

        if outcome.is_err() {
            halt.cancel();
        }
        fetch_token.cancel();
        monitor_token.cancel();
        if !fetch_done {
            let fetched = flatten(fetch.await);
            outcome = outcome.and(fetched);
        }
        if !monitor_done {
            let monitored = monitor_result(monitor.await);
            outcome = outcome.and(monitored);
        }
        if let Err(err) = &outcome {
            error!(error = %err, "host agent failing");
            halt.cancel();
        }
        if !workers_done {
            if let Err(err) = flatten(workers.await) {
                warn!(error = %err, "worker pool stopped with a second error");
            }
        }
        supervisor.stop().await;

        let stats = counters.snapshot();
        info!(stats = %stats.to_json(), "host agent stopped");
        outcome.map(|()| stats)
    }
}

fn flatten(joined: Result<Result<(), AgentError>, JoinError>) -> Result<(), AgentError> {
    joined.map_err(AgentError::from).and_then(|r| r)
}

fn monitor_result(joined: Result<Result<(), LaunchError>, JoinError>) -> Result<(), AgentError> {
    match joined {
        Ok(r) => r.map_err(AgentError::ServiceLoad),
        Err(err) => Err(err.into()),
    }
}
