use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::{FailureBreaker, TaskExecutor, TaskQueue};
use crate::config::AgentTimings;
use crate::error::AgentError;
use crate::ports::Dispatcher;
use crate::proto::ResultReport;
use crate::retry::{RetryDirective, RetryPolicy};
use crate::supervisor::ServiceState;

/// Everything a dispatch worker reads. Shared by all workers of a pool.
pub struct WorkerContext {
    pub queue: Arc<TaskQueue>,
    pub executor: Arc<TaskExecutor>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub service_state: watch::Receiver<ServiceState>,
    pub session_ended: Arc<AtomicBool>,
    pub breaker: Arc<FailureBreaker>,
    pub timings: AgentTimings,
    /// Process-wide cancellation. Workers still drain the queue after it fires.
    pub cancel: CancellationToken,
}

/// Worker pool handle.
/// - `halt()` で全ワーカーが次のループで止まる（実行中の呼び出しは待つ）
/// - ワーカーの 1 つが致命的エラーで抜けると、残りにも halt が伝わる
/// - `join()` で全ワーカーの終了を待ち、最初のエラーを返す
pub struct DispatchWorkerPool {
    halt: CancellationToken,
    joins: Vec<JoinHandle<Result<(), AgentError>>>,
}

impl DispatchWorkerPool {
    /// Spawn `n` workers.
    pub fn spawn(n: usize, ctx: Arc<WorkerContext>) -> Self {
        let halt = CancellationToken::new();
        let joins = (0..n)
            .map(|worker_id| {
                let ctx = Arc::clone(&ctx);
                let halt = halt.clone();
                tokio::spawn(async move {
                    let result = worker_loop(worker_id, &ctx, &halt).await;
                    if result.is_err() {
                        halt.cancel();
                    }
                    result
                })
            })
            .collect();
        Self { halt, joins }
    }

    pub fn halt(&self) {
        self.halt.cancel();
    }

    pub fn halt_token(&self) -> CancellationToken {
        self.halt.clone()
    }

    pub async fn join(self) -> Result<(), AgentError> {
        let mut first_error = None;
        for join in self.joins {
            let result = join.await.unwrap_or_else(|e| Err(AgentError::from(e)));
            if let Err(err) = result {
                self.halt.cancel();
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: &WorkerContext,
    halt: &CancellationToken,
) -> Result<(), AgentError> {
    debug!(worker_id, "dispatch worker started");
    loop {
        if halt.is_cancelled() || ctx.breaker.is_tripped() {
            debug!(worker_id, "dispatch worker halted");
            return Ok(());
        }

        if ctx.queue.is_empty() {
            if ctx.session_ended.load(Ordering::SeqCst) {
                debug!(worker_id, "queue drained, dispatch worker exiting");
                return Ok(());
            }
            pause(halt, ctx.timings.queue_empty_interval).await;
            continue;
        }

        // ready かどうかは dequeue の前に見る（未 ready なら取り出さない）
        if !ctx.service_state.borrow().is_ready() {
            if ctx.cancel.is_cancelled() {
                warn!(
                    worker_id,
                    queued = ctx.queue.len(),
                    "cancelled while service is down, leaving queued tasks"
                );
                return Ok(());
            }
            debug!(worker_id, "service unavailable, waiting");
            pause(halt, ctx.timings.service_wait_interval).await;
            continue;
        }

        let Some(task) = ctx.queue.pop() else {
            continue;
        };
        let report = ctx.executor.execute(&task).await?;
        send_report(ctx, report).await?;
    }
}

async fn send_report(ctx: &WorkerContext, report: ResultReport) -> Result<(), AgentError> {
    let policy = RetryPolicy::fixed(ctx.timings.retry_interval, ctx.timings.max_retries);
    policy
        .execute(
            || {
                ctx.dispatcher
                    .report_result(report.clone(), ctx.timings.dispatcher_deadline)
            },
            |status, state| {
                warn!(
                    task_id = %report.task_id,
                    error = %status,
                    attempt = state.attempt_count,
                    "sending result failed"
                );
                RetryDirective::Retry
            },
        )
        .await
        .map_err(|status| AgentError::dispatcher("report_result", status))?;
    info!(task_id = %report.task_id, outcome = ?report.task_outcome(), "result reported");
    Ok(())
}

async fn pause(halt: &CancellationToken, delay: Duration) {
    tokio::select! {
        _ = halt.cancelled() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::TaskFetchLoop;
    use crate::impls::ServiceConnection;
    use crate::observability::DispatchCounters;
    use crate::proto::{SessionState, TaskOutcome};
    use crate::supervisor::InitTimer;
    use crate::testing::{ScriptedDispatcher, ScriptedInvoker, running, signal};
    use std::collections::HashSet;
    use tonic::{Code, Status};

    struct Fixture {
        ctx: Arc<WorkerContext>,
        state_tx: watch::Sender<ServiceState>,
        dispatcher: Arc<ScriptedDispatcher>,
        invoker: Arc<ScriptedInvoker>,
    }

    async fn fixture(
        dispatcher: ScriptedDispatcher,
        invoker: ScriptedInvoker,
        state: ServiceState,
    ) -> Fixture {
        let timings = AgentTimings::default();
        let dispatcher = Arc::new(dispatcher);
        let invoker = Arc::new(invoker);
        let connection = ServiceConnection::new();
        connection.replace(invoker.clone()).await;
        let breaker = Arc::new(FailureBreaker::new(timings.max_consecutive_failures));
        let executor = TaskExecutor::new(
            connection,
            Arc::new(InitTimer::new(Duration::ZERO)),
            Arc::clone(&breaker),
            Arc::new(DispatchCounters::default()),
            Duration::from_secs(3),
            RetryPolicy::fixed(timings.retry_interval, timings.max_retries),
        );
        let (state_tx, service_state) = watch::channel(state);
        let ctx = Arc::new(WorkerContext {
            queue: Arc::new(TaskQueue::new()),
            executor: Arc::new(executor),
            dispatcher: dispatcher.clone(),
            service_state,
            session_ended: Arc::new(AtomicBool::new(false)),
            breaker,
            timings,
            cancel: CancellationToken::new(),
        });
        Fixture {
            ctx,
            state_tx,
            dispatcher,
            invoker,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn three_tasks_then_end_are_dispatched_exactly_once() {
        let script = ScriptedDispatcher::new([
            Ok(running("a")),
            Ok(running("b")),
            Ok(running("c")),
            Ok(signal(SessionState::EndTask)),
        ]);
        let f = fixture(script, ScriptedInvoker::echo(), ServiceState::Ready).await;
        let fetch = TaskFetchLoop::new(
            f.dispatcher.clone(),
            Arc::clone(&f.ctx.queue),
            "session-1",
            3,
            f.ctx.timings.clone(),
            Arc::clone(&f.ctx.session_ended),
        );

        let pool = DispatchWorkerPool::spawn(2, Arc::clone(&f.ctx));
        fetch.run(CancellationToken::new()).await.unwrap();
        pool.join().await.unwrap();

        assert_eq!(f.dispatcher.pull_count(), 4);
        let reports = f.dispatcher.reports();
        let ids: HashSet<_> = reports.iter().map(|r| r.task_id.clone()).collect();
        assert_eq!(reports.len(), 3);
        assert_eq!(ids, HashSet::from(["a".to_string(), "b".to_string(), "c".to_string()]));
        assert!(reports.iter().all(|r| r.task_outcome() == TaskOutcome::Finished));
        assert_eq!(f.invoker.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn tasks_stay_queued_until_service_is_ready() {
        let f = fixture(
            ScriptedDispatcher::default(),
            ScriptedInvoker::echo(),
            ServiceState::Starting,
        )
        .await;
        f.ctx.queue.push(running("a"));
        f.ctx.session_ended.store(true, Ordering::SeqCst);

        let pool = DispatchWorkerPool::spawn(1, Arc::clone(&f.ctx));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(f.ctx.queue.len(), 1);
        assert_eq!(f.invoker.calls(), 0);

        f.state_tx.send_replace(ServiceState::Ready);
        pool.join().await.unwrap();

        assert!(f.ctx.queue.is_empty());
        assert_eq!(f.dispatcher.reports().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_trip_stops_dequeuing() {
        let f = fixture(
            ScriptedDispatcher::default(),
            ScriptedInvoker::failing(Code::ResourceExhausted),
            ServiceState::Ready,
        )
        .await;
        for i in 0..8 {
            f.ctx.queue.push(running(&i.to_string()));
        }
        f.ctx.session_ended.store(true, Ordering::SeqCst);

        let err = DispatchWorkerPool::spawn(1, Arc::clone(&f.ctx))
            .join()
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::CircuitOpen { failures: 6 }));
        // five requeues were reported; the sixth trips the breaker before its report
        assert_eq!(f.dispatcher.reports().len(), 5);
        assert_eq!(f.ctx.queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn report_is_retried_then_fatal() {
        let flaky = ScriptedDispatcher::default()
            .failing_reports([Status::unavailable("down"), Status::unavailable("down")]);
        let f = fixture(flaky, ScriptedInvoker::echo(), ServiceState::Ready).await;
        f.ctx.queue.push(running("a"));
        f.ctx.session_ended.store(true, Ordering::SeqCst);

        DispatchWorkerPool::spawn(1, Arc::clone(&f.ctx)).join().await.unwrap();
        assert_eq!(f.dispatcher.reports().len(), 1);

        let dead = ScriptedDispatcher::default()
            .failing_reports((0..4).map(|_| Status::unavailable("down")));
        let f = fixture(dead, ScriptedInvoker::echo(), ServiceState::Ready).await;
        f.ctx.queue.push(running("a"));
        f.ctx.session_ended.store(true, Ordering::SeqCst);

        let err = DispatchWorkerPool::spawn(1, Arc::clone(&f.ctx))
            .join()
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Dispatcher { operation: "report_result", .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_with_service_down_abandons_queue() {
        let f = fixture(
            ScriptedDispatcher::default(),
            ScriptedInvoker::echo(),
            ServiceState::Crashed,
        )
        .await;
        f.ctx.queue.push(running("a"));
        f.ctx.cancel.cancel();

        DispatchWorkerPool::spawn(2, Arc::clone(&f.ctx)).join().await.unwrap();

        assert_eq!(f.ctx.queue.len(), 1);
        assert!(f.dispatcher.reports().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn halt_stops_idle_workers() {
        let f = fixture(
            ScriptedDispatcher::default(),
            ScriptedInvoker::echo(),
            ServiceState::Ready,
        )
        .await;

        let pool = DispatchWorkerPool::spawn(3, Arc::clone(&f.ctx));
        pool.halt();
        pool.join().await.unwrap();
    }
}
