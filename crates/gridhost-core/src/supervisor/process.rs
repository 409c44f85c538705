//! ServiceSupervisor - 子プロセスの状態機械
//!
//! # 流れ
//! 1. `load_with_retry`: 猶予タイマー開始 → (初回のみ) 依存インストール →
//!    空きポート探索 → 起動 → 接続ハンドル差し替え → `Ready`
//! 2. `monitor`: 一定間隔で生存確認。終了していたら `Crashed` → `Restarting` →
//!    再ロード（リトライ上限を超えたら致命的）
//! 3. `stop`: 子プロセスを kill して `Stopped`（キャンセル後、ワーカーが捌き終えてから）

use std::sync::Arc;

use tokio::process::Child;
use tokio::sync::{Mutex, OnceCell, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::launch::install_dependencies;
use super::port::{find_free_port, is_port_free};
use super::{InitTimer, LaunchError, LaunchPlan};
use crate::config::{AgentConfig, AgentTimings};
use crate::impls::{GrpcInvoker, ServiceConnection};
use crate::retry::{RetryDirective, RetryPolicy};

/// Relaunches on a fresh port when the child dies at once and its port is taken.
const MAX_PORT_REPROBES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    NotStarted,
    Starting,
    Ready,
    Crashed,
    Restarting,
    Stopped,
}

impl ServiceState {
    pub fn is_ready(self) -> bool {
        self == ServiceState::Ready
    }
}

pub struct ServiceSupervisor {
    plan: LaunchPlan,
    session_id: String,
    service_host: String,
    timings: AgentTimings,
    connection: ServiceConnection,
    init_timer: Arc<InitTimer>,
    state_tx: watch::Sender<ServiceState>,
    child: Mutex<Option<Child>>,
    dependencies: OnceCell<()>,
}

impl ServiceSupervisor {
    pub fn new(config: &AgentConfig, connection: ServiceConnection) -> Self {
        let plan = LaunchPlan::resolve(config.runtime_language, &config.resolved_service_path());
        let (state_tx, _) = watch::channel(ServiceState::NotStarted);
        Self {
            plan,
            session_id: config.session_id.clone(),
            service_host: config.service_host_name.clone(),
            timings: config.timings.clone(),
            connection,
            init_timer: Arc::new(InitTimer::new(config.service_init_timeout())),
            state_tx,
            child: Mutex::new(None),
            dependencies: OnceCell::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ServiceState {
        *self.state_tx.borrow()
    }

    pub fn init_timer(&self) -> Arc<InitTimer> {
        Arc::clone(&self.init_timer)
    }

    fn set_state(&self, state: ServiceState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!(from = ?previous, to = ?state, "service state changed");
        }
    }

    /// Full load sequence under the agent retry policy. Returns the bound port.
    pub async fn load_with_retry(&self) -> Result<u16, LaunchError> {
        self.init_timer.start();
        let policy = RetryPolicy::fixed(self.timings.retry_interval, self.timings.max_retries);
        policy
            .execute(
                || self.load_once(),
                |err, state| {
                    warn!(error = %err, attempt = state.attempt_count, "service load failed");
                    match err {
                        // a broken manifest will not fix itself
                        LaunchError::DependencyInstall(_) => RetryDirective::Abort,
                        _ => RetryDirective::Retry,
                    }
                },
            )
            .await
    }

    async fn load_once(&self) -> Result<u16, LaunchError> {
        if self.state() != ServiceState::Restarting {
            self.set_state(ServiceState::Starting);
        }
        if let Some(manifest) = &self.plan.requirements {
            self.dependencies
                .get_or_try_init(|| install_dependencies(manifest))
                .await?;
        }

        let mut port = find_free_port()?;
        for _ in 0..MAX_PORT_REPROBES {
            info!(port, command = %self.plan.display(), "starting service");
            let mut child = self
                .plan
                .command(port, &self.session_id, &self.service_host)
                .spawn()
                .map_err(|source| LaunchError::Spawn {
                    program: self.plan.program.to_string_lossy().into_owned(),
                    source,
                })?;

            match child.try_wait() {
                Ok(None) => {
                    self.attach(child, port).await?;
                    return Ok(port);
                }
                Ok(Some(status)) if is_port_free(port) => {
                    error!(port, %status, "service exited on start");
                    return Err(LaunchError::ExitedOnStart(status));
                }
                Ok(Some(status)) => {
                    info!(port, %status, "port taken, searching another");
                    port = find_free_port()?;
                }
                Err(source) => {
                    return Err(LaunchError::Spawn {
                        program: self.plan.display(),
                        source,
                    });
                }
            }
        }
        Err(LaunchError::NoFreePort)
    }

    async fn attach(&self, child: Child, port: u16) -> Result<(), LaunchError> {
        let invoker = GrpcInvoker::connect_lazy(&self.service_host, port).map_err(|source| {
            LaunchError::Endpoint {
                address: format!("{}:{port}", self.service_host),
                source,
            }
        })?;
        *self.child.lock().await = Some(child);
        let generation = self.connection.replace(Arc::new(invoker)).await;
        info!(port, generation, "service ready");
        self.set_state(ServiceState::Ready);
        Ok(())
    }

    /// `true` while a child is attached and has not exited.
    pub async fn is_alive(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Poll liveness until cancelled. Restart exhaustion is returned as an error.
    ///
    /// Cancellation leaves the child running so queued tasks can drain; the
    /// owner calls [`ServiceSupervisor::stop`] once the workers are done.
    pub async fn monitor(&self, cancel: CancellationToken) -> Result<(), LaunchError> {
        loop {
            if !self.is_alive().await {
                warn!("service process is not running, restarting");
                self.set_state(ServiceState::Crashed);
                self.connection.clear().await;
                self.child.lock().await.take();
                self.set_state(ServiceState::Restarting);

                let reload = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = self.load_with_retry() => r,
                };
                if let Err(err) = reload {
                    error!(error = %err, "service could not be restarted");
                    self.set_state(ServiceState::Crashed);
                    return Err(err);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.timings.monitor_interval) => {}
            }
        }
        info!("service monitor stopped");
        Ok(())
    }

    /// Kill the child, drop the connection and move to `Stopped`.
    pub async fn stop(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill service process");
            }
        }
        self.connection.clear().await;
        self.init_timer.stop();
        self.set_state(ServiceState::Stopped);
    }
}
