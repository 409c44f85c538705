use std::process::ExitCode;

use gridhost_core::observability::init_tracing;
use gridhost_core::{AgentConfig, AgentError, HostAgent};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    // (A) 環境変数から設定を読む（不正なら loop を起動する前に終了）
    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(err) => return fail(err.into()),
    };

    // (B) Ctrl-C でプロセス全体のキャンセルを発火
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("interrupt received, finishing queued tasks");
                    cancel.cancel();
                }
                Err(e) => error!(error = %e, "cannot listen for interrupt"),
            }
        });
    }

    // (C) エージェントを実行（EndTask を受けてキューが空になれば 0 で終了）
    let agent = match HostAgent::new(config) {
        Ok(agent) => agent,
        Err(err) => return fail(err),
    };
    info!(agent_id = %agent.agent_id(), "gridhost agent started");

    match agent.run(cancel).await {
        Ok(stats) => {
            info!(finished = stats.finished, requeued = stats.requeued, "session complete");
            ExitCode::SUCCESS
        }
        Err(err) => fail(err),
    }
}

fn fail(err: AgentError) -> ExitCode {
    error!(error = %err, exit_code = err.exit_code(), "host agent terminated");
    ExitCode::from(err.exit_code())
}
