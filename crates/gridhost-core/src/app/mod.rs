//! App - アプリケーション層
//!
//! ports を組み合わせてエージェントの処理を組み立てる。
//!
//! # 主要コンポーネント
//! - **HostAgent**: 全体のワイヤリングと実行（load → monitor / fetch / workers）
//! - **TaskFetchLoop**: dispatcher からの先読み
//! - **TaskQueue**: fetch loop とワーカー間の FIFO
//! - **DispatchWorkerPool**: N 本のワーカー（dequeue → invoke → report）
//! - **TaskExecutor**: 1 タスクの呼び出しと結果の分類
//! - **FailureBreaker**: 連続失敗のサーキットブレーカー

pub mod agent;
pub mod breaker;
pub mod executor;
pub mod fetch_loop;
pub mod queue;
pub mod worker_pool;

pub use self::agent::HostAgent;
pub use self::breaker::FailureBreaker;
pub use self::executor::{InvokeError, TaskExecutor};
pub use self::fetch_loop::TaskFetchLoop;
pub use self::queue::TaskQueue;
pub use self::worker_pool::{DispatchWorkerPool, WorkerContext};
