//! Ports - 抽象化レイヤー
//!
//! エージェントが依存する外部システムへのインターフェース。
//! - **Dispatcher**: タスク配布元（pull / report）
//! - **MethodInvoker**: サービス子プロセスへの汎用 RPC
//!
//! 本番実装は `impls`（tonic）、テストではスクリプト化した fake を使う。

pub mod dispatcher;
pub mod invoker;

pub use self::dispatcher::Dispatcher;
pub use self::invoker::MethodInvoker;
