//! gridhost-core
//!
//! Host agent building blocks for the gridhost task grid.
//!
//! # モジュール構成
//! - **proto**: dispatcher / service 間のワイヤーメッセージ（prost）
//! - **domain**: メソッド記述子、呼び出し結果の分類
//! - **ports**: 抽象化レイヤー（Dispatcher, MethodInvoker）
//! - **impls**: tonic による ports の実装、接続ハンドル
//! - **app**: fetch loop, worker pool, task executor, agent wiring
//! - **supervisor**: サービス子プロセスの起動・監視・再起動
//! - **retry**: 全ネットワーク操作で共有するリトライ/バックオフ
//! - **config**: 環境変数からの設定読み込みと検証
//! - **observability**: tracing の初期化と統計スナップショット

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod proto;
pub mod retry;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use app::HostAgent;
pub use config::{AgentConfig, AgentTimings, RuntimeLanguage};
pub use error::{AgentError, ConfigError};
