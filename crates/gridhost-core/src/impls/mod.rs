//! Impls - ports の本番実装
//!
//! # 含まれる実装
//! - **RawBytesCodec**: メッセージ型を知らずに bytes をそのまま運ぶ tonic codec
//! - **GrpcInvoker**: サービス子プロセスへの `MethodInvoker`
//! - **GrpcDispatcher**: dispatcher への `Dispatcher`
//! - **ServiceConnection**: supervisor が丸ごと差し替える接続ハンドル

pub mod codec;
pub mod connection;
pub mod grpc_dispatcher;
pub mod grpc_invoker;

pub use self::codec::RawBytesCodec;
pub use self::connection::{ConnectionSnapshot, ServiceConnection};
pub use self::grpc_dispatcher::GrpcDispatcher;
pub use self::grpc_invoker::GrpcInvoker;
