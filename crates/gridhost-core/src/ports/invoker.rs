//! MethodInvoker port - スキーマを知らないまま bytes を運ぶ汎用呼び出し

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tonic::Status;

use crate::domain::MethodDescriptor;

/// Calls an arbitrary method on the supervised service.
///
/// Payloads are opaque encoded messages; nothing here knows their schema.
#[async_trait]
pub trait MethodInvoker: Send + Sync {
    /// One request, one response.
    async fn unary(
        &self,
        method: &MethodDescriptor,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, Status>;

    /// Open a bidirectional stream, send `payload`, half-close, and collect
    /// every response until the server closes its side.
    async fn duplex(
        &self,
        method: &MethodDescriptor,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Vec<Bytes>, Status>;
}
