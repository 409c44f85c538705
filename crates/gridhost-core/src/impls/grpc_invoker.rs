//! GrpcInvoker - サービス子プロセスへの汎用 gRPC 呼び出し
//!
//! `/{service}/{method}` を文字列で組み立て、`RawBytesCodec` で payload を
//! そのまま送受信する。サービスのスキーマはコンパイル時に一切知らない。

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tonic::Status;
use tonic::client::Grpc;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};

use crate::domain::MethodDescriptor;
use crate::impls::RawBytesCodec;
use crate::ports::MethodInvoker;

#[derive(Debug, Clone)]
pub struct GrpcInvoker {
    channel: Channel,
}

impl GrpcInvoker {
    /// Build a channel to `http://{host}:{port}` that connects on first use.
    pub fn connect_lazy(host: &str, port: u16) -> Result<Self, tonic::transport::Error> {
        let endpoint = Endpoint::from_shared(format!("http://{host}:{port}"))?;
        Ok(Self {
            channel: endpoint.connect_lazy(),
        })
    }

    async fn client(
        &self,
        method: &MethodDescriptor,
    ) -> Result<(Grpc<Channel>, PathAndQuery), Status> {
        let path = PathAndQuery::try_from(method.path()).map_err(|e| {
            Status::invalid_argument(format!("bad method path {}: {e}", method.path()))
        })?;
        let mut grpc = Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("service not ready: {e}")))?;
        Ok((grpc, path))
    }
}

/// Bound `call` locally as well, in case the server ignores grpc-timeout.
async fn with_deadline<T, F>(timeout: Duration, call: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| Status::deadline_exceeded(format!("no response within {timeout:?}")))?
}

#[async_trait]
impl MethodInvoker for GrpcInvoker {
    async fn unary(
        &self,
        method: &MethodDescriptor,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, Status> {
        with_deadline(timeout, async {
            let (mut grpc, path) = self.client(method).await?;
            let mut request = tonic::Request::new(payload);
            request.set_timeout(timeout);
            let response = grpc.unary(request, path, RawBytesCodec).await?;
            Ok::<_, Status>(response.into_inner())
        })
        .await
    }

    async fn duplex(
        &self,
        method: &MethodDescriptor,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Vec<Bytes>, Status> {
        with_deadline(timeout, async {
            let (mut grpc, path) = self.client(method).await?;
            // one message, then the stream ends: that is the half-close
            let outbound = futures::stream::once(futures::future::ready(payload));
            let mut request = tonic::Request::new(outbound);
            request.set_timeout(timeout);

            let mut inbound = grpc.streaming(request, path, RawBytesCodec).await?.into_inner();
            let mut responses = Vec::new();
            while let Some(message) = inbound.message().await? {
                responses.push(message);
            }
            Ok::<_, Status>(responses)
        })
        .await
    }
}
