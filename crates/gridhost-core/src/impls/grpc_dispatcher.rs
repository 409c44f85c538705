//! GrpcDispatcher - dispatcher への tonic クライアント

use std::time::Duration;

use async_trait::async_trait;
use tonic::Status;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::Uri;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};

use crate::error::ConfigError;
use crate::ports::Dispatcher;
use crate::proto::{
    Ack, GET_WRAPPED_TASK_PATH, GetTaskRequest, ResultReport, SEND_RESULT_PATH, WrappedTask,
};

#[derive(Debug, Clone)]
pub struct GrpcDispatcher {
    channel: Channel,
}

impl GrpcDispatcher {
    pub const DEFAULT_PORT: u16 = 5000;

    /// Lazily connected client. Fails only when `address` cannot form a URI.
    pub fn connect_lazy(address: &str) -> Result<Self, ConfigError> {
        let uri = normalize_address(address)?;
        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| ConfigError::Endpoint(format!("{address}: {e}")))?;
        Ok(Self {
            channel: endpoint.connect_lazy(),
        })
    }

    async fn ready(&self) -> Result<Grpc<Channel>, Status> {
        let mut grpc = Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("dispatcher not ready: {e}")))?;
        Ok(grpc)
    }
}

/// Accepts `host`, `host:port` or a full URI; fills in scheme and default port.
pub fn normalize_address(address: &str) -> Result<String, ConfigError> {
    let trimmed = address.trim().trim_end_matches('/');
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let uri: Uri = with_scheme
        .parse()
        .map_err(|_| ConfigError::Endpoint(address.to_string()))?;
    let (Some(scheme), Some(host)) = (uri.scheme_str(), uri.host()) else {
        return Err(ConfigError::Endpoint(address.to_string()));
    };
    let port = uri.port_u16().unwrap_or(GrpcDispatcher::DEFAULT_PORT);
    Ok(format!("{scheme}://{host}:{port}"))
}

#[async_trait]
impl Dispatcher for GrpcDispatcher {
    async fn pull_task(&self, session_id: &str, deadline: Duration) -> Result<WrappedTask, Status> {
        let mut grpc = self.ready().await?;
        let mut request = tonic::Request::new(GetTaskRequest {
            session_id: session_id.to_string(),
        });
        request.set_timeout(deadline);

        let codec = ProstCodec::<GetTaskRequest, WrappedTask>::default();
        let path = PathAndQuery::from_static(GET_WRAPPED_TASK_PATH);
        let response = tokio::time::timeout(deadline, grpc.unary(request, path, codec))
            .await
            .map_err(|_| Status::deadline_exceeded("GetWrappedTask timed out"))??;
        Ok(response.into_inner())
    }

    async fn report_result(&self, report: ResultReport, deadline: Duration) -> Result<(), Status> {
        let mut grpc = self.ready().await?;
        let mut request = tonic::Request::new(report);
        request.set_timeout(deadline);

        let codec = ProstCodec::<ResultReport, Ack>::default();
        let path = PathAndQuery::from_static(SEND_RESULT_PATH);
        tokio::time::timeout(deadline, grpc.unary(request, path, codec))
            .await
            .map_err(|_| Status::deadline_exceeded("SendResult timed out"))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("dispatcher", "http://dispatcher:5000")]
    #[case("dispatcher:7000", "http://dispatcher:7000")]
    #[case("http://10.0.0.4", "http://10.0.0.4:5000")]
    #[case("https://grid.example.com:443/", "https://grid.example.com:443")]
    #[case("[::1]:6000", "http://[::1]:6000")]
    fn address_normalization(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_address(raw).unwrap(), expected);
    }

    #[test]
    fn garbage_address_is_a_config_error() {
        assert!(matches!(
            normalize_address("not a host"),
            Err(ConfigError::Endpoint(_))
        ));
    }

    #[tokio::test]
    async fn connect_lazy_does_not_touch_network() {
        assert!(GrpcDispatcher::connect_lazy("unreachable.invalid").is_ok());
    }
}
