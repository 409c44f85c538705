use thiserror::Error;

use crate::supervisor::LaunchError;

/// Configuration problems. Always fatal, raised before any loop starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} must be set")]
    Missing(&'static str),

    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("unsupported service language '{0}', expected native, managed or interpreted")]
    UnknownLanguage(String),

    #[error("dispatcher address '{0}' is not a valid endpoint")]
    Endpoint(String),
}

/// Errors that terminate the whole agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("dispatcher {operation} failed after retries: {status}")]
    Dispatcher {
        operation: &'static str,
        status: Box<tonic::Status>,
    },

    #[error("service could not be loaded: {0}")]
    ServiceLoad(#[from] LaunchError),

    #[error("service failed {failures} tasks in a row, giving up")]
    CircuitOpen { failures: u32 },

    #[error("background loop aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl AgentError {
    pub fn dispatcher(operation: &'static str, status: tonic::Status) -> Self {
        AgentError::Dispatcher {
            operation,
            status: Box::new(status),
        }
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            AgentError::Config(_) => 2,
            AgentError::Dispatcher { .. } => 3,
            AgentError::ServiceLoad(_) => 4,
            AgentError::CircuitOpen { .. } => 5,
            AgentError::Join(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_and_non_zero() {
        let errors = [
            AgentError::from(ConfigError::Missing("GRIDHOST_SESSION_ID")),
            AgentError::dispatcher("pull_task", tonic::Status::unavailable("down")),
            AgentError::ServiceLoad(LaunchError::NoFreePort),
            AgentError::CircuitOpen { failures: 6 },
        ];
        let codes: Vec<u8> = errors.iter().map(AgentError::exit_code).collect();
        assert_eq!(codes, vec![2, 3, 4, 5]);
    }

    #[test]
    fn dispatcher_error_mentions_operation() {
        let err = AgentError::dispatcher("report_result", tonic::Status::unavailable("down"));
        assert!(err.to_string().contains("report_result"));
    }
}
