//! Agent configuration.
//!
//! # 設計
//! - 環境変数から一度だけ読み込み、コンストラクタ内でまとめて検証する
//! - 必須項目の欠落・ルール違反は `ConfigError`（起動前に終了）
//! - 数値のパース失敗は warn を出してデフォルト値を維持する
//! - テストでは `from_lookup` に HashMap を渡す

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::error::ConfigError;

pub const ENV_DISPATCHER_ADDRESS: &str = "GRIDHOST_DISPATCHER_ADDRESS";
pub const ENV_SVC_HOSTNAME: &str = "GRIDHOST_SVC_HOSTNAME";
pub const ENV_SVC_TIMEOUT: &str = "GRIDHOST_SVC_TIMEOUT";
pub const ENV_SVC_CONCURRENCY: &str = "GRIDHOST_SVC_CONCURRENCY";
pub const ENV_PREFETCH_COUNT: &str = "GRIDHOST_PREFETCH_COUNT";
pub const ENV_SESSION_ID: &str = "GRIDHOST_SESSION_ID";
pub const ENV_SVC_INIT_TIMEOUT: &str = "GRIDHOST_SVC_INIT_TIMEOUT";
pub const ENV_SVC_LANGUAGE: &str = "GRIDHOST_SVC_LANGUAGE";
pub const ENV_SVC_PATH: &str = "GRIDHOST_SVC_PATH";
pub const ENV_WORKING_DIR: &str = "GRIDHOST_WORKING_DIR";

/// Injected into the child service process.
pub const ENV_SVC_PORT: &str = "GRIDHOST_SVC_PORT";

/// How the service binary is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeLanguage {
    /// Self-contained executable.
    Native,
    /// Needs a runtime launcher (`dotnet`, `java -jar`).
    Managed,
    /// Script run by an interpreter (`python3`).
    Interpreted,
}

impl FromStr for RuntimeLanguage {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "managed" | "csharp" | "dotnet" | "java" => Ok(Self::Managed),
            "interpreted" | "python" => Ok(Self::Interpreted),
            _ => Err(ConfigError::UnknownLanguage(s.to_string())),
        }
    }
}

/// Validated agent configuration. Immutable after construction.
#[derive(Debug, Clone, Serialize)]
pub struct AgentConfig {
    pub dispatcher_address: String,
    pub service_host_name: String,
    pub service_call_timeout_ms: u64,
    pub service_concurrency: usize,
    pub prefetch_count: usize,
    pub session_id: String,
    pub service_init_timeout_ms: u64,
    pub runtime_language: RuntimeLanguage,
    pub service_path: PathBuf,
    pub working_directory: PathBuf,

    #[serde(skip)]
    pub timings: AgentTimings,
}

impl AgentConfig {
    pub const DEFAULT_SERVICE_HOST: &'static str = "localhost";
    pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 3000;
    pub const DEFAULT_CONCURRENCY: usize = 1;
    pub const DEFAULT_PREFETCH: usize = 1;
    pub const DEFAULT_INIT_TIMEOUT_MS: u64 = 0;

    /// Read from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through an arbitrary lookup.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let dispatcher_address = required(&lookup, ENV_DISPATCHER_ADDRESS)?;
        let session_id = required(&lookup, ENV_SESSION_ID)?;
        let language_raw = required(&lookup, ENV_SVC_LANGUAGE)?;
        let runtime_language: RuntimeLanguage = language_raw.parse()?;
        let service_path = PathBuf::from(required(&lookup, ENV_SVC_PATH)?);
        let working_directory = PathBuf::from(required(&lookup, ENV_WORKING_DIR)?);

        let service_host_name = match lookup(ENV_SVC_HOSTNAME) {
            Some(v) if v.trim().is_empty() => {
                return Err(ConfigError::Invalid {
                    key: ENV_SVC_HOSTNAME,
                    reason: "must not be empty".to_string(),
                });
            }
            Some(v) => v.trim().to_string(),
            None => Self::DEFAULT_SERVICE_HOST.to_string(),
        };

        let service_call_timeout_ms =
            numeric(&lookup, ENV_SVC_TIMEOUT, Self::DEFAULT_CALL_TIMEOUT_MS);
        let service_concurrency = numeric(&lookup, ENV_SVC_CONCURRENCY, Self::DEFAULT_CONCURRENCY);
        let prefetch_count = numeric(&lookup, ENV_PREFETCH_COUNT, Self::DEFAULT_PREFETCH);
        let service_init_timeout_ms =
            numeric(&lookup, ENV_SVC_INIT_TIMEOUT, Self::DEFAULT_INIT_TIMEOUT_MS);

        if service_call_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: ENV_SVC_TIMEOUT,
                reason: "must be greater than zero".to_string(),
            });
        }
        if service_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: ENV_SVC_CONCURRENCY,
                reason: "must be greater than zero".to_string(),
            });
        }
        if prefetch_count == 0 {
            warn!(
                key = ENV_PREFETCH_COUNT,
                "prefetch count is 0, the agent will never pull tasks"
            );
        }

        Ok(Self {
            dispatcher_address,
            service_host_name,
            service_call_timeout_ms,
            service_concurrency,
            prefetch_count,
            session_id,
            service_init_timeout_ms,
            runtime_language,
            service_path,
            working_directory,
            timings: AgentTimings::default(),
        })
    }

    pub fn with_timings(mut self, timings: AgentTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn service_call_timeout(&self) -> Duration {
        Duration::from_millis(self.service_call_timeout_ms)
    }

    pub fn service_init_timeout(&self) -> Duration {
        Duration::from_millis(self.service_init_timeout_ms)
    }

    /// Service file resolved against the working directory.
    pub fn resolved_service_path(&self) -> PathBuf {
        resolve(&self.working_directory, &self.service_path)
    }

    /// Single-line JSON rendering for the startup log.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("<unserializable: {e}>"))
    }
}

/// Engine timings. Fixed in production, shortened in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTimings {
    pub dispatcher_deadline: Duration,
    pub retry_interval: Duration,
    pub max_retries: u32,
    pub queue_full_interval: Duration,
    pub queue_empty_interval: Duration,
    pub service_wait_interval: Duration,
    pub monitor_interval: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for AgentTimings {
    fn default() -> Self {
        Self {
            dispatcher_deadline: Duration::from_millis(3000),
            retry_interval: Duration::from_millis(1000),
            max_retries: 3,
            queue_full_interval: Duration::from_millis(2000),
            queue_empty_interval: Duration::from_millis(1000),
            service_wait_interval: Duration::from_millis(2000),
            monitor_interval: Duration::from_millis(2000),
            max_consecutive_failures: 5,
        }
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn required<L>(lookup: &L, key: &'static str) -> Result<String, ConfigError>
where
    L: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn numeric<L, T>(lookup: &L, key: &'static str, default: T) -> T
where
    L: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            warn!(key, value = %raw, %default, "malformed value, keeping default");
            default
        }
    }
}
