//! Agent configuration loaded from the process environment.

use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;

pub const SERVER_URL_ENV: &str = "OUTPOST_SERVER_URL";
pub const AGENT_KEY_ENV: &str = "OUTPOST_AGENT_KEY";
pub const FILE_SERVER_URL_ENV: &str = "OUTPOST_FILE_SERVER_URL";
pub const WORKER_ENABLE_ENV: &str = "OUTPOST_WORKER_ENABLE";
pub const EAGER_REFRESH_THRESHOLD_ENV: &str = "OUTPOST_EAGER_REFRESH_THRESHOLD_MS";
pub const SCHEDULE_POLLING_ENV: &str = "OUTPOST_ENABLE_SCHEDULE_POLLING";
pub const POLLING_INTERVAL_ENV: &str = "OUTPOST_POLLING_INTERVAL_MS";
pub const POLLING_MAX_JITTER_ENV: &str = "OUTPOST_POLLING_MAX_JITTER_MS";
pub const SHUTDOWN_DRAIN_TIMEOUT_ENV: &str = "OUTPOST_SHUTDOWN_DRAIN_TIMEOUT_MS";
pub const ENV_VARS_JSON_ENV: &str = "OUTPOST_ENV_VARS_JSON";
pub const REQUEST_TIMEOUT_ENV: &str = "OUTPOST_REQUEST_TIMEOUT_MS";
/// Prefix of secret app variables exposed under the `Env` global.
pub const APP_ENV_SECRET_PREFIX: &str = "OUTPOST_APP_ENV_";

const DEFAULT_SERVER_URL: &str = "https://app.example.com";
const DEFAULT_FILE_SERVER_URL: &str = "http://localhost:8020/agent/v1/files";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
    #[error("{name} must be true or false, got '{value}'")]
    InvalidBool { name: &'static str, value: String },
    #[error("{name} must be a JSON object: {reason}")]
    InvalidJson { name: &'static str, reason: String },
}

/// Schedule polling settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub max_jitter: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { enabled: true, interval: Duration::from_millis(30_000), max_jitter: Duration::from_millis(5_000) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub server_url: String,
    pub agent_key: Option<String>,
    /// Bound into executions as `$fileServerUrl`.
    pub file_server_url: String,
    /// Bound into executions as `$flagWorker`.
    pub worker_enabled: bool,
    pub eager_refresh_threshold: Duration,
    pub polling: PollingConfig,
    /// `None` means drain in-flight work without a bound at shutdown.
    pub shutdown_drain_timeout: Option<Duration>,
    pub env_vars: Map<String, Value>,
    /// Secret app variables, already stripped of their prefix and lower-cased.
    pub app_env_secrets: Vec<(String, String)>,
    pub request_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            agent_key: None,
            file_server_url: DEFAULT_FILE_SERVER_URL.to_string(),
            worker_enabled: true,
            eager_refresh_threshold: Duration::from_millis(300_000),
            polling: PollingConfig::default(),
            shutdown_drain_timeout: None,
            env_vars: Map::new(),
            app_env_secrets: Vec::new(),
            request_timeout: Duration::from_millis(30_000),
        }
    }
}

impl AgentConfig {
    /// Reads every `OUTPOST_*` variable, falling back to defaults for the unset ones.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mut app_env_secrets: Vec<(String, String)> = std::env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(APP_ENV_SECRET_PREFIX).filter(|name| !name.is_empty()).map(|name| (name.to_ascii_lowercase(), value))
            })
            .collect();
        app_env_secrets.sort();

        Ok(Self {
            server_url: non_empty_var(SERVER_URL_ENV).unwrap_or(defaults.server_url),
            agent_key: non_empty_var(AGENT_KEY_ENV),
            file_server_url: non_empty_var(FILE_SERVER_URL_ENV).unwrap_or(defaults.file_server_url),
            worker_enabled: bool_var(WORKER_ENABLE_ENV)?.unwrap_or(defaults.worker_enabled),
            eager_refresh_threshold: millis_var(EAGER_REFRESH_THRESHOLD_ENV)?.unwrap_or(defaults.eager_refresh_threshold),
            polling: PollingConfig {
                enabled: bool_var(SCHEDULE_POLLING_ENV)?.unwrap_or(defaults.polling.enabled),
                interval: non_zero(POLLING_INTERVAL_ENV, millis_var(POLLING_INTERVAL_ENV)?)?.unwrap_or(defaults.polling.interval),
                max_jitter: millis_var(POLLING_MAX_JITTER_ENV)?.unwrap_or(defaults.polling.max_jitter),
            },
            shutdown_drain_timeout: millis_var(SHUTDOWN_DRAIN_TIMEOUT_ENV)?,
            env_vars: json_object_var(ENV_VARS_JSON_ENV)?.unwrap_or_default(),
            app_env_secrets,
            request_timeout: millis_var(REQUEST_TIMEOUT_ENV)?.unwrap_or(defaults.request_timeout),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn millis_var(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = non_empty_var(name) else {
        return Ok(None);
    };
    raw.parse::<u64>().map(|ms| Some(Duration::from_millis(ms))).map_err(|_| ConfigError::InvalidNumber { name, value: raw })
}

fn non_zero(name: &'static str, value: Option<Duration>) -> Result<Option<Duration>, ConfigError> {
    match value {
        Some(duration) if duration.is_zero() => Err(ConfigError::Zero { name }),
        other => Ok(other),
    }
}

fn bool_var(name: &'static str) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = non_empty_var(name) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(Some(true)),
        "false" | "0" | "no" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidBool { name, value: raw }),
    }
}

fn json_object_var(name: &'static str) -> Result<Option<Map<String, Value>>, ConfigError> {
    let Some(raw) = non_empty_var(name) else {
        return Ok(None);
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(other) => Err(ConfigError::InvalidJson { name, reason: format!("found {}", json_kind(&other)) }),
        Err(err) => Err(ConfigError::InvalidJson { name, reason: err.to_string() }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
