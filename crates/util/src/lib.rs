//! Helpers shared by the Outpost crates: secret redaction, agent
//! configuration, and the application environment exposed to bindings.

pub mod app_env;
pub mod config;
pub mod redact;

pub use app_env::{AppEnv, ENV_GLOBAL};
pub use config::{AgentConfig, ConfigError, PollingConfig};
pub use redact::{basic_auth_token, redact_json_leaves, redact_sensitive, sanitize_response_for_logging};
