//! The `Env` global seen by bindings.

use outpost_types::REDACTED_PLACEHOLDER;
use serde_json::{Map, Value};

use crate::config::AgentConfig;

/// Global name under which the app environment is bound.
pub const ENV_GLOBAL: &str = "Env";

/// App environment in both views: plain variables are visible in both,
/// secret variables only in `real`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AppEnv {
    pub real: Value,
    pub redacted: Value,
}

impl AppEnv {
    pub fn new(vars: Map<String, Value>, secrets: &[(String, String)]) -> Self {
        let mut real = vars.clone();
        let mut redacted = vars;
        for (name, value) in secrets {
            real.insert(name.clone(), Value::String(value.clone()));
            redacted.insert(name.clone(), Value::String(REDACTED_PLACEHOLDER.to_string()));
        }
        Self { real: Value::Object(real), redacted: Value::Object(redacted) }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.env_vars.clone(), &config.app_env_secrets)
    }
}
