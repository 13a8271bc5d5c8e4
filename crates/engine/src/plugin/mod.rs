//! Connector plugins and the runner that dispatches steps to them.

mod echo;
mod registry;

use async_trait::async_trait;
use outpost_types::{DatasourceConfiguration, ExecutionState, RequestFiles, StepOutput};
use serde_json::Value;
use thiserror::Error;

use crate::RecursionGuard;

pub use echo::EchoPlugin;
pub use registry::{PluginRegistry, RegistryPluginRunner};

/// Plugin id that receives an OAuth2 code token in its auth config.
pub const GOOGLE_SHEETS_PLUGIN_ID: &str = "gsheets";

/// Errors related to plugin lookup and registration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("Plugin not found: {name}")]
    NotFound { name: String },

    #[error("Plugin already registered: {name}@{version}")]
    AlreadyRegistered { name: String, version: String },
}

impl PluginError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }
}

impl From<PluginError> for crate::EngineError {
    fn from(err: PluginError) -> Self {
        crate::EngineError::internal(err.to_string())
    }
}

/// Everything a connector needs to run one step.
#[derive(Debug, Clone)]
pub struct PluginRequest {
    pub plugin_id: String,
    pub plugin_version: Option<String>,
    pub action_id: String,
    pub action_name: String,
    pub environment: String,
    pub action_configuration: Value,
    pub datasource_configuration: DatasourceConfiguration,
    pub redacted_datasource_configuration: DatasourceConfiguration,
    /// Real values, for connectors to evaluate against.
    pub state: ExecutionState,
    pub redacted_state: ExecutionState,
    pub files: RequestFiles,
    pub recursion: RecursionGuard,
}

/// A connector implementation.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    async fn execute(&self, request: &PluginRequest) -> anyhow::Result<StepOutput>;

    /// Schema or catalog information about the connected system.
    async fn metadata(&self, _configuration: &DatasourceConfiguration, _action_configuration: Option<&Value>) -> anyhow::Result<Value> {
        Ok(Value::Null)
    }

    /// Checks that the configuration can reach the connected system.
    async fn test(&self, _configuration: &DatasourceConfiguration) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Runs one step through whatever connector its plugin id names.
#[async_trait]
pub trait PluginRunner: Send + Sync {
    async fn execute(&self, request: PluginRequest) -> anyhow::Result<StepOutput>;
}

/// Strips variant suffixes (`restapi@v2`, `restapi:oauth`) from a plugin id.
pub fn base_plugin_id(plugin_id: &str) -> &str {
    let end = plugin_id.find(['@', ':']).unwrap_or(plugin_id.len());
    &plugin_id[..end]
}
