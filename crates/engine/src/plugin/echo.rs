use async_trait::async_trait;
use outpost_types::{DatasourceConfiguration, StepOutput};
use serde_json::{Value, json};

use super::{Plugin, PluginRequest};

/// A plugin that returns its (already resolved) action configuration. This
/// allows smoke runs and tests without external side effects.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoPlugin;

#[async_trait]
impl Plugin for EchoPlugin {
    fn name(&self) -> &str {
        "echo"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn execute(&self, request: &PluginRequest) -> anyhow::Result<StepOutput> {
        let mut output = StepOutput::new(request.action_configuration.clone());
        output.log_info(json!({"action": request.action_name, "environment": request.environment}).to_string());
        Ok(output)
    }

    async fn metadata(&self, _configuration: &DatasourceConfiguration, action_configuration: Option<&Value>) -> anyhow::Result<Value> {
        Ok(json!({"plugin": self.name(), "actionConfiguration": action_configuration}))
    }
}
