//! Wires the control-plane client, credential manager, plugins and engine
//! into one running agent.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use outpost_api::ControlPlaneClient;
use outpost_engine::{
    ActionEngine, CredentialManager, DatasourceResolver, EchoPlugin, EngineSettings, ExecutionService, OAuthClient, PluginRegistry,
    PollingScheduler, RegistryPluginRunner, SchedulerSettings, TemplateBindingResolver,
};
use outpost_types::ApiDefinition;
use outpost_util::{AgentConfig, AppEnv};
use tracing::{info, warn};

pub struct Agent {
    pub config: AgentConfig,
    pub service: Arc<ExecutionService>,
    pub scheduler: PollingScheduler,
}

impl Agent {
    pub async fn from_config(config: AgentConfig) -> Result<Self> {
        let client = Arc::new(ControlPlaneClient::from_config(&config).context("invalid control plane settings")?);
        let oauth = OAuthClient::new(config.request_timeout)?;
        let credentials = Arc::new(CredentialManager::new(client.clone(), client.clone(), oauth, config.eager_refresh_threshold));

        let bindings = Arc::new(TemplateBindingResolver);
        let registry = PluginRegistry::new();
        registry.register(Arc::new(EchoPlugin)).await?;
        for (name, version) in registry.list().await {
            info!(plugin = %name, version = %version, "registered plugin");
        }
        let plugins = Arc::new(RegistryPluginRunner::new(registry, bindings.clone()));

        let datasources = Arc::new(DatasourceResolver::new(credentials, bindings.clone()));
        let engine = Arc::new(ActionEngine::new(datasources, plugins, bindings, client.clone(), EngineSettings::from_config(&config)));
        let app_env = AppEnv::new(config.env_vars.clone(), &config.app_env_secrets);
        let service = Arc::new(ExecutionService::new(client.clone(), engine, app_env));
        let scheduler = PollingScheduler::new(client, service.clone(), SchedulerSettings::from_config(&config.polling));

        Ok(Self { config, service, scheduler })
    }

    /// Polls for scheduled jobs until Ctrl-C, then drains in-flight batches.
    pub async fn run_until_shutdown(&self) -> Result<()> {
        if self.config.polling.enabled {
            self.scheduler.start();
        } else {
            info!("schedule polling disabled");
        }
        info!(server_url = %self.config.server_url, "agent started");

        tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
        info!("shutdown requested");
        self.scheduler.stop();

        match self.config.shutdown_drain_timeout {
            Some(timeout) => {
                if !self.scheduler.join_timeout(timeout).await {
                    warn!(in_flight = self.scheduler.in_flight(), timeout_ms = timeout.as_millis() as u64, "gave up waiting for scheduled jobs");
                }
            }
            None => self.scheduler.join().await,
        }
        info!("agent stopped");
        Ok(())
    }
}

/// Reads a definition document, YAML or JSON.
pub async fn load_definition(path: &Path) -> Result<ApiDefinition> {
    let raw = tokio::fs::read_to_string(path).await.with_context(|| format!("failed to read {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("{} is not a valid definition", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn loads_yaml_and_json_definitions() {
        let mut yaml = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(yaml, "api:\n  id: api-1\n  name: Orders\n  actions:\n    actions: {{}}").expect("write yaml");
        let mut json = tempfile::NamedTempFile::new().expect("temp file");
        write!(json, r#"{{"api": {{"id": "api-2", "name": "Refunds"}}}}"#).expect("write json");

        assert_eq!(load_definition(yaml.path()).await.expect("yaml").api.name, "Orders");
        assert_eq!(load_definition(json.path()).await.expect("json").api.id, "api-2");
    }

    #[tokio::test]
    async fn reports_the_path_of_a_bad_document() {
        let mut bad = tempfile::NamedTempFile::new().expect("temp file");
        write!(bad, "- just\n- a list").expect("write");

        let err = load_definition(bad.path()).await.expect_err("not a definition");
        assert!(err.to_string().contains("is not a valid definition"));
    }
}
