//! Turns a datasource into a ready-to-use configuration for one environment.
//!
//! Evaluation happens in three stages on a fork of the caller's state:
//! auth injection (auth-context bindings, OAuth grants, Basic headers),
//! optional credentials from a dependent workflow, and finally binding
//! resolution. Both the real and the redacted configuration come out of it.

pub mod auth;

use std::sync::Arc;

use outpost_api::DefinitionRequest;
use outpost_types::{
    AgentCredentials, AuthContext, AuthType, Datasource, DatasourceConfiguration, RequestFiles, REDACTED_PLACEHOLDER,
};
use outpost_util::{AppEnv, ENV_GLOBAL, basic_auth_token, redact_json_leaves};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::credential::{CredentialError, CredentialManager, TokenTarget};
use crate::plugin::{GOOGLE_SHEETS_PLUGIN_ID, PluginRegistry, base_plugin_id};
use crate::resolve::{BindingResolver, resolve_configuration};
use crate::service::{ExecuteOptions, WorkflowFetcher};
use crate::{EngineError, RecursionGuard, StatePair};

use self::auth::{bind_auth_contexts, bound_token, expects_bindings, with_authorization_header};

/// Global name used when a dependent workflow has no name.
const UNNAMED_WORKFLOW_GLOBAL: &str = "error_workflow";

/// Inputs shared by every datasource evaluated during one execution.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationScope<'a> {
    pub environment: &'a str,
    pub credentials: &'a AgentCredentials,
    pub files: &'a RequestFiles,
    pub recursion: &'a RecursionGuard,
    pub is_workflow_context: bool,
}

/// Real and redacted configuration for one datasource.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedDatasource {
    pub configuration: DatasourceConfiguration,
    pub redacted_configuration: DatasourceConfiguration,
}

impl EvaluatedDatasource {
    fn from_base(configuration: DatasourceConfiguration) -> Self {
        Self { redacted_configuration: configuration.clone(), configuration }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasourceTestResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn dynamic_reentry_error() -> EngineError {
    EngineError::integration("Cannot reference a workflow that uses an integration that fetches credentials dynamically")
}

pub struct DatasourceResolver {
    credentials: Arc<CredentialManager>,
    bindings: Arc<dyn BindingResolver>,
}

impl DatasourceResolver {
    pub fn new(credentials: Arc<CredentialManager>, bindings: Arc<dyn BindingResolver>) -> Self {
        Self { credentials, bindings }
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    /// Evaluates the datasource behind one step.
    ///
    /// `states` is not modified; evaluation works on a fork so bindings added
    /// for one datasource never leak into another.
    pub async fn evaluate_for_step(
        &self,
        datasource: &Datasource,
        action_name: &str,
        auth_contexts: &AuthContext,
        states: &StatePair,
        scope: &EvaluationScope<'_>,
        workflows: &dyn WorkflowFetcher,
    ) -> Result<EvaluatedDatasource, EngineError> {
        self.evaluate_with_auth(datasource, auth_contexts, states, scope, workflows).await.map_err(|err| {
            warn!(datasource_id = %datasource.id, action = %action_name, error = %err, "datasource evaluation failed");
            EngineError::integration(format!("Evaluating datasource step \"{}\" failed: {}", datasource.name, err.message()))
        })
    }

    async fn evaluate_with_auth(
        &self,
        datasource: &Datasource,
        auth_contexts: &AuthContext,
        states: &StatePair,
        scope: &EvaluationScope<'_>,
        workflows: &dyn WorkflowFetcher,
    ) -> Result<EvaluatedDatasource, EngineError> {
        let base = datasource.configuration_for(scope.environment).cloned().unwrap_or_default();
        if base.dynamic_workflow_id().is_some() && scope.recursion.is_evaluating_datasource() {
            return Err(dynamic_reentry_error());
        }

        let mut states = states.clone();
        let mut configs = self.inject_auth(datasource, base, auth_contexts, &mut states, scope.credentials).await?;
        self.resolve(&mut configs, &mut states, scope, workflows).await?;
        Ok(configs)
    }

    async fn inject_auth(
        &self,
        datasource: &Datasource,
        base: DatasourceConfiguration,
        auth_contexts: &AuthContext,
        states: &mut StatePair,
        credentials: &AgentCredentials,
    ) -> Result<EvaluatedDatasource, EngineError> {
        let auth_type = base.effective_auth_type();
        let binding_key = auth_type.binding_key();
        let mut configs = EvaluatedDatasource::from_base(base);

        bind_auth_contexts(states, auth_contexts, &configs.configuration, &datasource.id);

        match auth_type {
            AuthType::OAuth2ClientCredentials if bound_token(&states.authoritative, binding_key).is_none() => {
                let token =
                    self.credentials.client_credentials_token(credentials, &configs.configuration.auth_config, &datasource.id).await?;
                states.add_variable(binding_key, json!({ "token": token }), json!({ "token": REDACTED_PLACEHOLDER }));
            }
            AuthType::OAuth2Password
                if configs.configuration.auth_config.use_fixed_password_creds
                    && bound_token(&states.authoritative, binding_key).is_none() =>
            {
                let token = self.credentials.password_token(credentials, &configs.configuration.auth_config, &datasource.id).await?;
                states.add_variable(binding_key, json!({ "token": token }), json!({ "token": REDACTED_PLACEHOLDER }));
            }
            AuthType::Basic => {
                let auth = &configs.configuration.auth_config;
                let token = if auth.share_basic_auth_creds {
                    basic_auth_token(auth.username.as_deref().unwrap_or_default(), auth.password.as_deref().unwrap_or_default())
                } else {
                    bound_token(&states.authoritative, binding_key).unwrap_or_default().to_string()
                };
                configs.configuration = with_authorization_header(&configs.configuration, format!("Basic {token}"));
                configs.redacted_configuration =
                    with_authorization_header(&configs.redacted_configuration, format!("Basic {REDACTED_PLACEHOLDER}"));
            }
            _ => {}
        }

        if base_plugin_id(&datasource.plugin_id) == GOOGLE_SHEETS_PLUGIN_ID && auth_type == AuthType::OAuth2Code {
            let target = TokenTarget {
                plugin_id: &datasource.plugin_id,
                datasource_id: &datasource.id,
                auth_type,
                auth_config: &configs.configuration.auth_config,
            };
            let token = self.credentials.get_or_refresh_token(credentials, &target, None).await?;
            if token.is_empty() {
                return Err(CredentialError::TokenNotFound.into());
            }
            configs.configuration.auth_config.auth_token = Some(token);
            configs.redacted_configuration.auth_config.auth_token = Some(REDACTED_PLACEHOLDER.to_string());
        } else if expects_bindings(&configs.configuration) && bound_token(&states.authoritative, binding_key).is_none() {
            debug!(datasource_id = %datasource.id, auth_type = ?auth_type, "no auth binding for datasource");
            return Err(CredentialError::TokenNotFound.into());
        }

        Ok(configs)
    }

    /// Resolves dynamic credentials and bindings for both configurations,
    /// grafting any dependent-workflow output into `states`.
    pub async fn resolve(
        &self,
        configs: &mut EvaluatedDatasource,
        states: &mut StatePair,
        scope: &EvaluationScope<'_>,
        workflows: &dyn WorkflowFetcher,
    ) -> Result<(), EngineError> {
        if let Some(workflow_id) = configs.configuration.dynamic_workflow_id().map(str::to_string) {
            if scope.recursion.is_evaluating_datasource() {
                return Err(dynamic_reentry_error());
            }
            let (name, response) = self.run_dependent_workflow(&workflow_id, scope, workflows).await?;
            let real = json!({ "response": response });
            let redacted = redact_json_leaves(&real);
            states.add_override(&name, real, redacted);
        }

        configs.configuration = resolve_configuration(self.bindings.as_ref(), &states.authoritative, scope.files, &configs.configuration)?;
        configs.redacted_configuration =
            resolve_configuration(self.bindings.as_ref(), &states.redacted, scope.files, &configs.redacted_configuration)?;
        Ok(())
    }

    async fn run_dependent_workflow(
        &self,
        workflow_id: &str,
        scope: &EvaluationScope<'_>,
        workflows: &dyn WorkflowFetcher,
    ) -> Result<(String, Value), EngineError> {
        debug!(workflow_id, "running dependent workflow for datasource credentials");
        let request = DefinitionRequest::workflow(workflow_id, scope.environment, true);
        let definition = workflows.fetch_definition(&request, scope.credentials).await?;
        let options = ExecuteOptions {
            environment: scope.environment.to_string(),
            credentials: scope.credentials.clone(),
            files: scope.files.clone(),
            recursion: scope.recursion.for_datasource_evaluation(),
            is_workflow_context: scope.is_workflow_context,
            ..ExecuteOptions::default()
        };
        let response = workflows.execute_definition(definition, options).await?;
        if let Some(error) = response.state.first_error() {
            return Err(EngineError::integration(format!("Error running dependent workflow: {error}")));
        }

        let name = if response.api_name.is_empty() { UNNAMED_WORKFLOW_GLOBAL.to_string() } else { response.api_name.clone() };
        Ok((name, response.last_output().cloned().unwrap_or(Value::Null)))
    }

    /// Evaluates a datasource outside any execution, for metadata and test calls.
    async fn evaluate_standalone(
        &self,
        datasource: &Datasource,
        environment: &str,
        credentials: &AgentCredentials,
        app_env: &AppEnv,
        workflows: &dyn WorkflowFetcher,
    ) -> Result<EvaluatedDatasource, EngineError> {
        let mut configs = EvaluatedDatasource::from_base(datasource.configuration_for(environment).cloned().unwrap_or_default());
        let mut states = StatePair::new();
        states.add_variable(ENV_GLOBAL, app_env.real.clone(), app_env.redacted.clone());

        let auth_type = configs.configuration.effective_auth_type();
        if auth_type == AuthType::OAuth2Code {
            let target = TokenTarget {
                plugin_id: &datasource.plugin_id,
                datasource_id: &datasource.id,
                auth_type,
                auth_config: &configs.configuration.auth_config,
            };
            let token = self.credentials.get_or_refresh_token(credentials, &target, None).await?;
            configs.configuration.auth_config.auth_token = Some(token);
            configs.redacted_configuration.auth_config.auth_token = Some(REDACTED_PLACEHOLDER.to_string());
        }

        let files = RequestFiles::new();
        let recursion = RecursionGuard::new();
        let scope = EvaluationScope { environment, credentials, files: &files, recursion: &recursion, is_workflow_context: false };
        self.resolve(&mut configs, &mut states, &scope, workflows).await?;
        Ok(configs)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn evaluate_for_metadata(
        &self,
        registry: &PluginRegistry,
        datasource: &Datasource,
        environment: &str,
        credentials: &AgentCredentials,
        app_env: &AppEnv,
        action_configuration: Option<&Value>,
        workflows: &dyn WorkflowFetcher,
    ) -> Result<Value, EngineError> {
        let configs = self.evaluate_standalone(datasource, environment, credentials, app_env, workflows).await?;
        let plugin = registry.resolve(base_plugin_id(&datasource.plugin_id), datasource.plugin_version.as_deref()).await?;
        plugin
            .metadata(&configs.configuration, action_configuration)
            .await
            .map_err(|e| EngineError::integration(format!("Fetching metadata for datasource {} failed: {e}", datasource.name)))
    }

    /// Checks connectivity; failures are reported in the result, not as errors.
    pub async fn evaluate_for_test(
        &self,
        registry: &PluginRegistry,
        datasource: &Datasource,
        environment: &str,
        credentials: &AgentCredentials,
        app_env: &AppEnv,
        workflows: &dyn WorkflowFetcher,
    ) -> DatasourceTestResult {
        let outcome = async {
            let configs = self.evaluate_standalone(datasource, environment, credentials, app_env, workflows).await?;
            let plugin = registry.resolve(base_plugin_id(&datasource.plugin_id), datasource.plugin_version.as_deref()).await?;
            plugin.test(&configs.configuration).await.map_err(|e| EngineError::integration(e.to_string()))
        }
        .await;

        match outcome {
            Ok(()) => DatasourceTestResult { success: true, message: None },
            Err(err) => {
                debug!(datasource_id = %datasource.id, error = %err, "datasource test failed");
                DatasourceTestResult { success: false, message: Some(err.to_string()) }
            }
        }
    }
}
