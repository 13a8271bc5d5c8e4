//! Fetch-and-execute entry point.
//!
//! [`ExecutionService`] fetches a definition from the control plane, builds
//! the initial state pair, and hands the definition to the [`ActionEngine`].
//! It is also the [`WorkflowFetcher`] the engine calls back into when a
//! datasource needs a dependent workflow run first.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use outpost_api::{DefinitionRequest, DefinitionSource};
use outpost_types::{
    AgentCredentials, ApiDefinition, AuthContext, Datasource, ExecutionParam, ExecutionResponse, ExecutionState, ExecutionTiming,
    REDACTED_PLACEHOLDER, RedactableParam, RequestFiles, TriggerType,
};
use outpost_util::{AppEnv, ENV_GLOBAL};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::datasource::{DatasourceTestResult, EvaluationScope};
use crate::executor::{ActionEngine, ExecutionInput};
use crate::plugin::PluginRegistry;
use crate::scheduler::JobExecutor;
use crate::{EngineError, RecursionGuard, StatePair};

/// Environment scheduled jobs run in.
pub const SCHEDULED_JOB_ENVIRONMENT: &str = "production";

/// Reentry point for running another workflow from inside an execution.
#[async_trait]
pub trait WorkflowFetcher: Send + Sync {
    async fn fetch_definition(&self, request: &DefinitionRequest, credentials: &AgentCredentials) -> Result<ApiDefinition, EngineError>;

    async fn execute_definition(&self, definition: ApiDefinition, options: ExecuteOptions) -> Result<ExecutionResponse, EngineError>;
}

/// Per-execution settings for [`WorkflowFetcher::execute_definition`].
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub environment: String,
    pub credentials: AgentCredentials,
    pub params: Vec<ExecutionParam>,
    pub auth_contexts: AuthContext,
    pub files: RequestFiles,
    pub recursion: RecursionGuard,
    pub is_workflow_context: bool,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FetchAndExecuteRequest {
    pub api_id: String,
    pub is_workflow: bool,
    pub published: bool,
    pub environment: String,
    pub credentials: AgentCredentials,
    pub params: Vec<ExecutionParam>,
    /// Forwarded request cookies, `<authId>-<kind>` to value.
    pub cookies: IndexMap<String, String>,
    pub auth_contexts: AuthContext,
    pub files: RequestFiles,
    pub correlation_id: Option<String>,
}

impl FetchAndExecuteRequest {
    pub fn new(api_id: impl Into<String>, environment: impl Into<String>) -> Self {
        Self { api_id: api_id.into(), environment: environment.into(), ..Self::default() }
    }
}

/// Turns forwarded cookies into auth contexts.
///
/// A cookie named `<authId>-token` or `<authId>-userId` contributes a param
/// to `<authId>`; tokens are redacted. Other cookies are ignored.
pub fn auth_contexts_from_cookies(cookies: &IndexMap<String, String>) -> AuthContext {
    let mut contexts = AuthContext::new();
    for (name, value) in cookies {
        let Some((auth_id, kind)) = name.rsplit_once('-') else {
            continue;
        };
        if auth_id.is_empty() {
            continue;
        }
        let param = match kind {
            "token" => RedactableParam::new(kind, value.clone()).with_redacted(REDACTED_PLACEHOLDER),
            "userId" => RedactableParam::new(kind, value.clone()),
            _ => continue,
        };
        contexts.entry(auth_id.to_string()).or_default().push(param);
    }
    contexts
}

/// Caller contexts overlaid by the definition's own; the definition wins per auth id.
fn merge_auth_contexts(caller: &AuthContext, definition: &AuthContext) -> AuthContext {
    let mut merged = caller.clone();
    for (auth_id, params) in definition {
        merged.insert(auth_id.clone(), params.clone());
    }
    merged
}

fn error_response(api_id: &str, message: &str, start: DateTime<Utc>) -> ExecutionResponse {
    let state = ExecutionState { error: Some(message.to_string()), ..ExecutionState::default() };
    ExecutionResponse {
        api_id: api_id.to_string(),
        api_name: String::new(),
        state,
        notification_config: None,
        timing: ExecutionTiming::between(start, Utc::now()),
    }
}

pub struct ExecutionService {
    definitions: Arc<dyn DefinitionSource>,
    engine: Arc<ActionEngine>,
    app_env: AppEnv,
}

impl ExecutionService {
    pub fn new(definitions: Arc<dyn DefinitionSource>, engine: Arc<ActionEngine>, app_env: AppEnv) -> Self {
        Self { definitions, engine, app_env }
    }

    pub fn engine(&self) -> &ActionEngine {
        &self.engine
    }

    /// Fetches a definition and runs it.
    ///
    /// Unauthorized, RBAC and rate-limit failures propagate; any other fetch
    /// failure comes back as a response whose state carries the error.
    /// Workflows are pushed onto `recursion` for the duration of the run.
    pub async fn fetch_and_execute(
        &self,
        request: FetchAndExecuteRequest,
        recursion: &mut RecursionGuard,
    ) -> Result<ExecutionResponse, EngineError> {
        let start = Utc::now();
        if request.is_workflow {
            recursion.ensure_absent(&request.api_id)?;
        }

        let definition_request = DefinitionRequest {
            api_id: request.api_id.clone(),
            is_workflow: request.is_workflow,
            published: request.published,
            environment: request.environment.clone(),
        };
        let definition = match self.definitions.fetch_definition(&definition_request, &request.credentials).await {
            Ok(definition) => definition,
            Err(err) => match EngineError::from(err) {
                err @ (EngineError::Unauthorized { .. } | EngineError::RbacUnauthorized { .. } | EngineError::TooManyRequests { .. }) => {
                    return Err(err);
                }
                err => {
                    warn!(api_id = %request.api_id, is_workflow = request.is_workflow, error = %err, "failed to fetch definition");
                    return Ok(error_response(&request.api_id, err.message(), start));
                }
            },
        };
        debug!(
            api_id = %request.api_id,
            fetch_ms = (Utc::now() - start).num_milliseconds(),
            "fetched definition"
        );

        let mut auth_contexts = auth_contexts_from_cookies(&request.cookies);
        for (auth_id, params) in request.auth_contexts {
            auth_contexts.insert(auth_id, params);
        }

        if request.is_workflow {
            recursion.enter(&request.api_id, &definition.api.name)?;
        }
        let options = ExecuteOptions {
            environment: request.environment,
            credentials: request.credentials,
            params: request.params,
            auth_contexts,
            files: request.files,
            recursion: recursion.clone(),
            is_workflow_context: request.is_workflow,
            correlation_id: request.correlation_id,
        };
        let result = self.execute_definition(definition, options).await;
        if request.is_workflow {
            recursion.exit(&request.api_id);
        }
        result
    }

    /// Metadata for a datasource, outside of any execution.
    pub async fn datasource_metadata(
        &self,
        registry: &PluginRegistry,
        datasource: &Datasource,
        environment: &str,
        credentials: &AgentCredentials,
        action_configuration: Option<&Value>,
    ) -> Result<Value, EngineError> {
        self.engine
            .datasources()
            .evaluate_for_metadata(registry, datasource, environment, credentials, &self.app_env, action_configuration, self)
            .await
    }

    pub async fn test_datasource(
        &self,
        registry: &PluginRegistry,
        datasource: &Datasource,
        environment: &str,
        credentials: &AgentCredentials,
    ) -> DatasourceTestResult {
        self.engine.datasources().evaluate_for_test(registry, datasource, environment, credentials, &self.app_env, self).await
    }

    fn initial_states(&self, params: &[ExecutionParam]) -> StatePair {
        let mut states = StatePair::new();
        for param in params {
            states.add_shared_variable(&param.key, param.value.clone());
        }
        states.add_variable(ENV_GLOBAL, self.app_env.real.clone(), self.app_env.redacted.clone());
        states
    }
}

#[async_trait]
impl WorkflowFetcher for ExecutionService {
    async fn fetch_definition(&self, request: &DefinitionRequest, credentials: &AgentCredentials) -> Result<ApiDefinition, EngineError> {
        Ok(self.definitions.fetch_definition(request, credentials).await?)
    }

    async fn execute_definition(&self, definition: ApiDefinition, options: ExecuteOptions) -> Result<ExecutionResponse, EngineError> {
        let start = Utc::now();
        if definition.api.id.is_empty() {
            return Err(EngineError::not_found("API not found"));
        }
        if definition.api.actions.actions.is_empty() {
            return Err(EngineError::not_found("API action is empty"));
        }

        let credentials = match definition.org_api_key.as_deref() {
            Some(key) if options.credentials == AgentCredentials::default() => AgentCredentials::from_org_api_key(key),
            _ => options.credentials.clone(),
        };
        let auth_contexts = merge_auth_contexts(&options.auth_contexts, &definition.auth_context);
        let scope = EvaluationScope {
            environment: &options.environment,
            credentials: &credentials,
            files: &options.files,
            recursion: &options.recursion,
            is_workflow_context: options.is_workflow_context || definition.api.trigger_type == TriggerType::Workflow,
        };

        info!(api_id = %definition.api.id, api_name = %definition.api.name, environment = %options.environment, "executing definition");
        let input = ExecutionInput {
            api: &definition.api,
            datasources: &definition.datasources,
            auth_contexts: &auth_contexts,
            states: self.initial_states(&options.params),
            scope,
            organization: definition.metadata.organization_name.as_deref(),
            correlation_id: options.correlation_id.as_deref(),
        };
        let run = self.engine.run(input, self).await?;

        Ok(ExecutionResponse {
            api_id: definition.api.id.clone(),
            api_name: definition.api.name.clone(),
            state: run.states.redacted,
            notification_config: run.notification_config,
            timing: ExecutionTiming::between(start, Utc::now()),
        })
    }
}

#[async_trait]
impl JobExecutor for ExecutionService {
    async fn execute_job(&self, definition: ApiDefinition) -> Result<ExecutionResponse, EngineError> {
        let options = ExecuteOptions {
            environment: SCHEDULED_JOB_ENVIRONMENT.to_string(),
            is_workflow_context: definition.api.trigger_type != TriggerType::Api,
            ..ExecuteOptions::default()
        };
        self.execute_definition(definition, options).await
    }
}
