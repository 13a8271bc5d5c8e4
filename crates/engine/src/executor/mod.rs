//! The action engine: discovers a linear chain of integration steps and runs
//! it one step at a time against the plugin runner.
//!
//! A run never fails because of a step. Plugin-reported errors and faults
//! raised while evaluating or dispatching a step are recorded in the state
//! pair and the run stops there. Only trigger validation errors propagate.

pub mod planning;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use outpost_api::{AuditEntry, AuditResult, AuditSink, AuditStep};
use outpost_types::{ApiRecord, AuthContext, Datasource, ErrorContext, ExecutionState, StepOutput};
use outpost_util::{AgentConfig, redact_sensitive};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::datasource::{DatasourceResolver, EvaluatedDatasource, EvaluationScope};
use crate::plugin::{PluginRequest, PluginRunner};
use crate::resolve::{BindingResolver, resolve_typed};
use crate::service::WorkflowFetcher;
use crate::{EngineError, StatePair};

use self::planning::{PlannedStep, child_names, plan_chain, trigger_action};

pub const FILE_SERVER_URL_GLOBAL: &str = "$fileServerUrl";
pub const WORKER_FLAG_GLOBAL: &str = "$flagWorker";

/// Engine-provided globals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub file_server_url: String,
    pub worker_enabled: bool,
}

impl EngineSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self { file_server_url: config.file_server_url.clone(), worker_enabled: config.worker_enabled }
    }
}

/// One run of an action chain.
pub struct ExecutionInput<'a> {
    pub api: &'a ApiRecord,
    pub datasources: &'a IndexMap<String, Datasource>,
    pub auth_contexts: &'a AuthContext,
    /// Initial states, already holding params and `Env`.
    pub states: StatePair,
    pub scope: EvaluationScope<'a>,
    pub organization: Option<&'a str>,
    pub correlation_id: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineRun {
    pub states: StatePair,
    /// Notification settings with bindings resolved against the redacted state.
    pub notification_config: Option<Value>,
}

/// Shared by every step of one run.
struct RunContext<'a> {
    api: &'a ApiRecord,
    auth_contexts: &'a AuthContext,
    scope: EvaluationScope<'a>,
    audit: AuditEntry,
}

pub struct ActionEngine {
    datasources: Arc<DatasourceResolver>,
    plugins: Arc<dyn PluginRunner>,
    bindings: Arc<dyn BindingResolver>,
    audit: Arc<dyn AuditSink>,
    settings: EngineSettings,
}

impl ActionEngine {
    pub fn new(
        datasources: Arc<DatasourceResolver>,
        plugins: Arc<dyn PluginRunner>,
        bindings: Arc<dyn BindingResolver>,
        audit: Arc<dyn AuditSink>,
        settings: EngineSettings,
    ) -> Self {
        Self { datasources, plugins, bindings, audit, settings }
    }

    pub fn datasources(&self) -> &DatasourceResolver {
        &self.datasources
    }

    /// Runs the chain and returns the redacted state.
    pub async fn execute(&self, input: ExecutionInput<'_>, workflows: &dyn WorkflowFetcher) -> Result<ExecutionState, EngineError> {
        Ok(self.run(input, workflows).await?.states.redacted)
    }

    /// Runs the chain and returns both views.
    pub async fn run(&self, input: ExecutionInput<'_>, workflows: &dyn WorkflowFetcher) -> Result<EngineRun, EngineError> {
        let ExecutionInput { api, datasources, auth_contexts, mut states, scope, organization, correlation_id } = input;

        let Some(trigger) = trigger_action(api)? else {
            debug!(api_id = %api.id, "api has no actions, nothing to run");
            return Ok(EngineRun { states, notification_config: None });
        };

        states.add_shared_variable(FILE_SERVER_URL_GLOBAL, json!(self.settings.file_server_url));
        states.add_shared_variable(WORKER_FLAG_GLOBAL, json!(self.settings.worker_enabled));

        let mut audit = AuditEntry::execution(&api.id, &api.name, scope.environment, AuditResult::InProgress);
        audit.organization = organization.map(str::to_string);
        audit.correlation_id = correlation_id.map(str::to_string);
        self.record(audit.clone()).await;

        let context = RunContext { api, auth_contexts, scope, audit };
        match plan_chain(api, trigger, datasources) {
            Ok(chain) => {
                info!(api_id = %api.id, api_name = %api.name, steps = chain.len(), "executing action chain");
                self.execute_chain(&chain, &context, &mut states, workflows).await;
            }
            Err(fault) => {
                warn!(
                    api_id = %api.id,
                    action_id = %fault.action_id,
                    action_name = %fault.action_name,
                    error = %fault.error,
                    "action chain discovery failed"
                );
                states.record_failure(&fault.action_id, &fault.action_name, fault.error.message());
            }
        }

        let notification_config = self.resolve_notification(api, &states, scope);

        let finished = match states.redacted.first_error() {
            Some(message) => context.audit.clone().with_message(message),
            None => context.audit.clone(),
        };
        let result = if states.redacted.has_error() { AuditResult::Failure } else { AuditResult::Success };
        self.record(AuditEntry { result, timestamp: Utc::now(), ..finished }).await;

        Ok(EngineRun { states, notification_config })
    }

    async fn execute_chain(&self, chain: &[PlannedStep<'_>], context: &RunContext<'_>, states: &mut StatePair, workflows: &dyn WorkflowFetcher) {
        // Datasources are evaluated against the state the run started with.
        let initial = states.clone();
        let mut evaluated: HashMap<String, EvaluatedDatasource> = HashMap::new();

        for step in chain {
            let action = step.action;
            let audit_step = AuditStep {
                action_id: action.id.clone(),
                action_name: action.name.clone(),
                plugin_id: action.plugin_id.clone(),
                datasource_id: Some(step.datasource.id.clone()),
            };
            self.record(context.audit.clone().for_step(audit_step.clone(), AuditResult::InProgress)).await;

            let started = Utc::now();
            let mut output = match self.run_step(step, context, &initial, states, &mut evaluated, workflows).await {
                Ok(output) => output,
                Err(err) => {
                    error!(
                        api_id = %context.api.id,
                        action_id = %action.id,
                        action_name = %action.name,
                        datasource_id = %step.datasource.id,
                        plugin_id = %action.plugin_id,
                        error = %err,
                        "step failed"
                    );
                    states.record_failure(&action.id, &action.name, err.message());
                    self.record(context.audit.clone().for_step(audit_step, AuditResult::Failure).with_message(err.message())).await;
                    break;
                }
            };

            output.children = child_names(context.api, action);
            output.start_time_utc = Some(started);
            output.execution_time_ms = Some((Utc::now() - started).num_milliseconds().max(0) as u64);
            let step_error = output.error.clone();
            let logs = forwarded_log_lines(&output);
            states.add_output(&action.name, output);

            if let Some(message) = step_error {
                debug!(action_id = %action.id, action_name = %action.name, "step reported an error, stopping chain");
                states.set_error(ErrorContext { action_id: action.id.clone(), action_name: action.name.clone() }, &message);
                self.record(context.audit.clone().for_step(audit_step, AuditResult::Failure).with_message(message)).await;
                break;
            }

            for line in &logs {
                debug!(action_name = %action.name, plugin_log = %line, "plugin log");
            }
            self.record(context.audit.clone().for_step(audit_step, AuditResult::Success).with_logs(logs)).await;
        }
    }

    async fn run_step(
        &self,
        step: &PlannedStep<'_>,
        context: &RunContext<'_>,
        initial: &StatePair,
        states: &StatePair,
        evaluated: &mut HashMap<String, EvaluatedDatasource>,
        workflows: &dyn WorkflowFetcher,
    ) -> Result<StepOutput, EngineError> {
        let action = step.action;
        let datasource = match evaluated.get(&step.datasource.id) {
            Some(cached) => cached.clone(),
            None => {
                let fresh = self
                    .datasources
                    .evaluate_for_step(step.datasource, &action.name, context.auth_contexts, initial, &context.scope, workflows)
                    .await?;
                evaluated.insert(step.datasource.id.clone(), fresh.clone());
                fresh
            }
        };

        let plugin_version = action
            .configuration
            .get("pluginVersion")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| step.datasource.plugin_version.clone());

        let request = PluginRequest {
            plugin_id: action.plugin_id.clone(),
            plugin_version,
            action_id: action.id.clone(),
            action_name: action.name.clone(),
            environment: context.scope.environment.to_string(),
            action_configuration: action.configuration.clone(),
            datasource_configuration: datasource.configuration,
            redacted_datasource_configuration: datasource.redacted_configuration,
            state: states.authoritative.clone(),
            redacted_state: states.redacted.clone(),
            files: context.scope.files.clone(),
            recursion: context.scope.recursion.clone(),
        };

        self.plugins
            .execute(request)
            .await
            .map_err(|err| EngineError::integration(format!("Fatal error: failed to execute action {}: {err}", action.name)))
    }

    fn resolve_notification(&self, api: &ApiRecord, states: &StatePair, scope: EvaluationScope<'_>) -> Option<Value> {
        let config = api.actions.notification_config.as_ref()?;
        match resolve_typed(self.bindings.as_ref(), &states.redacted, scope.files, config) {
            Ok(resolved) => Some(resolved),
            Err(err) => {
                warn!(api_id = %api.id, error = %err, "failed to resolve notification bindings");
                None
            }
        }
    }

    async fn record(&self, entry: AuditEntry) {
        if let Err(err) = self.audit.record(&entry).await {
            debug!(error = %err, api_id = %entry.api_id, "failed to record audit entry");
        }
    }
}

/// Plugin log lines worth forwarding: JSON objects as values, anything else
/// as a redacted string. Lines the plugin tagged as warnings or errors are
/// skipped.
fn forwarded_log_lines(output: &StepOutput) -> Vec<Value> {
    output
        .log
        .iter()
        .filter(|line| !line.starts_with("[WARN]") && !line.starts_with("[ERROR]"))
        .map(|line| match serde_json::from_str::<Value>(line) {
            Ok(value @ Value::Object(_)) => value,
            _ => Value::String(redact_sensitive(line)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_forwarding_skips_tagged_lines() {
        let mut output = StepOutput::new(Value::Null);
        output.log_info(r#"{"rows": 3}"#);
        output.log_info("fetched with password=hunter2");
        output.log_warn("slow response");
        output.log_error("boom");

        let lines = forwarded_log_lines(&output);
        assert_eq!(lines, vec![json!({"rows": 3}), json!("fetched with password=<redacted>")]);
    }
}
