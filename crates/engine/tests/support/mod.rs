//! In-memory stand-ins for the control plane and plugin runner.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outpost_api::{
    AuditEntry, AuditSink, ControlPlaneError, DefinitionRequest, DefinitionSource, RefreshDelegate, RefreshRequest, TokenQuery,
    TokenStore,
};
use outpost_engine::plugin::{PluginRequest, PluginRunner};
use outpost_engine::resolve::{BindingError, BindingResolver, TemplateBindingResolver};
use outpost_engine::{ActionEngine, CredentialManager, DatasourceResolver, EngineSettings, ExecutionService, OAuthClient};
use outpost_types::{
    Action, AgentCredentials, ApiDefinition, ApiRecord, CachedToken, Datasource, DatasourceConfiguration, ExecutionState,
    RequestFiles, StepOutput, TokenKind,
};
use outpost_util::AppEnv;
use serde_json::{Map, Value, json};

pub fn action(id: &str, name: &str, datasource_id: &str, child: Option<&str>) -> Action {
    Action {
        id: id.into(),
        name: name.into(),
        datasource_id: Some(datasource_id.into()),
        plugin_id: "echo".into(),
        configuration: json!({"step": name}),
        children: child.map(|c| vec![c.to_string()]).unwrap_or_default(),
        ..Action::default()
    }
}

pub fn datasource(id: &str, configuration: DatasourceConfiguration) -> Datasource {
    Datasource {
        id: id.into(),
        name: format!("{id} source"),
        plugin_id: "echo".into(),
        configuration_prod: Some(configuration.clone()),
        configuration_staging: Some(configuration),
        ..Datasource::default()
    }
}

pub fn definition(id: &str, name: &str, actions: Vec<Action>, datasources: Vec<Datasource>) -> ApiDefinition {
    let mut api = ApiRecord { id: id.into(), name: name.into(), ..ApiRecord::default() };
    api.actions.trigger_action_id = actions.first().map(|a| a.id.clone());
    api.actions.actions = actions.into_iter().map(|a| (a.id.clone(), a)).collect();
    ApiDefinition { api, datasources: datasources.into_iter().map(|d| (d.id.clone(), d)).collect(), ..ApiDefinition::default() }
}

/// Definitions by id; ids listed in `failures` answer with that HTTP status and body.
#[derive(Default)]
pub struct CannedDefinitions {
    definitions: Mutex<HashMap<String, ApiDefinition>>,
    failures: Mutex<HashMap<String, (u16, String)>>,
    pub fetches: AtomicUsize,
    pub callers: Mutex<Vec<AgentCredentials>>,
}

impl CannedDefinitions {
    pub fn insert(&self, definition: ApiDefinition) {
        self.definitions.lock().expect("definitions lock").insert(definition.api.id.clone(), definition);
    }

    pub fn fail_with(&self, api_id: &str, status: u16, body: &str) {
        self.failures.lock().expect("failures lock").insert(api_id.to_string(), (status, body.to_string()));
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn callers(&self) -> Vec<AgentCredentials> {
        self.callers.lock().expect("callers lock").clone()
    }
}

#[async_trait]
impl DefinitionSource for CannedDefinitions {
    async fn fetch_definition(&self, request: &DefinitionRequest, credentials: &AgentCredentials) -> Result<ApiDefinition, ControlPlaneError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.callers.lock().expect("callers lock").push(credentials.clone());
        if let Some((status, body)) = self.failures.lock().expect("failures lock").get(&request.api_id) {
            return Err(ControlPlaneError::from_status(*status, body));
        }
        self.definitions
            .lock()
            .expect("definitions lock")
            .get(&request.api_id)
            .cloned()
            .ok_or_else(|| ControlPlaneError::not_found(format!("no definition {}", request.api_id)))
    }
}

/// Token store keyed by token kind and scope, counting reads and writes.
#[derive(Default)]
pub struct CountingTokenStore {
    tokens: Mutex<HashMap<String, CachedToken>>,
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
}

fn store_key(kind: TokenKind, query: &TokenQuery) -> String {
    format!("{}:{:?}", kind.as_str(), query.scope)
}

impl CountingTokenStore {
    pub fn seed(&self, query: &TokenQuery, value: &str, expires_at: Option<DateTime<Utc>>) {
        let token = CachedToken { value: value.to_string(), kind: query.kind, expires_at };
        self.tokens.lock().expect("tokens lock").insert(store_key(query.kind, query), token);
    }

    pub fn value(&self, query: &TokenQuery) -> Option<String> {
        self.tokens.lock().expect("tokens lock").get(&store_key(query.kind, query)).map(|t| t.value.clone())
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenStore for CountingTokenStore {
    async fn get(&self, _credentials: &AgentCredentials, query: &TokenQuery) -> Result<Option<CachedToken>, ControlPlaneError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self.tokens.lock().expect("tokens lock").get(&store_key(query.kind, query)).cloned())
    }

    async fn put(
        &self,
        _credentials: &AgentCredentials,
        query: &TokenQuery,
        token: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), ControlPlaneError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.seed(query, token, expires_at);
        Ok(())
    }
}

/// Server-side refresh that answers with a fixed token.
#[derive(Default)]
pub struct CountingRefreshDelegate {
    pub token: Mutex<Option<String>>,
    pub calls: AtomicUsize,
}

impl CountingRefreshDelegate {
    pub fn answering(token: &str) -> Self {
        Self { token: Mutex::new(Some(token.to_string())), calls: AtomicUsize::new(0) }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RefreshDelegate for CountingRefreshDelegate {
    async fn refresh_on_server(&self, _credentials: &AgentCredentials, _request: &RefreshRequest) -> Result<Option<String>, ControlPlaneError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.token.lock().expect("token lock").clone())
    }
}

/// Plugin runner that echoes action configurations unless a step has a
/// scripted result, recording every request it sees.
#[derive(Default)]
pub struct ScriptedPlugins {
    scripted: Mutex<HashMap<String, Result<StepOutput, String>>>,
    pub requests: Mutex<Vec<PluginRequest>>,
}

impl ScriptedPlugins {
    pub fn script(&self, action_name: &str, result: Result<StepOutput, String>) {
        self.scripted.lock().expect("scripted lock").insert(action_name.to_string(), result);
    }

    pub fn requests(&self) -> Vec<PluginRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.action_name).collect()
    }
}

#[async_trait]
impl PluginRunner for ScriptedPlugins {
    async fn execute(&self, request: PluginRequest) -> anyhow::Result<StepOutput> {
        let scripted = self.scripted.lock().expect("scripted lock").get(&request.action_name).cloned();
        let output = request.action_configuration.clone();
        self.requests.lock().expect("requests lock").push(request);
        match scripted {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Ok(StepOutput::new(output)),
        }
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    pub entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAudit {
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().expect("audit lock").clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn record(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        self.entries.lock().expect("audit lock").push(entry.clone());
        Ok(())
    }
}

/// Template resolver that counts how often it is asked to resolve a value.
#[derive(Default)]
pub struct CountingBindings {
    pub calls: AtomicUsize,
}

impl CountingBindings {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BindingResolver for CountingBindings {
    fn resolve_recursive(&self, state: &ExecutionState, files: &RequestFiles, target: &mut Value) -> Result<(), BindingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        TemplateBindingResolver.resolve_recursive(state, files, target)
    }
}

pub fn app_env() -> AppEnv {
    let mut vars = Map::new();
    vars.insert("region".into(), json!("eu"));
    AppEnv::new(vars, &[("db_password".into(), "hunter2".into())])
}

/// A fully wired service over in-memory collaborators.
pub struct Harness {
    pub definitions: Arc<CannedDefinitions>,
    pub store: Arc<CountingTokenStore>,
    pub delegate: Arc<CountingRefreshDelegate>,
    pub audit: Arc<RecordingAudit>,
    pub bindings: Arc<CountingBindings>,
    pub service: Arc<ExecutionService>,
}

impl Harness {
    pub fn new(plugins: Arc<dyn PluginRunner>) -> Self {
        Self::with_delegate(plugins, Arc::new(CountingRefreshDelegate::default()))
    }

    pub fn with_delegate(plugins: Arc<dyn PluginRunner>, delegate: Arc<CountingRefreshDelegate>) -> Self {
        let definitions = Arc::new(CannedDefinitions::default());
        let store = Arc::new(CountingTokenStore::default());
        let audit = Arc::new(RecordingAudit::default());
        let bindings = Arc::new(CountingBindings::default());

        let oauth = OAuthClient::new(Duration::from_secs(5)).expect("oauth client");
        let credentials = Arc::new(CredentialManager::new(store.clone(), delegate.clone(), oauth, Duration::from_secs(300)));
        let datasources = Arc::new(DatasourceResolver::new(credentials, bindings.clone()));
        let settings = EngineSettings { file_server_url: "http://files.local/agent/v1/files".into(), worker_enabled: false };
        let engine = Arc::new(ActionEngine::new(datasources, plugins, bindings.clone(), audit.clone(), settings));
        let service = Arc::new(ExecutionService::new(definitions.clone(), engine, app_env()));

        Self { definitions, store, delegate, audit, bindings, service }
    }
}

pub fn no_auth() -> DatasourceConfiguration {
    DatasourceConfiguration::default()
}

pub fn outputs(state: &ExecutionState) -> Vec<&str> {
    state.outputs.keys().map(String::as_str).collect()
}

pub fn globals(state: &ExecutionState) -> Vec<&str> {
    state.globals.keys().map(String::as_str).collect()
}
