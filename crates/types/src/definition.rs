//! API definitions as served by the control plane.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::auth::{AuthConfig, AuthContext, AuthType};

/// How an API gets invoked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    #[default]
    Api,
    Workflow,
    Schedule,
}

/// A fully fetched API: the action graph plus every datasource it references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiDefinition {
    pub api: ApiRecord,
    #[serde(default)]
    pub datasources: IndexMap<String, Datasource>,
    /// Organization key used when the agent calls back into the control plane.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_api_key: Option<String>,
    #[serde(default)]
    pub metadata: ApiMetadata,
    /// Auth params carried by the definition itself; merged over the caller's.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub auth_context: AuthContext,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub actions: ApiDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
}

/// The action graph of an API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiDetails {
    #[serde(default)]
    pub actions: IndexMap<String, Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_action_id: Option<String>,
    /// Free-form notification settings; bindings inside are resolved after a run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_config: Option<Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ActionType {
    #[default]
    Integration,
    #[serde(other)]
    Other,
}

/// One step of an API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource_id: Option<String>,
    pub plugin_id: String,
    /// Connector-specific request settings.
    #[serde(default)]
    pub configuration: Value,
    /// Successor action ids; only the first is followed.
    #[serde(default)]
    pub children: Vec<String>,
}

impl Action {
    pub fn next_action_id(&self) -> Option<&str> {
        self.children.first().map(String::as_str)
    }
}

/// A configured connection to an external system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Datasource {
    pub id: String,
    pub name: String,
    pub plugin_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_prod: Option<DatasourceConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_staging: Option<DatasourceConfiguration>,
}

impl Datasource {
    /// Configuration for `environment`; anything other than `production` reads staging.
    pub fn configuration_for(&self, environment: &str) -> Option<&DatasourceConfiguration> {
        if environment == "production" { self.configuration_prod.as_ref() } else { self.configuration_staging.as_ref() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeaderEntry {
    pub key: String,
    pub value: String,
}

impl HeaderEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// Credentials for this datasource come from running another workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DynamicWorkflowConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

/// Environment-specific datasource settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<AuthType>,
    #[serde(default)]
    pub auth_config: AuthConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_workflow_configuration: Option<DynamicWorkflowConfiguration>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DatasourceConfiguration {
    pub fn dynamic_workflow_id(&self) -> Option<&str> {
        self.dynamic_workflow_configuration
            .as_ref()
            .and_then(|dynamic| dynamic.workflow_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    pub fn effective_auth_type(&self) -> AuthType {
        self.auth_type.unwrap_or_default()
    }
}

/// Caller-supplied parameter bound into the execution's globals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionParam {
    pub key: String,
    pub value: Value,
}

/// File uploaded alongside an execution request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestFile {
    pub original_name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

pub type RequestFiles = Vec<RequestFile>;
