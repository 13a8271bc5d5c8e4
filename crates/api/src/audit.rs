//! Audit entries for executions and their steps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outpost_util::redact_sensitive;
use serde::{Deserialize, Serialize};

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,

    pub action: AuditAction,

    pub result: AuditResult,

    pub api_id: String,

    pub api_name: String,

    /// Present for step-level entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<AuditStep>,

    pub environment: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Failure message, redacted before it is recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Informational lines a plugin emitted for a successful step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuditStep {
    pub action_id: String,
    pub action_name: String,
    pub plugin_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditAction {
    /// A whole API or workflow execution.
    Execution,
    /// One action inside an execution.
    Step,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditResult {
    InProgress,
    Success,
    Failure,
}

impl AuditEntry {
    pub fn execution(api_id: &str, api_name: &str, environment: &str, result: AuditResult) -> Self {
        Self {
            timestamp: Utc::now(),
            action: AuditAction::Execution,
            result,
            api_id: api_id.to_string(),
            api_name: api_name.to_string(),
            step: None,
            environment: environment.to_string(),
            organization: None,
            correlation_id: None,
            message: None,
            logs: Vec::new(),
        }
    }

    pub fn for_step(mut self, step: AuditStep, result: AuditResult) -> Self {
        self.action = AuditAction::Step;
        self.step = Some(step);
        self.result = result;
        self.timestamp = Utc::now();
        self
    }

    pub fn with_message(mut self, message: impl AsRef<str>) -> Self {
        self.message = Some(redact_sensitive(message.as_ref()));
        self
    }

    pub fn with_logs(mut self, logs: Vec<serde_json::Value>) -> Self {
        self.logs = logs;
        self
    }
}

/// Receives audit entries. Failures are the caller's to log and ignore.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> anyhow::Result<()>;
}
