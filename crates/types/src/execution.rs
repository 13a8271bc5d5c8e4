//! Execution state and step results.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Step that caused an execution to fail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    pub action_id: String,
    pub action_name: String,
}

/// Result of running one action through a connector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StepOutput {
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub log: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Names of the actions that follow this one.
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time_utc: Option<DateTime<Utc>>,
}

impl StepOutput {
    pub fn new(output: Value) -> Self {
        Self { output, ..Self::default() }
    }

    /// Output carrying nothing but a failure.
    pub fn failed(message: impl Into<String>) -> Self {
        let mut out = Self::default();
        out.log_error(message);
        out
    }

    pub fn log_info(&mut self, message: impl AsRef<str>) {
        self.log.push(message.as_ref().to_string());
    }

    pub fn log_warn(&mut self, message: impl AsRef<str>) {
        self.log.push(format!("[WARN] {}", message.as_ref()));
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.log.push(format!("[ERROR] {message}"));
        self.error = Some(message);
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Variables and step outputs visible to bindings during one execution.
///
/// Global variables live in `globals`; step outputs are keyed by action name.
/// Cloning yields a fully independent copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    #[serde(default)]
    pub globals: Map<String, Value>,
    #[serde(default)]
    pub outputs: IndexMap<String, StepOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_context: Option<ErrorContext>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a global, deep-merging into an existing object value.
    pub fn add_variable(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.globals.get_mut(&name) {
            Some(existing) => merge_json(existing, value),
            None => {
                self.globals.insert(name, value);
            }
        }
    }

    /// Binds a global, replacing whatever was there.
    pub fn add_override(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    pub fn add_output(&mut self, name: impl Into<String>, output: StepOutput) {
        self.outputs.insert(name.into(), output);
    }

    pub fn set_error(&mut self, context: ErrorContext, message: impl Into<String>) {
        self.error = Some(message.into());
        self.error_context = Some(context);
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn output(&self, name: &str) -> Option<&StepOutput> {
        self.outputs.get(name)
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some() || self.outputs.values().any(StepOutput::is_error)
    }

    /// First error recorded on the state or any of its outputs.
    pub fn first_error(&self) -> Option<&str> {
        self.error.as_deref().or_else(|| self.outputs.values().find_map(|out| out.error.as_deref()))
    }
}

fn merge_json(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionTiming {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionTiming {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let duration_ms = (end - start).num_milliseconds().max(0) as u64;
        Self { start, end, duration_ms }
    }
}

/// What the agent reports back for a finished execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    pub api_id: String,
    pub api_name: String,
    /// Redacted state only; the authoritative one never leaves the engine.
    pub state: ExecutionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_config: Option<Value>,
    pub timing: ExecutionTiming,
}

impl ExecutionResponse {
    /// Output of the last step that ran, which is what a workflow returns.
    pub fn last_output(&self) -> Option<&Value> {
        self.state.outputs.values().last().map(|out| &out.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_variable_merges_objects() {
        let mut state = ExecutionState::new();
        state.add_variable("oauth", json!({"token": "a"}));
        state.add_variable("oauth", json!({"idToken": "b"}));
        assert_eq!(state.global("oauth"), Some(&json!({"token": "a", "idToken": "b"})));

        state.add_override("oauth", json!({"token": "c"}));
        assert_eq!(state.global("oauth"), Some(&json!({"token": "c"})));
    }

    #[test]
    fn clone_is_independent() {
        let mut parent = ExecutionState::new();
        parent.add_variable("Params", json!({"id": 1}));
        let mut child = parent.clone();
        child.add_variable("Params", json!({"id": 2}));
        child.add_output("Step1", StepOutput::new(json!(true)));

        assert_eq!(parent.global("Params"), Some(&json!({"id": 1})));
        assert!(parent.outputs.is_empty());
    }

    #[test]
    fn failed_output_logs_error() {
        let out = StepOutput::failed("boom");
        assert_eq!(out.error.as_deref(), Some("boom"));
        assert_eq!(out.log, vec!["[ERROR] boom".to_string()]);

        let mut state = ExecutionState::new();
        state.add_output("Step1", out);
        assert!(state.has_error());
        assert_eq!(state.first_error(), Some("boom"));
    }
}
