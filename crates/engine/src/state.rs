//! Paired authoritative/redacted execution state.
//!
//! Every mutation made during an execution goes through [`StatePair`] so the
//! two views always expose the same variable and output names. The
//! authoritative view carries real values and never leaves the engine; the
//! redacted view is what callers get back.

use outpost_types::{ErrorContext, ExecutionState, StepOutput};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePair {
    pub authoritative: ExecutionState,
    pub redacted: ExecutionState,
}

impl StatePair {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` with a real and a display-safe value.
    pub fn add_variable(&mut self, name: &str, value: Value, redacted: Value) {
        self.authoritative.add_variable(name, value);
        self.redacted.add_variable(name, redacted);
    }

    /// Binds a non-secret value identically in both views.
    pub fn add_shared_variable(&mut self, name: &str, value: Value) {
        self.authoritative.add_variable(name, value.clone());
        self.redacted.add_variable(name, value);
    }

    pub fn add_override(&mut self, name: &str, value: Value, redacted: Value) {
        self.authoritative.add_override(name, value);
        self.redacted.add_override(name, redacted);
    }

    pub fn add_output(&mut self, name: &str, output: StepOutput) {
        self.authoritative.add_output(name, output.clone());
        self.redacted.add_output(name, output);
    }

    pub fn set_error(&mut self, context: ErrorContext, message: &str) {
        self.authoritative.set_error(context.clone(), message);
        self.redacted.set_error(context, message);
    }

    /// Both views hold the same global and output names.
    pub fn is_consistent(&self) -> bool {
        self.authoritative.globals.keys().eq(self.redacted.globals.keys())
            && self.authoritative.outputs.keys().eq(self.redacted.outputs.keys())
    }

    /// Records a synthetic failed output for an action and makes it the
    /// execution's terminal error.
    pub fn record_failure(&mut self, action_id: &str, action_name: &str, message: &str) {
        self.add_output(action_name, StepOutput::failed(message));
        self.set_error(ErrorContext { action_id: action_id.to_string(), action_name: action_name.to_string() }, message);
    }
}
