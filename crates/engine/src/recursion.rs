//! Call-stack tracking for nested workflow executions.

use tracing::error;

use crate::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowFrame {
    pub id: String,
    pub name: String,
}

/// Workflows currently on the call stack, plus whether we are inside a
/// datasource's dynamic-credential workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecursionGuard {
    path: Vec<WorkflowFrame>,
    evaluating_datasource: bool,
}

impl RecursionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_evaluating_datasource(&self) -> bool {
        self.evaluating_datasource
    }

    /// Guard handed to a workflow run on behalf of a datasource.
    pub fn for_datasource_evaluation(&self) -> Self {
        Self { path: self.path.clone(), evaluating_datasource: true }
    }

    pub fn path(&self) -> &[WorkflowFrame] {
        &self.path
    }

    pub fn contains(&self, workflow_id: &str) -> bool {
        self.path.iter().any(|frame| frame.id == workflow_id)
    }

    /// Fails when `workflow_id` is already running further up the stack.
    pub fn ensure_absent(&self, workflow_id: &str) -> Result<(), EngineError> {
        let Some(frame) = self.path.iter().find(|frame| frame.id == workflow_id) else {
            return Ok(());
        };
        let chain: Vec<&str> = self.path.iter().map(|f| f.name.as_str()).chain([frame.name.as_str()]).collect();
        Err(EngineError::integration(format!("Workflow cycle detected: {}", chain.join(" -> "))))
    }

    /// Pushes a workflow, failing if it is already on the stack.
    pub fn enter(&mut self, workflow_id: &str, workflow_name: &str) -> Result<(), EngineError> {
        self.ensure_absent(workflow_id)?;
        self.path.push(WorkflowFrame { id: workflow_id.to_string(), name: workflow_name.to_string() });
        Ok(())
    }

    pub fn exit(&mut self, workflow_id: &str) {
        match self.path.last() {
            Some(last) if last.id == workflow_id => {
                self.path.pop();
            }
            _ => {
                error!(workflow_id, path = ?self.path, "workflow stack out of order on exit");
                if let Some(index) = self.path.iter().rposition(|frame| frame.id == workflow_id) {
                    self.path.remove(index);
                }
            }
        }
    }
}
