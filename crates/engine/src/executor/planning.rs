//! Discovery of the linear action chain to run.

use std::collections::HashSet;

use indexmap::IndexMap;
use outpost_types::{Action, ActionType, ApiRecord, Datasource};

use crate::EngineError;

/// One step of the discovered chain together with its datasource.
#[derive(Debug, Clone, Copy)]
pub struct PlannedStep<'a> {
    pub action: &'a Action,
    pub datasource: &'a Datasource,
}

/// A discovery failure attributed to the action that caused it.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFault {
    pub action_id: String,
    pub action_name: String,
    pub error: EngineError,
}

impl StepFault {
    fn new(action: &Action, error: EngineError) -> Self {
        Self { action_id: action.id.clone(), action_name: action.name.clone(), error }
    }
}

/// The action a run starts from.
///
/// Returns `Ok(None)` for an API without actions. A trigger id that names no
/// action is a structural error. Without an explicit trigger the first
/// declared action is used.
pub fn trigger_action(api: &ApiRecord) -> Result<Option<&Action>, EngineError> {
    let actions = &api.actions.actions;
    if actions.is_empty() {
        return Ok(None);
    }
    match api.actions.trigger_action_id.as_deref().filter(|id| !id.is_empty()) {
        Some(trigger_id) => {
            actions.get(trigger_id).map(Some).ok_or_else(|| EngineError::not_found(format!("Action {trigger_id} not found")))
        }
        None => Ok(actions.values().next()),
    }
}

/// Follows first-child pointers from `trigger` and collects the steps to run.
///
/// Only integration actions are collected; any other type ends the chain.
/// Fails on the first action whose datasource or child cannot be resolved,
/// before any step has run.
pub fn plan_chain<'a>(
    api: &'a ApiRecord,
    trigger: &'a Action,
    datasources: &'a IndexMap<String, Datasource>,
) -> Result<Vec<PlannedStep<'a>>, StepFault> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut current = Some(trigger);

    while let Some(action) = current {
        if action.action_type != ActionType::Integration {
            break;
        }
        if !visited.insert(action.id.as_str()) {
            return Err(StepFault::new(action, EngineError::integration(format!("Action chain revisits action {}", action.name))));
        }

        let datasource_id = action
            .datasource_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StepFault::new(action, EngineError::not_found(format!("Datasource ID not specified for action {}.", action.name))))?;
        let datasource = datasources.get(datasource_id).ok_or_else(|| {
            StepFault::new(action, EngineError::not_found(format!("Datasource {datasource_id} not found for action {}", action.name)))
        })?;
        chain.push(PlannedStep { action, datasource });

        current = match action.next_action_id() {
            Some(child_id) => Some(
                api.actions
                    .actions
                    .get(child_id)
                    .ok_or_else(|| StepFault::new(action, EngineError::not_found(format!("Action {child_id} not found"))))?,
            ),
            None => None,
        };
    }

    Ok(chain)
}

/// Display names of an action's children, falling back to their ids.
pub fn child_names(api: &ApiRecord, action: &Action) -> Vec<String> {
    action
        .children
        .iter()
        .map(|child_id| api.actions.actions.get(child_id).map(|child| child.name.clone()).unwrap_or_else(|| child_id.clone()))
        .collect()
}
