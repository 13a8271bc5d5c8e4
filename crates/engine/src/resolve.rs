//! # Binding Resolution
//!
//! Datasource configurations, action configurations, and notification
//! settings may embed `{{ ... }}` bindings that refer to the execution state:
//!
//! - `{{ Env.region }}` - a global variable, with dot/index navigation
//! - `{{ Step1.output.items[0].id }}` - an earlier step's output
//! - `{{ oauth.token }}` - an auth binding added during datasource evaluation
//!
//! Resolution walks a JSON value recursively and rewrites every string that
//! carries bindings. A binding that cannot be resolved is an error rather than
//! an empty string, so a misconfigured datasource fails loudly.
//!
//! ## Usage
//!
//! ```rust
//! use outpost_engine::resolve::{BindingResolver, TemplateBindingResolver};
//! use outpost_types::ExecutionState;
//! use serde_json::json;
//!
//! let mut state = ExecutionState::new();
//! state.add_variable("Env", json!({"region": "eu"}));
//!
//! let mut value = json!({"host": "db.{{ Env.region }}.example.com"});
//! TemplateBindingResolver.resolve_recursive(&state, &Vec::new(), &mut value).unwrap();
//! assert_eq!(value["host"], "db.eu.example.com");
//! ```

use outpost_types::{DatasourceConfiguration, ExecutionState, RequestFiles};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

use crate::EngineError;

/// Global name under which uploaded files are visible to bindings.
pub const FILES_BINDING: &str = "$files";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Failed to evaluate binding `{expression}`: {reason}")]
pub struct BindingError {
    pub expression: String,
    pub reason: String,
}

impl From<BindingError> for EngineError {
    fn from(err: BindingError) -> Self {
        EngineError::integration(err.to_string())
    }
}

/// Evaluates bindings inside a JSON value against an execution state.
pub trait BindingResolver: Send + Sync {
    fn resolve_recursive(&self, state: &ExecutionState, files: &RequestFiles, target: &mut Value) -> Result<(), BindingError>;
}

/// Resolves `{{ path.to.value }}` references by plain lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateBindingResolver;

impl BindingResolver for TemplateBindingResolver {
    fn resolve_recursive(&self, state: &ExecutionState, files: &RequestFiles, target: &mut Value) -> Result<(), BindingError> {
        match target {
            Value::String(text) => {
                if text.contains("{{") {
                    *text = interpolate_string(text, state, files)?;
                }
                Ok(())
            }
            Value::Array(items) => items.iter_mut().try_for_each(|item| self.resolve_recursive(state, files, item)),
            Value::Object(map) => map.values_mut().try_for_each(|item| self.resolve_recursive(state, files, item)),
            _ => Ok(()),
        }
    }
}

/// Resolves bindings inside any serde-typed value by round-tripping through JSON.
pub fn resolve_typed<T>(resolver: &dyn BindingResolver, state: &ExecutionState, files: &RequestFiles, value: &T) -> Result<T, EngineError>
where
    T: Serialize + DeserializeOwned,
{
    let mut raw = serde_json::to_value(value).map_err(|e| EngineError::internal(format!("serialize for binding evaluation: {e}")))?;
    resolver.resolve_recursive(state, files, &mut raw)?;
    serde_json::from_value(raw).map_err(|e| EngineError::internal(format!("binding evaluation produced an invalid value: {e}")))
}

pub fn resolve_configuration(
    resolver: &dyn BindingResolver,
    state: &ExecutionState,
    files: &RequestFiles,
    configuration: &DatasourceConfiguration,
) -> Result<DatasourceConfiguration, EngineError> {
    resolve_typed(resolver, state, files, configuration)
}

fn interpolate_string(input: &str, state: &ExecutionState, files: &RequestFiles) -> Result<String, BindingError> {
    let mut output = String::new();
    let mut remaining = input;

    while let Some(start) = remaining.find("{{") {
        let (before, after_start) = remaining.split_at(start);
        output.push_str(before);

        let Some(end) = after_start.find("}}") else {
            // Unterminated binding; keep the rest verbatim.
            output.push_str(after_start);
            return Ok(output);
        };
        let expression = after_start[2..end].trim();
        let value = lookup(expression, state, files)?;
        output.push_str(&format_json_value(&value));
        remaining = &after_start[end + 2..];
    }

    output.push_str(remaining);
    Ok(output)
}

fn lookup(expression: &str, state: &ExecutionState, files: &RequestFiles) -> Result<Value, BindingError> {
    let fail = |reason: &str| BindingError { expression: expression.to_string(), reason: reason.to_string() };
    if expression.is_empty() {
        return Err(fail("empty expression"));
    }

    let root_end = expression.find(['.', '[']).unwrap_or(expression.len());
    let (root, rest) = expression.split_at(root_end);
    let rest = rest.strip_prefix('.').unwrap_or(rest);

    let root_value = if root == FILES_BINDING {
        serde_json::to_value(files).map_err(|e| fail(&e.to_string()))?
    } else if let Some(global) = state.global(root) {
        global.clone()
    } else if let Some(output) = state.output(root) {
        serde_json::to_value(output).map_err(|e| fail(&e.to_string()))?
    } else {
        return Err(fail(&format!("{root} is not defined")));
    };

    select_path(&root_value, Some(rest)).ok_or_else(|| fail("path does not exist"))
}

/// Select a nested JSON value by a minimal dot path with optional numeric indices.
///
/// Supports segments like `a`, `a.b`, and array indices `a[0].b[1]`. Returns `None`
/// when any segment is missing or applied to the wrong JSON type. When `path` is
/// `None` or empty, the input `value` is cloned and returned as-is.
pub fn select_path(value: &Value, path: Option<&str>) -> Option<Value> {
    let Some(path) = path else {
        return Some(value.clone());
    };
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Some(value.clone());
    }

    let mut current = value;
    for segment in trimmed.split('.') {
        if segment.is_empty() {
            continue;
        }
        let (key, indices) = split_indices(segment);
        if !key.is_empty() {
            current = current.get(key)?;
        }
        for idx in indices {
            current = current.get(idx)?;
        }
    }
    Some(current.clone())
}

fn split_indices(segment: &str) -> (&str, Vec<usize>) {
    let bytes = segment.as_bytes();
    let key_end = bytes.iter().position(|&b| b == b'[').unwrap_or(bytes.len());
    let key = &segment[..key_end];
    let mut indices = Vec::new();
    let mut i = key_end;
    while i < bytes.len() {
        if bytes[i] != b'[' {
            break;
        }
        i += 1; // skip [
        let start = i;
        while i < bytes.len() && bytes[i] != b']' {
            i += 1;
        }
        if i <= start {
            break;
        }
        if let Ok(n) = segment[start..i].parse::<usize>() {
            indices.push(n);
        }
        i += 1; // skip ]
    }
    (key, indices)
}

fn format_json_value(value: &Value) -> String {
    match value {
        Value::String(string_value) => string_value.clone(),
        Value::Number(number_value) => number_value.to_string(),
        Value::Bool(boolean_value) => boolean_value.to_string(),
        Value::Null => String::new(),
        other_value => other_value.to_string(),
    }
}
