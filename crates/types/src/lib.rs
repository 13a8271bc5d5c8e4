//! Shared data model for the Outpost execution agent.
//!
//! The types in this crate describe what the control plane hands to the agent
//! (API definitions, actions, datasources, auth settings) and what the agent
//! produces while running them (execution state, step outputs, responses).
//! They carry no behavior beyond small helpers and serde wiring so that every
//! other crate in the workspace can share them without pulling in runtime
//! dependencies.

pub mod auth;
pub mod definition;
pub mod execution;

pub use auth::{
    AgentCredentials, AuthConfig, AuthContext, AuthType, CachedToken, RedactableParam, TokenKind, TokenScope, TokenScopeId,
};
pub use definition::{
    Action, ActionType, ApiDefinition, ApiDetails, ApiMetadata, ApiRecord, Datasource, DatasourceConfiguration, DynamicWorkflowConfiguration,
    ExecutionParam, HeaderEntry, RequestFile, RequestFiles, TriggerType,
};
pub use execution::{ErrorContext, ExecutionResponse, ExecutionState, ExecutionTiming, StepOutput};

/// Placeholder written wherever a secret is withheld from the redacted view.
pub const REDACTED_PLACEHOLDER: &str = "<redacted>";
