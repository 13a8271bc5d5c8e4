//! # Outpost Engine
//!
//! Runs API and workflow definitions fetched from the control plane against
//! connector plugins.
//!
//! ## Execution model
//!
//! - **Discovery**: starting at the trigger action, the first-child pointers
//!   are followed to build a linear chain of integration steps.
//! - **Execution**: each step's datasource is evaluated once per run (auth
//!   injection, dynamic-workflow credentials, binding resolution) and the step
//!   is dispatched to the [`plugin::PluginRunner`]. A failing step ends the run.
//! - **Duality**: every run keeps an authoritative and a redacted
//!   [`outpost_types::ExecutionState`] in lock-step through [`StatePair`]. Only
//!   the redacted one is returned to callers.
//!
//! ## Modules
//!
//! - **`executor`**: the [`executor::ActionEngine`] and chain discovery
//! - **`datasource`**: per-step datasource evaluation and auth injection
//! - **`credential`**: OAuth grants, token caching and refresh
//! - **`plugin`**: the plugin capability trait, registry and runner
//! - **`resolve`**: `{{ ... }}` binding resolution
//! - **`service`**: fetch-and-execute, reentrant for dependent workflows
//! - **`scheduler`**: background polling for scheduled jobs

pub mod credential;
pub mod datasource;
pub mod error;
pub mod executor;
pub mod plugin;
pub mod recursion;
pub mod resolve;
pub mod scheduler;
pub mod service;
pub mod state;

pub use credential::{CredentialError, CredentialManager, OAuthClient};
pub use datasource::{DatasourceResolver, EvaluatedDatasource, EvaluationScope};
pub use error::EngineError;
pub use executor::{ActionEngine, EngineSettings, ExecutionInput};
pub use plugin::{EchoPlugin, Plugin, PluginRegistry, PluginRunner, RegistryPluginRunner};
pub use recursion::RecursionGuard;
pub use resolve::{BindingResolver, TemplateBindingResolver};
pub use scheduler::{JobExecutor, PollingScheduler, SchedulerSettings};
pub use service::{ExecuteOptions, ExecutionService, FetchAndExecuteRequest, WorkflowFetcher};
pub use state::StatePair;
