//! Control-plane access for the Outpost agent.
//!
//! This crate defines the boundaries the execution engine talks through and a
//! reqwest-backed implementation of all of them:
//!
//! - [`DefinitionSource`] fetches API and workflow definitions
//! - [`TokenStore`] reads and writes cached OAuth tokens
//! - [`RefreshDelegate`] asks the control plane to refresh a token
//! - [`PendingJobsFeed`] lists scheduled jobs that are due
//! - [`AuditSink`] receives execution audit entries
//!
//! [`ControlPlaneClient`] implements every trait. Tests and embedders can swap
//! in their own implementations since the engine only sees `Arc<dyn Trait>`.
//!
//! # Example
//!
//! ```ignore
//! use outpost_api::{ControlPlaneClient, DefinitionRequest, DefinitionSource};
//! use outpost_types::AgentCredentials;
//!
//! async fn fetch() -> anyhow::Result<()> {
//!     let client = ControlPlaneClient::new("https://app.example.com", Some("agent-key".into()), std::time::Duration::from_secs(30))?;
//!     let request = DefinitionRequest::workflow("wf-1", "production", true);
//!     let definition = client.fetch_definition(&request, &AgentCredentials::default()).await?;
//!     println!("{}", definition.api.name);
//!     Ok(())
//! }
//! ```

mod audit;
mod boundary;
mod client;
mod error;

pub use audit::{AuditAction, AuditEntry, AuditResult, AuditSink, AuditStep};
pub use boundary::{DefinitionRequest, DefinitionSource, PendingJobsFeed, RefreshDelegate, RefreshRequest, TokenQuery, TokenStore};
pub use client::{AGENT_KEY_HEADER, ControlPlaneClient, validate_base_url};
pub use error::ControlPlaneError;
