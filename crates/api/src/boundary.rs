//! Traits the engine uses to reach the control plane.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outpost_types::{AgentCredentials, ApiDefinition, AuthConfig, AuthType, CachedToken, TokenKind, TokenScopeId};

use crate::ControlPlaneError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionRequest {
    pub api_id: String,
    pub is_workflow: bool,
    pub published: bool,
    pub environment: String,
}

impl DefinitionRequest {
    pub fn api(api_id: impl Into<String>, environment: impl Into<String>, published: bool) -> Self {
        Self { api_id: api_id.into(), is_workflow: false, published, environment: environment.into() }
    }

    pub fn workflow(api_id: impl Into<String>, environment: impl Into<String>, published: bool) -> Self {
        Self { api_id: api_id.into(), is_workflow: true, published, environment: environment.into() }
    }
}

#[async_trait]
pub trait DefinitionSource: Send + Sync {
    async fn fetch_definition(&self, request: &DefinitionRequest, credentials: &AgentCredentials) -> Result<ApiDefinition, ControlPlaneError>;
}

/// Identifies one slot in the token store.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenQuery {
    pub auth_type: AuthType,
    pub auth_config: AuthConfig,
    pub kind: TokenKind,
    pub scope: TokenScopeId,
}

impl TokenQuery {
    pub fn new(auth_type: AuthType, auth_config: &AuthConfig, kind: TokenKind, scope: TokenScopeId) -> Self {
        Self { auth_type, auth_config: auth_config.clone(), kind, scope }
    }

    pub fn with_kind(&self, kind: TokenKind) -> Self {
        Self { kind, ..self.clone() }
    }
}

/// Control-plane cache of OAuth tokens, keyed by auth settings, token kind,
/// and either a datasource or the current user.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, credentials: &AgentCredentials, query: &TokenQuery) -> Result<Option<CachedToken>, ControlPlaneError>;

    async fn put(
        &self,
        credentials: &AgentCredentials,
        query: &TokenQuery,
        token: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), ControlPlaneError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshRequest {
    pub plugin_id: String,
    pub auth_type: AuthType,
    pub auth_config: AuthConfig,
    pub datasource_id: String,
}

/// Server-side token refresh for providers whose refresh must not run on the agent.
#[async_trait]
pub trait RefreshDelegate: Send + Sync {
    /// Returns the new access token, or `None` when the server had nothing to refresh.
    async fn refresh_on_server(&self, credentials: &AgentCredentials, request: &RefreshRequest) -> Result<Option<String>, ControlPlaneError>;
}

#[async_trait]
pub trait PendingJobsFeed: Send + Sync {
    async fn fetch_pending_jobs(&self) -> Result<Vec<ApiDefinition>, ControlPlaneError>;
}
