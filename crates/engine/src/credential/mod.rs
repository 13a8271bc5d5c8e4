//! OAuth token acquisition, caching, and refresh.

mod manager;
mod oauth;

use outpost_api::ControlPlaneError;
use thiserror::Error;

use crate::EngineError;

pub use manager::{CredentialManager, TokenTarget};
pub use oauth::{IssuedToken, OAuthClient};

/// Errors from credential flows.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Authentication failed - token not found")]
    TokenNotFound,

    #[error("Failed to refresh a token on server")]
    ServerRefreshFailed,

    #[error("Failed to refresh a token on agent")]
    AgentRefreshFailed,

    #[error("Failed to refresh token, most likely the access has been revoked: {reason}")]
    Revoked { reason: String },

    #[error("{flow} requires {field} in the auth config")]
    MissingField { flow: &'static str, field: &'static str },

    #[error("Token request failed: {reason}")]
    Provider { reason: String },

    #[error(transparent)]
    Store(#[from] ControlPlaneError),
}

impl CredentialError {
    pub fn provider(reason: impl Into<String>) -> Self {
        Self::Provider { reason: reason.into() }
    }
}

impl From<CredentialError> for EngineError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Store(inner) => inner.into(),
            other => EngineError::integration(other.to_string()),
        }
    }
}
