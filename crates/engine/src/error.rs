//! Error taxonomy surfaced by the engine.

use outpost_api::ControlPlaneError;
use thiserror::Error;

/// Errors returned by engine operations.
///
/// Messages are user-facing; the variant decides how callers map the failure
/// (status codes, retries).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("{message}")]
    NotFound { message: String },

    /// A connector, auth flow, or datasource could not do its job.
    #[error("{message}")]
    Integration { message: String },

    #[error("{message}")]
    Unauthorized { message: String },

    #[error("{message}")]
    RbacUnauthorized { message: String },

    #[error("{message}")]
    TooManyRequests { message: String },

    #[error("{message}")]
    Internal { message: String },
}

impl EngineError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    pub fn integration(message: impl Into<String>) -> Self {
        Self::Integration { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized { message: message.into() }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::NotFound { message }
            | Self::Integration { message }
            | Self::Unauthorized { message }
            | Self::RbacUnauthorized { message }
            | Self::TooManyRequests { message }
            | Self::Internal { message } => message,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Integration { .. } => "integration",
            Self::Unauthorized { .. } => "unauthorized",
            Self::RbacUnauthorized { .. } => "rbac_unauthorized",
            Self::TooManyRequests { .. } => "too_many_requests",
            Self::Internal { .. } => "internal",
        }
    }
}

impl From<ControlPlaneError> for EngineError {
    fn from(err: ControlPlaneError) -> Self {
        let message = err.to_string();
        match err {
            ControlPlaneError::Unauthorized { .. } => Self::Unauthorized { message },
            ControlPlaneError::RbacUnauthorized { .. } => Self::RbacUnauthorized { message },
            ControlPlaneError::TooManyRequests { .. } => Self::TooManyRequests { message },
            ControlPlaneError::NotFound { .. } => Self::NotFound { message },
            _ => Self::Internal { message },
        }
    }
}
