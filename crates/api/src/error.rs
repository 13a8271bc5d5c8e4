use serde_json::Value;
use thiserror::Error;

use outpost_util::sanitize_response_for_logging;

/// Error code the control plane uses for permission (as opposed to authentication) failures.
const RBAC_ERROR_CODE: &str = "RBAC_UNAUTHORIZED";

/// Failures talking to the control plane.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// The caller is authenticated but lacks permission. Kept distinct from
    /// `Unauthorized` so it can propagate unchanged.
    #[error("{message}")]
    RbacUnauthorized { message: String },

    #[error("too many requests: {message}")]
    TooManyRequests { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("bad request: {message}")]
    BadRequest { message: String },

    #[error("control plane returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("invalid control plane configuration: {0}")]
    Config(String),
}

impl ControlPlaneError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized { message: message.into() }
    }

    pub fn rbac(message: impl Into<String>) -> Self {
        Self::RbacUnauthorized { message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http { status, message: message.into() }
    }

    /// Maps a non-success response to an error variant.
    pub fn from_status(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<Value>(body).ok();
        let message = parsed.as_ref().and_then(response_message).unwrap_or_else(|| sanitize_response_for_logging(body));
        let is_rbac = parsed.as_ref().and_then(response_code).is_some_and(|code| code == RBAC_ERROR_CODE);

        match status {
            401 | 403 if is_rbac => Self::RbacUnauthorized { message },
            401 => Self::Unauthorized { message },
            404 => Self::NotFound { message },
            400 => Self::BadRequest { message },
            429 => Self::TooManyRequests { message },
            _ => Self::Http { status, message },
        }
    }

    /// HTTP status behind this error, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } | Self::RbacUnauthorized { .. } => Some(401),
            Self::TooManyRequests { .. } => Some(429),
            Self::NotFound { .. } => Some(404),
            Self::BadRequest { .. } => Some(400),
            Self::Http { status, .. } => Some(*status),
            Self::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            Self::Decode { .. } | Self::Config(_) => None,
        }
    }
}

fn response_message(body: &Value) -> Option<String> {
    let candidates = [
        body.pointer("/responseMeta/error/message"),
        body.pointer("/responseMeta/message"),
        body.get("message"),
        body.get("error"),
    ];
    candidates.into_iter().flatten().find_map(|v| v.as_str()).filter(|s| !s.is_empty()).map(str::to_string)
}

fn response_code(body: &Value) -> Option<&str> {
    body.pointer("/responseMeta/error/code").or_else(|| body.get("code")).and_then(Value::as_str)
}
