//! Authentication settings attached to datasources, cached tokens, and the
//! credentials the agent presents to the control plane.

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Authentication scheme configured on a datasource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum AuthType {
    #[default]
    #[serde(rename = "None")]
    None,
    #[serde(rename = "basic")]
    Basic,
    #[serde(rename = "oauth-pword")]
    OAuth2Password,
    #[serde(rename = "oauth-client-cred")]
    OAuth2ClientCredentials,
    #[serde(rename = "oauth-implicit")]
    OAuth2Implicit,
    #[serde(rename = "oauth-code")]
    OAuth2Code,
    #[serde(rename = "Firebase")]
    Firebase,
    /// Any scheme this agent does not understand. Treated like [`AuthType::None`]
    /// for binding purposes.
    #[serde(other)]
    Unknown,
}

impl AuthType {
    /// Global variable name under which tokens for this scheme are bound.
    ///
    /// An empty string means the scheme never binds anything.
    pub fn binding_key(self) -> &'static str {
        match self {
            AuthType::None | AuthType::Unknown => "",
            AuthType::Basic => "_basic",
            AuthType::Firebase => "firebase",
            AuthType::OAuth2Password | AuthType::OAuth2ClientCredentials | AuthType::OAuth2Implicit | AuthType::OAuth2Code => "oauth",
        }
    }

    pub fn is_oauth(self) -> bool {
        matches!(
            self,
            AuthType::OAuth2Password | AuthType::OAuth2ClientCredentials | AuthType::OAuth2Implicit | AuthType::OAuth2Code
        )
    }
}

/// Whether a stored token belongs to a single datasource or follows the user
/// across datasources.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenScope {
    Datasource,
    #[default]
    User,
}

/// Key used when reading from or writing to the token store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenScopeId {
    Datasource(String),
    User,
}

impl TokenScopeId {
    pub fn for_config(config: &AuthConfig, datasource_id: &str) -> Self {
        match config.token_scope {
            TokenScope::Datasource => TokenScopeId::Datasource(datasource_id.to_string()),
            TokenScope::User => TokenScopeId::User,
        }
    }

    pub fn datasource_id(&self) -> Option<&str> {
        match self {
            TokenScopeId::Datasource(id) => Some(id),
            TokenScopeId::User => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
    Id,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
            TokenKind::Id => "id",
        }
    }
}

/// A token returned by the token store together with its expiry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CachedToken {
    pub value: String,
    #[serde(default = "default_token_kind")]
    pub kind: TokenKind,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_token_kind() -> TokenKind {
    TokenKind::Access
}

impl CachedToken {
    /// True when the token expires within `threshold` of `now`.
    ///
    /// Tokens without a known expiry never count as expiring.
    pub fn expires_within(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - now <= threshold,
            None => false,
        }
    }
}

/// Authentication settings embedded in a datasource configuration.
///
/// Only the fields the agent acts on are typed; everything else is kept in
/// `extra` so that connector-specific settings survive a round trip untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Overrides the datasource id as the key into the execution's auth contexts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Password grant with credentials stored on the datasource rather than per user.
    #[serde(default)]
    pub use_fixed_password_creds: bool,
    /// Basic auth credentials are shared by every user of the datasource.
    #[serde(default)]
    pub share_basic_auth_creds: bool,
    #[serde(default)]
    pub token_scope: TokenScope,
    /// Delegate refreshes to the control plane instead of the provider.
    #[serde(default)]
    pub refresh_token_from_server: bool,
    /// Bearer token handed to connectors that read it directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Single parameter inside an auth context, optionally with a display-safe value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedactableParam {
    pub key: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacted_value: Option<Value>,
}

impl RedactableParam {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { key: key.into(), value: value.into(), redacted_value: None }
    }

    pub fn with_redacted(mut self, redacted: impl Into<Value>) -> Self {
        self.redacted_value = Some(redacted.into());
        self
    }

    /// Value shown in the redacted view; falls back to the real value.
    pub fn display_value(&self) -> &Value {
        self.redacted_value.as_ref().unwrap_or(&self.value)
    }
}

/// Auth id (usually a datasource id) to the params bound for it.
pub type AuthContext = IndexMap<String, Vec<RedactableParam>>;

/// Credentials the agent presents to the control plane on behalf of an execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentCredentials {
    pub jwt: Option<String>,
    pub api_key: Option<String>,
}

impl AgentCredentials {
    pub fn from_org_api_key(key: &str) -> Self {
        Self { jwt: None, api_key: Some(format!("Bearer {key}")) }
    }

    /// Value for the `Authorization` header; a user JWT wins over an API key.
    pub fn authorization(&self) -> Option<String> {
        if let Some(jwt) = self.jwt.as_deref().filter(|jwt| !jwt.is_empty()) {
            return Some(format!("Bearer {jwt}"));
        }
        self.api_key.clone()
    }
}
