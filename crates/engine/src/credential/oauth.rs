//! Token endpoint calls for the OAuth2 grants the agent performs itself.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use outpost_types::AuthConfig;
use outpost_util::{basic_auth_token, sanitize_response_for_logging};
use reqwest::{Client, header};
use serde_json::Value;
use tracing::{debug, error};

use super::CredentialError;

/// Access token lifetime assumed when the provider omits `expires_in`.
const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;
/// Refresh token lifetime; providers rarely report it.
const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 90;

/// Tokens returned by a successful grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_token: Option<String>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl IssuedToken {
    /// Builds a token from a provider response body.
    ///
    /// Expiry is `issued_at` (epoch millis, when present) plus `expires_in`
    /// seconds. Both may arrive as numbers or numeric strings.
    pub fn from_response(body: &Value, now: DateTime<Utc>) -> Result<Self, CredentialError> {
        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| CredentialError::provider("response did not contain an access_token"))?
            .to_string();

        let issued_at = body
            .get("issued_at")
            .and_then(number_or_string)
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .unwrap_or(now);
        let expires_in = body.get("expires_in").and_then(number_or_string).unwrap_or(DEFAULT_ACCESS_TOKEN_TTL_SECS);
        let expires_at = chrono::Duration::try_seconds(expires_in)
            .and_then(|ttl| issued_at.checked_add_signed(ttl))
            .ok_or_else(|| CredentialError::provider(format!("invalid expires_in: {expires_in}")))?;

        Ok(Self {
            access_token,
            expires_at,
            refresh_token: body.get("refresh_token").and_then(Value::as_str).filter(|t| !t.is_empty()).map(str::to_string),
            refresh_expires_at: now + chrono::Duration::days(DEFAULT_REFRESH_TOKEN_TTL_DAYS),
        })
    }
}

fn number_or_string(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn required<'a>(value: &'a Option<String>, flow: &'static str, field: &'static str) -> Result<&'a str, CredentialError> {
    value.as_deref().filter(|v| !v.is_empty()).ok_or(CredentialError::MissingField { flow, field })
}

/// HTTP client for OAuth2 token endpoints.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: Client,
}

impl OAuthClient {
    pub fn new(timeout: Duration) -> Result<Self, CredentialError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CredentialError::provider(format!("build http client: {e}")))?;
        Ok(Self { http })
    }

    /// Client-credentials grant, authenticating with `Basic base64(id:secret)`.
    pub async fn client_credentials(&self, config: &AuthConfig) -> Result<IssuedToken, CredentialError> {
        const FLOW: &str = "client credentials grant";
        let token_url = required(&config.token_url, FLOW, "tokenUrl")?;
        let client_id = required(&config.client_id, FLOW, "clientId")?;
        let client_secret = config.client_secret.as_deref().unwrap_or_default();

        let mut form = vec![("grant_type", "client_credentials".to_string())];
        if let Some(scope) = config.scope.as_deref().filter(|s| !s.is_empty()) {
            form.push(("scope", scope.to_string()));
        }
        if let Some(audience) = config.audience.as_deref().filter(|a| !a.is_empty()) {
            form.push(("audience", audience.to_string()));
        }
        let basic = format!("Basic {}", basic_auth_token(client_id, client_secret));
        self.request_token(token_url, &form, Some(basic)).await
    }

    /// Resource-owner password grant.
    pub async fn password(&self, config: &AuthConfig) -> Result<IssuedToken, CredentialError> {
        const FLOW: &str = "password grant";
        let token_url = required(&config.token_url, FLOW, "tokenUrl")?;
        let form = vec![
            ("grant_type", "password".to_string()),
            ("username", required(&config.username, FLOW, "username")?.to_string()),
            ("password", required(&config.password, FLOW, "password")?.to_string()),
            ("client_id", config.client_id.clone().unwrap_or_default()),
            ("client_secret", config.client_secret.clone().unwrap_or_default()),
        ];
        self.request_token(token_url, &form, None).await
    }

    /// Exchanges a refresh token for a new access token.
    pub async fn refresh(&self, config: &AuthConfig, refresh_token: &str) -> Result<IssuedToken, CredentialError> {
        let token_url = required(&config.token_url, "refresh grant", "tokenUrl")?;
        let form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("client_id", config.client_id.clone().unwrap_or_default()),
            ("client_secret", config.client_secret.clone().unwrap_or_default()),
        ];
        self.request_token(token_url, &form, None).await
    }

    async fn request_token(
        &self,
        token_url: &str,
        form: &[(&str, String)],
        authorization: Option<String>,
    ) -> Result<IssuedToken, CredentialError> {
        let grant = form.first().map(|(_, v)| v.as_str()).unwrap_or_default();
        debug!(endpoint = %token_url, grant = %grant, "requesting oauth token");

        let mut request = self.http.post(token_url).header(header::ACCEPT, "application/json").form(form);
        if let Some(authorization) = authorization {
            request = request.header(header::AUTHORIZATION, authorization);
        }

        let response = request.send().await.map_err(|e| {
            error!(endpoint = %token_url, error = %e, "failed to send token request");
            CredentialError::provider(e.to_string())
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|e| CredentialError::provider(e.to_string()))?;

        if !status.is_success() {
            let sanitized_body = sanitize_response_for_logging(&body);
            error!(endpoint = %token_url, status = %status, body = %sanitized_body, "token request failed");
            return Err(CredentialError::provider(format!("HTTP {status}")));
        }

        let parsed: Value = serde_json::from_str(&body).map_err(|e| {
            let sanitized_body = sanitize_response_for_logging(&body);
            error!(error = %e, body = %sanitized_body, "failed to parse token response");
            CredentialError::provider(format!("failed to parse token response: {e}"))
        })?;
        IssuedToken::from_response(&parsed, Utc::now())
    }
}
