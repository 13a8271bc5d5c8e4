use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outpost_types::{AgentCredentials, ApiDefinition, CachedToken, TokenScopeId};
use outpost_util::AgentConfig;
use reqwest::{Client, Method, RequestBuilder, header};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::{
    AuditEntry, AuditSink, ControlPlaneError, DefinitionRequest, DefinitionSource, PendingJobsFeed, RefreshDelegate, RefreshRequest,
    TokenQuery, TokenStore,
};

/// Header carrying the agent key on every control-plane call.
pub const AGENT_KEY_HEADER: &str = "x-outpost-agent-key";

/// Hostnames allowed for local development regardless of scheme.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

/// Every control-plane response wraps its payload as `{ "data": ... }`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default = "Option::default")]
    data: Option<T>,
}

/// Thin wrapper around a configured `reqwest::Client` for control-plane access.
///
/// The agent key is installed as a default header. Per-call credentials, when
/// present, replace the default `Authorization` header for that call only.
#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    base_url: Url,
    http: Client,
    user_agent: String,
}

impl ControlPlaneClient {
    pub fn new(base_url: &str, agent_key: Option<String>, timeout: Duration) -> Result<Self, ControlPlaneError> {
        let base_url = validate_base_url(base_url)?;

        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(key) = agent_key.filter(|k| !k.is_empty()) {
            let bearer = header::HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| ControlPlaneError::Config(format!("agent key is not a valid header value: {e}")))?;
            let raw = header::HeaderValue::from_str(&key)
                .map_err(|e| ControlPlaneError::Config(format!("agent key is not a valid header value: {e}")))?;
            default_headers.insert(header::AUTHORIZATION, bearer);
            default_headers.insert(AGENT_KEY_HEADER, raw);
        }

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .map_err(|e| ControlPlaneError::Config(format!("build http client: {e}")))?;

        Ok(Self { base_url, http, user_agent: format!("outpost-agent/{}; {}", env!("CARGO_PKG_VERSION"), std::env::consts::OS) })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self, ControlPlaneError> {
        Self::new(&config.server_url, config.agent_key.clone(), config.request_timeout)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ControlPlaneError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ControlPlaneError::Config(format!("base url '{}' cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, credentials: Option<&AgentCredentials>) -> RequestBuilder {
        debug!(%url, %method, "building control plane request");
        let mut builder = self.http.request(method, url).header(header::USER_AGENT, &self.user_agent);
        if let Some(authorization) = credentials.and_then(AgentCredentials::authorization) {
            builder = builder.header(header::AUTHORIZATION, authorization);
        }
        builder
    }

    /// Sends the request and unwraps the `data` envelope.
    async fn send_data<T: DeserializeOwned>(&self, builder: RequestBuilder, url: &Url) -> Result<Option<T>, ControlPlaneError> {
        let response = builder.send().await.map_err(|source| ControlPlaneError::Transport { url: url.to_string(), source })?;
        let status = response.status();
        let body = response.text().await.map_err(|source| ControlPlaneError::Transport { url: url.to_string(), source })?;
        if !status.is_success() {
            debug!(%url, status = status.as_u16(), "control plane request failed");
            return Err(ControlPlaneError::from_status(status.as_u16(), &body));
        }
        if body.trim().is_empty() {
            return Ok(None);
        }
        let envelope: Envelope<T> =
            serde_json::from_str(&body).map_err(|e| ControlPlaneError::Decode { url: url.to_string(), reason: e.to_string() })?;
        Ok(envelope.data)
    }
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS
pub fn validate_base_url(base: &str) -> Result<Url, ControlPlaneError> {
    let parsed = Url::parse(base).map_err(|e| ControlPlaneError::Config(format!("invalid server url '{base}': {e}")))?;

    let host_name = parsed.host_str().ok_or_else(|| ControlPlaneError::Config(format!("server url '{base}' must include a host")))?;

    if LOCALHOST_DOMAINS.iter().any(|&allowed| host_name.eq_ignore_ascii_case(allowed)) {
        return Ok(parsed);
    }

    if parsed.scheme() != "https" {
        return Err(ControlPlaneError::Config(format!(
            "server url must use https for non-localhost hosts; got '{}://'",
            parsed.scheme()
        )));
    }
    Ok(parsed)
}

fn token_segments(scope: &TokenScopeId) -> &'static [&'static str] {
    match scope {
        TokenScopeId::Datasource(_) => &["userToken"],
        TokenScopeId::User => &["user", "userToken"],
    }
}

#[async_trait]
impl DefinitionSource for ControlPlaneClient {
    async fn fetch_definition(&self, request: &DefinitionRequest, credentials: &AgentCredentials) -> Result<ApiDefinition, ControlPlaneError> {
        let collection = if request.is_workflow { "workflows" } else { "api" };
        let url = self.endpoint(&[collection, request.api_id.as_str()])?;
        let published = request.published.to_string();
        let builder = self
            .request(Method::GET, url.clone(), Some(credentials))
            .query(&[("isPublished", published.as_str()), ("environment", request.environment.as_str())]);
        self.send_data::<ApiDefinition>(builder, &url)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found(format!("definition {} not returned", request.api_id)))
    }
}

#[async_trait]
impl TokenStore for ControlPlaneClient {
    async fn get(&self, credentials: &AgentCredentials, query: &TokenQuery) -> Result<Option<CachedToken>, ControlPlaneError> {
        let url = self.endpoint(token_segments(&query.scope))?;
        let body = json!({
            "authType": query.auth_type,
            "authConfig": query.auth_config,
            "tokenType": query.kind,
            "datasourceId": query.scope.datasource_id(),
        });
        let builder = self.request(Method::GET, url.clone(), Some(credentials)).json(&body);
        self.send_data::<CachedToken>(builder, &url).await
    }

    async fn put(
        &self,
        credentials: &AgentCredentials,
        query: &TokenQuery,
        token: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), ControlPlaneError> {
        let url = self.endpoint(token_segments(&query.scope))?;
        let body = json!({
            "authType": query.auth_type,
            "authConfig": query.auth_config,
            "tokenType": query.kind,
            "tokenValue": token,
            "expiresAt": expires_at,
            "datasourceId": query.scope.datasource_id(),
        });
        let builder = self.request(Method::POST, url.clone(), Some(credentials)).json(&body);
        self.send_data::<Value>(builder, &url).await.map(|_| ())
    }
}

#[async_trait]
impl RefreshDelegate for ControlPlaneClient {
    async fn refresh_on_server(&self, credentials: &AgentCredentials, request: &RefreshRequest) -> Result<Option<String>, ControlPlaneError> {
        let url = self.endpoint(&["oauth2", request.plugin_id.as_str(), "refresh"])?;
        let body = json!({
            "authType": request.auth_type,
            "authConfig": request.auth_config,
            "datasourceId": request.datasource_id,
        });
        let builder = self.request(Method::POST, url.clone(), Some(credentials)).json(&body);
        let data = self.send_data::<Value>(builder, &url).await?;
        Ok(data.and_then(|v| match v {
            Value::String(token) if !token.is_empty() => Some(token),
            other => other.get("access_token").or_else(|| other.get("token")).and_then(Value::as_str).map(str::to_string),
        }))
    }
}

#[async_trait]
impl PendingJobsFeed for ControlPlaneClient {
    async fn fetch_pending_jobs(&self) -> Result<Vec<ApiDefinition>, ControlPlaneError> {
        let url = self.endpoint(&["pending-jobs"])?;
        let builder = self.request(Method::POST, url.clone(), None).json(&json!({}));
        Ok(self.send_data::<Vec<ApiDefinition>>(builder, &url).await?.unwrap_or_default())
    }
}

#[async_trait]
impl AuditSink for ControlPlaneClient {
    async fn record(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        let url = self.endpoint(&["audit"])?;
        let builder = self.request(Method::POST, url.clone(), None).json(entry);
        self.send_data::<Value>(builder, &url).await?;
        Ok(())
    }
}
