use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use outpost_api::{ControlPlaneError, RefreshDelegate, RefreshRequest, TokenQuery, TokenStore};
use outpost_types::{AgentCredentials, AuthConfig, AuthType, TokenKind, TokenScopeId};
use tracing::{debug, warn};

use super::{CredentialError, OAuthClient};

/// The datasource whose token is being looked up.
#[derive(Debug, Clone, Copy)]
pub struct TokenTarget<'a> {
    pub plugin_id: &'a str,
    pub datasource_id: &'a str,
    pub auth_type: AuthType,
    pub auth_config: &'a AuthConfig,
}

impl TokenTarget<'_> {
    fn access_query(&self) -> TokenQuery {
        TokenQuery::new(self.auth_type, self.auth_config, TokenKind::Access, TokenScopeId::for_config(self.auth_config, self.datasource_id))
    }
}

/// Obtains OAuth tokens for datasources.
///
/// Cached tokens come from the control-plane token store. Refreshes run either
/// locally against the provider's token endpoint or, when the auth config asks
/// for it, on the control plane.
pub struct CredentialManager {
    store: Arc<dyn TokenStore>,
    delegate: Arc<dyn RefreshDelegate>,
    oauth: OAuthClient,
    eager_refresh_threshold: Duration,
}

impl CredentialManager {
    pub fn new(store: Arc<dyn TokenStore>, delegate: Arc<dyn RefreshDelegate>, oauth: OAuthClient, eager_refresh_threshold: Duration) -> Self {
        Self { store, delegate, oauth, eager_refresh_threshold }
    }

    /// Returns a usable access token, refreshing it when it is missing or
    /// expires within the eager-refresh threshold.
    pub async fn get_or_refresh_token(
        &self,
        credentials: &AgentCredentials,
        target: &TokenTarget<'_>,
        eager_refresh_threshold: Option<Duration>,
    ) -> Result<String, CredentialError> {
        let threshold = chrono::Duration::from_std(eager_refresh_threshold.unwrap_or(self.eager_refresh_threshold))
            .unwrap_or_else(|_| chrono::Duration::zero());
        let query = target.access_query();

        if let Some(cached) = self.store.get(credentials, &query).await? {
            if !cached.value.is_empty() && !cached.expires_within(threshold, Utc::now()) {
                return Ok(cached.value);
            }
            debug!(datasource_id = %target.datasource_id, "cached token missing or expiring, refreshing");
        }

        if target.auth_config.refresh_token_from_server {
            return self.refresh_on_server(credentials, target).await?.ok_or(CredentialError::ServerRefreshFailed);
        }

        if !self.refresh_on_agent(credentials, &query).await {
            return Err(CredentialError::AgentRefreshFailed);
        }
        self.store
            .get(credentials, &query)
            .await?
            .map(|token| token.value)
            .filter(|value| !value.is_empty())
            .ok_or(CredentialError::TokenNotFound)
    }

    /// Asks the control plane to refresh the token.
    pub async fn refresh_on_server(&self, credentials: &AgentCredentials, target: &TokenTarget<'_>) -> Result<Option<String>, CredentialError> {
        let request = RefreshRequest {
            plugin_id: target.plugin_id.to_string(),
            auth_type: target.auth_type,
            auth_config: target.auth_config.clone(),
            datasource_id: target.datasource_id.to_string(),
        };
        match self.delegate.refresh_on_server(credentials, &request).await {
            Ok(token) => Ok(token.filter(|t| !t.is_empty())),
            Err(err @ (ControlPlaneError::BadRequest { .. } | ControlPlaneError::NotFound { .. })) => {
                Err(CredentialError::Revoked { reason: err.to_string() })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Refreshes against the provider using the stored refresh token and
    /// writes the new tokens back. Returns whether that worked.
    pub async fn refresh_on_agent(&self, credentials: &AgentCredentials, query: &TokenQuery) -> bool {
        let refresh_query = query.with_kind(TokenKind::Refresh);
        let refresh_token = match self.store.get(credentials, &refresh_query).await {
            Ok(Some(token)) if !token.value.is_empty() => token.value,
            Ok(_) => {
                warn!(scope = ?query.scope, "no refresh token stored, cannot refresh on agent");
                return false;
            }
            Err(err) => {
                warn!(error = %err, "failed to read refresh token");
                return false;
            }
        };

        let issued = match self.oauth.refresh(&query.auth_config, &refresh_token).await {
            Ok(issued) => issued,
            Err(err) => {
                warn!(error = %err, "token refresh on agent failed");
                return false;
            }
        };

        if let Err(err) = self.store.put(credentials, query, &issued.access_token, Some(issued.expires_at)).await {
            warn!(error = %err, "failed to store refreshed access token");
            return false;
        }
        if let Some(new_refresh) = issued.refresh_token.as_deref()
            && let Err(err) = self.store.put(credentials, &refresh_query, new_refresh, Some(issued.refresh_expires_at)).await
        {
            warn!(error = %err, "failed to store rotated refresh token");
        }
        true
    }

    /// Fetches a client-credentials token and caches it for the datasource.
    pub async fn client_credentials_token(
        &self,
        credentials: &AgentCredentials,
        config: &AuthConfig,
        datasource_id: &str,
    ) -> Result<String, CredentialError> {
        let issued = self.oauth.client_credentials(config).await?;
        let query = TokenQuery::new(AuthType::OAuth2ClientCredentials, config, TokenKind::Access, TokenScopeId::Datasource(datasource_id.to_string()));
        self.cache_in_background(credentials, query, issued.access_token.clone(), issued.expires_at);
        Ok(issued.access_token)
    }

    /// Password grant with fixed credentials, preferring a stored refresh token.
    pub async fn password_token(&self, credentials: &AgentCredentials, config: &AuthConfig, datasource_id: &str) -> Result<String, CredentialError> {
        let access_query =
            TokenQuery::new(AuthType::OAuth2Password, config, TokenKind::Access, TokenScopeId::Datasource(datasource_id.to_string()));
        let refresh_query = access_query.with_kind(TokenKind::Refresh);

        let stored_refresh = match self.store.get(credentials, &refresh_query).await {
            Ok(token) => token.map(|t| t.value).filter(|v| !v.is_empty()),
            Err(err) => {
                debug!(error = %err, "could not read stored refresh token");
                None
            }
        };

        let issued = match stored_refresh {
            Some(refresh_token) => match self.oauth.refresh(config, &refresh_token).await {
                Ok(issued) => issued,
                Err(err) => {
                    debug!(error = %err, "refresh failed, falling back to password grant");
                    self.oauth.password(config).await?
                }
            },
            None => self.oauth.password(config).await?,
        };

        self.cache_in_background(credentials, access_query, issued.access_token.clone(), issued.expires_at);
        if let Some(refresh_token) = issued.refresh_token {
            self.cache_in_background(credentials, refresh_query, refresh_token, issued.refresh_expires_at);
        }
        Ok(issued.access_token)
    }

    fn cache_in_background(&self, credentials: &AgentCredentials, query: TokenQuery, token: String, expires_at: DateTime<Utc>) {
        let store = self.store.clone();
        let credentials = credentials.clone();
        tokio::spawn(async move {
            if let Err(err) = store.put(&credentials, &query, &token, Some(expires_at)).await {
                debug!(error = %err, kind = query.kind.as_str(), "failed to cache token");
            }
        });
    }
}
