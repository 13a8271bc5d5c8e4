use std::time::Duration;

use outpost_api::{
    AGENT_KEY_HEADER, ControlPlaneClient, ControlPlaneError, DefinitionRequest, DefinitionSource, PendingJobsFeed, RefreshDelegate,
    RefreshRequest, TokenQuery, TokenStore,
};
use outpost_types::{AgentCredentials, AuthConfig, AuthType, TokenKind, TokenScopeId};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ControlPlaneClient {
    ControlPlaneClient::new(&server.uri(), Some("agent-key".into()), Duration::from_secs(5)).expect("client")
}

fn definition_body() -> serde_json::Value {
    json!({
        "data": {
            "api": {"id": "wf-1", "name": "Nightly", "triggerType": "workflow", "actions": {"triggerActionId": "a1", "actions": {}}},
            "datasources": {},
            "orgApiKey": "org-key"
        }
    })
}

#[tokio::test]
async fn fetches_published_workflow_definition() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/workflows/wf-1"))
        .and(query_param("isPublished", "true"))
        .and(query_param("environment", "production"))
        .and(header("authorization", "Bearer user-jwt"))
        .and(header(AGENT_KEY_HEADER, "agent-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(definition_body()))
        .expect(1)
        .mount(&server)
        .await;

    let creds = AgentCredentials { jwt: Some("user-jwt".into()), api_key: None };
    let def = client_for(&server)
        .fetch_definition(&DefinitionRequest::workflow("wf-1", "production", true), &creds)
        .await
        .expect("definition");
    assert_eq!(def.api.name, "Nightly");
    assert_eq!(def.org_api_key.as_deref(), Some("org-key"));
}

#[tokio::test]
async fn agent_key_is_default_authorization() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/api-1"))
        .and(header("authorization", "Bearer agent-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(definition_body()))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .fetch_definition(&DefinitionRequest::api("api-1", "staging", false), &AgentCredentials::default())
        .await
        .expect("definition");
}

#[tokio::test]
async fn maps_rbac_and_rate_limit_failures() {
    let server = MockServer::start().await;
    Mock::given(path("/api/forbidden"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"responseMeta": {"error": {"code": "RBAC_UNAUTHORIZED", "message": "nope"}}})),
        )
        .mount(&server)
        .await;
    Mock::given(path("/api/busy")).respond_with(ResponseTemplate::new(429)).mount(&server).await;

    let client = client_for(&server);
    let creds = AgentCredentials::default();
    let rbac = client.fetch_definition(&DefinitionRequest::api("forbidden", "production", true), &creds).await.expect_err("rbac");
    assert!(matches!(rbac, ControlPlaneError::RbacUnauthorized { .. }), "{rbac:?}");

    let busy = client.fetch_definition(&DefinitionRequest::api("busy", "production", true), &creds).await.expect_err("429");
    assert!(matches!(busy, ControlPlaneError::TooManyRequests { .. }), "{busy:?}");
    assert_eq!(busy.status(), Some(429));
}

#[tokio::test]
async fn token_store_uses_scope_specific_paths() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/userToken"))
        .and(body_partial_json(json!({"tokenType": "access", "datasourceId": "ds1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"value": "cached", "expiresAt": null}})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user/userToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": null})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/user/userToken"))
        .and(body_partial_json(json!({"tokenType": "refresh", "tokenValue": "r-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let creds = AgentCredentials::default();
    let config = AuthConfig::default();

    let by_datasource = TokenQuery::new(AuthType::OAuth2Code, &config, TokenKind::Access, TokenScopeId::Datasource("ds1".into()));
    let cached = client.get(&creds, &by_datasource).await.expect("get").expect("token present");
    assert_eq!(cached.value, "cached");
    assert_eq!(cached.kind, TokenKind::Access);

    let per_user = TokenQuery::new(AuthType::OAuth2Code, &config, TokenKind::Access, TokenScopeId::User);
    assert!(client.get(&creds, &per_user).await.expect("get").is_none());

    client.put(&creds, &per_user.with_kind(TokenKind::Refresh), "r-1", None).await.expect("put");
}

#[tokio::test]
async fn server_refresh_returns_token_or_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/gsheets/refresh"))
        .and(body_partial_json(json!({"datasourceId": "ds-ok"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": "fresh-token"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth2/gsheets/refresh"))
        .and(body_partial_json(json!({"datasourceId": "ds-empty"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": null})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let creds = AgentCredentials::default();
    let request = |ds: &str| RefreshRequest {
        plugin_id: "gsheets".into(),
        auth_type: AuthType::OAuth2Code,
        auth_config: AuthConfig::default(),
        datasource_id: ds.into(),
    };
    assert_eq!(client.refresh_on_server(&creds, &request("ds-ok")).await.expect("refresh").as_deref(), Some("fresh-token"));
    assert_eq!(client.refresh_on_server(&creds, &request("ds-empty")).await.expect("refresh"), None);
}

#[tokio::test]
async fn pending_jobs_default_to_empty() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pending-jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let jobs = client_for(&server).fetch_pending_jobs().await.expect("jobs");
    assert!(jobs.is_empty());
}
