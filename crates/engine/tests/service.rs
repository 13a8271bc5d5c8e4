mod support;

use std::sync::Arc;

use outpost_engine::plugin::{EchoPlugin, PluginRegistry};
use outpost_engine::{EngineError, ExecuteOptions, FetchAndExecuteRequest, JobExecutor, RecursionGuard, WorkflowFetcher};
use outpost_types::{AgentCredentials, DatasourceConfiguration, DynamicWorkflowConfiguration, TriggerType};
use serde_json::json;

use support::{Harness, ScriptedPlugins, action, datasource, definition, no_auth, outputs};

fn workflow_request(api_id: &str) -> FetchAndExecuteRequest {
    FetchAndExecuteRequest { is_workflow: true, ..FetchAndExecuteRequest::new(api_id, "staging") }
}

async fn echo_registry() -> PluginRegistry {
    let registry = PluginRegistry::new();
    registry.register(Arc::new(EchoPlugin)).await.expect("register echo");
    registry
}

#[tokio::test]
async fn unauthorized_fetch_propagates() {
    let harness = Harness::new(Arc::new(ScriptedPlugins::default()));
    harness.definitions.fail_with("api-1", 401, r#"{"message": "bad key"}"#);

    let err = harness
        .service
        .fetch_and_execute(FetchAndExecuteRequest::new("api-1", "staging"), &mut RecursionGuard::new())
        .await
        .expect_err("unauthorized");

    assert!(matches!(err, EngineError::Unauthorized { .. }), "{err:?}");
}

#[tokio::test]
async fn rate_limited_fetch_propagates() {
    let harness = Harness::new(Arc::new(ScriptedPlugins::default()));
    harness.definitions.fail_with("api-1", 429, "slow down");

    let err = harness
        .service
        .fetch_and_execute(FetchAndExecuteRequest::new("api-1", "staging"), &mut RecursionGuard::new())
        .await
        .expect_err("rate limited");

    assert_eq!(err.kind(), "too_many_requests");
}

#[tokio::test]
async fn rbac_denial_keeps_its_message() {
    let harness = Harness::new(Arc::new(ScriptedPlugins::default()));
    harness.definitions.fail_with("wf-1", 403, r#"{"code": "RBAC_UNAUTHORIZED", "message": "no access to workflow"}"#);

    let err = harness.service.fetch_and_execute(workflow_request("wf-1"), &mut RecursionGuard::new()).await.expect_err("rbac");

    assert_eq!(err, EngineError::RbacUnauthorized { message: "no access to workflow".into() });
}

#[tokio::test]
async fn other_fetch_failures_come_back_as_error_responses() {
    let plugins = Arc::new(ScriptedPlugins::default());
    let harness = Harness::new(plugins.clone());
    harness.definitions.fail_with("api-1", 500, r#"{"message": "database unavailable"}"#);

    let response = harness
        .service
        .fetch_and_execute(FetchAndExecuteRequest::new("api-1", "staging"), &mut RecursionGuard::new())
        .await
        .expect("error response");

    assert_eq!(response.api_id, "api-1");
    let error = response.state.error.as_deref().expect("error");
    assert!(error.contains("database unavailable"), "{error}");
    assert!(response.state.outputs.is_empty());
    assert!(plugins.executed().is_empty());
}

#[tokio::test]
async fn unknown_definition_is_an_error_response() {
    let harness = Harness::new(Arc::new(ScriptedPlugins::default()));

    let response = harness
        .service
        .fetch_and_execute(FetchAndExecuteRequest::new("missing", "staging"), &mut RecursionGuard::new())
        .await
        .expect("error response");

    assert!(response.state.error.as_deref().is_some_and(|e| e.contains("no definition missing")));
}

#[tokio::test]
async fn workflow_already_on_the_stack_is_a_cycle() {
    let harness = Harness::new(Arc::new(ScriptedPlugins::default()));
    harness.definitions.insert(definition("wf-a", "A", vec![action("a1", "Step1", "ds1", None)], vec![datasource("ds1", no_auth())]));
    let mut recursion = RecursionGuard::new();
    recursion.enter("wf-a", "A").expect("enter a");
    recursion.enter("wf-b", "B").expect("enter b");

    let err = harness.service.fetch_and_execute(workflow_request("wf-a"), &mut recursion).await.expect_err("cycle");

    assert_eq!(err.message(), "Workflow cycle detected: A -> B -> A");
    assert_eq!(harness.definitions.fetch_count(), 0);
}

#[tokio::test]
async fn workflow_frame_is_popped_after_the_run() {
    let harness = Harness::new(Arc::new(ScriptedPlugins::default()));
    harness.definitions.insert(definition("wf-a", "A", vec![action("a1", "Step1", "ds1", None)], vec![datasource("ds1", no_auth())]));
    let mut recursion = RecursionGuard::new();

    let response = harness.service.fetch_and_execute(workflow_request("wf-a"), &mut recursion).await.expect("execution");

    assert_eq!(outputs(&response.state), vec!["Step1"]);
    assert!(recursion.path().is_empty());
}

#[tokio::test]
async fn definitions_without_actions_are_rejected() {
    let harness = Harness::new(Arc::new(ScriptedPlugins::default()));
    harness.definitions.insert(definition("api-1", "Empty", Vec::new(), Vec::new()));

    let err = harness
        .service
        .fetch_and_execute(FetchAndExecuteRequest::new("api-1", "staging"), &mut RecursionGuard::new())
        .await
        .expect_err("empty");

    assert_eq!(err, EngineError::not_found("API action is empty"));
}

#[tokio::test]
async fn org_key_is_used_when_the_caller_has_no_credentials() {
    let harness = Harness::new(Arc::new(ScriptedPlugins::default()));
    harness.definitions.insert(definition("wf-creds", "Creds", vec![action("w1", "Fetch", "ds-static", None)], vec![datasource("ds-static", no_auth())]));
    let dynamic = DatasourceConfiguration {
        dynamic_workflow_configuration: Some(DynamicWorkflowConfiguration { workflow_id: Some("wf-creds".into()) }),
        ..DatasourceConfiguration::default()
    };
    let mut api = definition("api-1", "Orders", vec![action("a1", "Step1", "ds1", None)], vec![datasource("ds1", dynamic)]);
    api.org_api_key = Some("org-key".into());

    harness.service.execute_definition(api.clone(), ExecuteOptions::default()).await.expect("execution");
    let caller = ExecuteOptions {
        credentials: AgentCredentials { jwt: Some("user-jwt".into()), ..AgentCredentials::default() },
        ..ExecuteOptions::default()
    };
    harness.service.execute_definition(api, caller).await.expect("execution");

    let callers = harness.definitions.callers();
    assert_eq!(callers.len(), 2);
    assert_eq!(callers[0], AgentCredentials::from_org_api_key("org-key"));
    assert_eq!(callers[1].jwt.as_deref(), Some("user-jwt"));
}

#[tokio::test]
async fn scheduled_jobs_run_in_production() {
    let plugins = Arc::new(ScriptedPlugins::default());
    let harness = Harness::new(plugins.clone());
    let mut api = definition("job-1", "Nightly", vec![action("a1", "Step1", "ds1", None)], vec![datasource("ds1", no_auth())]);
    api.api.trigger_type = TriggerType::Schedule;

    let response = harness.service.execute_job(api).await.expect("job");

    assert!(response.state.error.is_none());
    assert_eq!(plugins.requests()[0].environment, "production");
}

#[tokio::test]
async fn datasource_metadata_comes_from_the_plugin() {
    let harness = Harness::new(Arc::new(ScriptedPlugins::default()));
    let registry = echo_registry().await;
    let mut configuration = DatasourceConfiguration::default();
    configuration.extra.insert("host".into(), json!("{{ Env.region }}.db"));
    let source = datasource("ds1", configuration);

    let metadata = harness
        .service
        .datasource_metadata(&registry, &source, "staging", &AgentCredentials::default(), Some(&json!({"table": "orders"})))
        .await
        .expect("metadata");

    assert_eq!(metadata, json!({"plugin": "echo", "actionConfiguration": {"table": "orders"}}));
}

#[tokio::test]
async fn datasource_test_reports_failures_in_the_result() {
    let harness = Harness::new(Arc::new(ScriptedPlugins::default()));
    let registry = echo_registry().await;
    let healthy = datasource("ds1", no_auth());
    let mut unknown = datasource("ds2", no_auth());
    unknown.plugin_id = "postgres".into();

    let ok = harness.service.test_datasource(&registry, &healthy, "staging", &AgentCredentials::default()).await;
    let failed = harness.service.test_datasource(&registry, &unknown, "staging", &AgentCredentials::default()).await;

    assert!(ok.success);
    assert!(!failed.success);
    assert_eq!(failed.message.as_deref(), Some("Plugin not found: postgres"));
}
