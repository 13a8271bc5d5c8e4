mod support;

use std::sync::Arc;

use outpost_api::{AuditAction, AuditResult};
use outpost_engine::plugin::{EchoPlugin, PluginRegistry, RegistryPluginRunner};
use outpost_engine::resolve::TemplateBindingResolver;
use outpost_engine::{FetchAndExecuteRequest, RecursionGuard};
use outpost_types::{AuthConfig, AuthType, DatasourceConfiguration, ExecutionParam, StepOutput};
use serde_json::json;

use support::{Harness, ScriptedPlugins, action, datasource, definition, globals, no_auth, outputs};

async fn run(harness: &Harness, api_id: &str) -> outpost_types::ExecutionResponse {
    let mut recursion = RecursionGuard::new();
    harness.service.fetch_and_execute(FetchAndExecuteRequest::new(api_id, "staging"), &mut recursion).await.expect("execution")
}

#[tokio::test]
async fn two_steps_on_one_datasource_resolve_it_once() {
    let plugins = Arc::new(ScriptedPlugins::default());
    let harness = Harness::new(plugins.clone());
    harness.definitions.insert(definition(
        "api-1",
        "Orders",
        vec![action("a1", "Step1", "ds1", Some("a2")), action("a2", "Step2", "ds1", None)],
        vec![datasource("ds1", no_auth())],
    ));

    let response = run(&harness, "api-1").await;

    assert_eq!(outputs(&response.state), vec!["Step1", "Step2"]);
    assert!(response.state.error.is_none());
    // One evaluation resolves the real and the redacted configuration.
    assert_eq!(harness.bindings.call_count(), 2);
    let requests = plugins.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].datasource_configuration, requests[1].datasource_configuration);
}

#[tokio::test]
async fn failing_middle_step_stops_the_chain() {
    let plugins = Arc::new(ScriptedPlugins::default());
    plugins.script("B", Ok(StepOutput::failed("upstream returned 500")));
    let harness = Harness::new(plugins.clone());
    harness.definitions.insert(definition(
        "api-1",
        "Chain",
        vec![action("a", "A", "ds1", Some("b")), action("b", "B", "ds1", Some("c")), action("c", "C", "ds1", None)],
        vec![datasource("ds1", no_auth())],
    ));

    let response = run(&harness, "api-1").await;

    assert_eq!(outputs(&response.state), vec!["A", "B"]);
    assert_eq!(response.state.error.as_deref(), Some("upstream returned 500"));
    assert_eq!(response.state.error_context.as_ref().map(|c| c.action_name.as_str()), Some("B"));
    assert_eq!(plugins.executed(), vec!["A", "B"]);
    assert_eq!(response.state.output("A").map(|o| o.children.clone()), Some(vec!["B".to_string()]));
}

#[tokio::test]
async fn plugin_fault_becomes_a_failed_step() {
    let plugins = Arc::new(ScriptedPlugins::default());
    plugins.script("Step1", Err("connection refused".into()));
    let harness = Harness::new(plugins.clone());
    harness.definitions.insert(definition(
        "api-1",
        "Orders",
        vec![action("a1", "Step1", "ds1", Some("a2")), action("a2", "Step2", "ds1", None)],
        vec![datasource("ds1", no_auth())],
    ));

    let response = run(&harness, "api-1").await;

    assert_eq!(outputs(&response.state), vec!["Step1"]);
    assert_eq!(response.state.error.as_deref(), Some("Fatal error: failed to execute action Step1: connection refused"));
}

#[tokio::test]
async fn missing_datasource_fails_before_any_step_runs() {
    let plugins = Arc::new(ScriptedPlugins::default());
    let harness = Harness::new(plugins.clone());
    harness.definitions.insert(definition(
        "api-1",
        "Orders",
        vec![action("a1", "Step1", "ds1", Some("a2")), action("a2", "Step2", "ds9", None)],
        vec![datasource("ds1", no_auth())],
    ));

    let response = run(&harness, "api-1").await;

    assert!(plugins.executed().is_empty());
    assert_eq!(outputs(&response.state), vec!["Step2"]);
    assert_eq!(response.state.error.as_deref(), Some("Datasource ds9 not found for action Step2"));
}

#[tokio::test]
async fn views_share_names_and_only_secrets_differ() {
    let plugins = Arc::new(ScriptedPlugins::default());
    let harness = Harness::new(plugins.clone());
    let basic = DatasourceConfiguration {
        auth_type: Some(AuthType::Basic),
        auth_config: AuthConfig {
            share_basic_auth_creds: true,
            username: Some("svc".into()),
            password: Some("pw".into()),
            ..AuthConfig::default()
        },
        ..DatasourceConfiguration::default()
    };
    harness.definitions.insert(definition("api-1", "Orders", vec![action("a1", "Step1", "ds1", None)], vec![datasource("ds1", basic)]));

    let mut request = FetchAndExecuteRequest::new("api-1", "staging");
    request.params = vec![ExecutionParam { key: "body".into(), value: json!({"id": 7}) }];
    let response = harness.service.fetch_and_execute(request, &mut RecursionGuard::new()).await.expect("execution");

    let mut names = globals(&response.state);
    names.sort_unstable();
    assert_eq!(names, vec!["$fileServerUrl", "$flagWorker", "Env", "body"]);
    assert_eq!(response.state.global("Env"), Some(&json!({"region": "eu", "db_password": "<redacted>"})));

    let request = &plugins.requests()[0];
    assert_eq!(request.state.global("Env").and_then(|env| env.get("db_password")), Some(&json!("hunter2")));
    assert_eq!(request.state.globals.keys().collect::<Vec<_>>(), request.redacted_state.globals.keys().collect::<Vec<_>>());
    let header = |config: &DatasourceConfiguration| config.headers.first().map(|h| h.value.clone());
    assert_eq!(header(&request.datasource_configuration).as_deref(), Some("Basic c3ZjOnB3"));
    assert_eq!(header(&request.redacted_datasource_configuration).as_deref(), Some("Basic <redacted>"));
}

#[tokio::test]
async fn echo_chain_end_to_end() {
    let registry = PluginRegistry::new();
    registry.register(Arc::new(EchoPlugin)).await.expect("register echo");
    let runner = Arc::new(RegistryPluginRunner::new(registry, Arc::new(TemplateBindingResolver)));
    let harness = Harness::new(runner);

    let mut a1 = action("a1", "Step1", "ds1", Some("a2"));
    a1.configuration = json!({"value": 42});
    let mut a2 = action("a2", "Step2", "ds1", None);
    a2.configuration = json!({"copied": "{{ Step1.output.value }}"});
    harness.definitions.insert(definition("api-1", "Orders", vec![a1, a2], vec![datasource("ds1", no_auth())]));

    let response = run(&harness, "api-1").await;

    assert!(response.state.error.is_none(), "{:?}", response.state.error);
    assert_eq!(response.state.outputs.len(), 2);
    assert_eq!(response.last_output(), Some(&json!({"copied": "42"})));
    assert_eq!(harness.bindings.call_count(), 2);
}

#[tokio::test]
async fn audit_records_execution_and_steps() {
    let plugins = Arc::new(ScriptedPlugins::default());
    let mut logged = StepOutput::new(json!({}));
    logged.log_info(r#"{"rows": 2}"#);
    logged.log_warn("slow");
    plugins.script("Step1", Ok(logged));
    let harness = Harness::new(plugins);
    harness.definitions.insert(definition("api-1", "Orders", vec![action("a1", "Step1", "ds1", None)], vec![datasource("ds1", no_auth())]));

    run(&harness, "api-1").await;

    let entries = harness.audit.entries();
    let shape: Vec<(AuditAction, AuditResult)> = entries.iter().map(|e| (e.action, e.result)).collect();
    assert_eq!(
        shape,
        vec![
            (AuditAction::Execution, AuditResult::InProgress),
            (AuditAction::Step, AuditResult::InProgress),
            (AuditAction::Step, AuditResult::Success),
            (AuditAction::Execution, AuditResult::Success),
        ]
    );
    assert_eq!(entries[2].logs, vec![json!({"rows": 2})]);
}

#[tokio::test]
async fn notification_bindings_resolve_against_redacted_state() {
    let plugins = Arc::new(ScriptedPlugins::default());
    let harness = Harness::new(plugins);
    let mut api = definition("api-1", "Orders", vec![action("a1", "Step1", "ds1", None)], vec![datasource("ds1", no_auth())]);
    api.api.actions.notification_config = Some(json!({"subject": "Done in {{ Env.region }}", "secret": "{{ Env.db_password }}"}));
    harness.definitions.insert(api);

    let response = run(&harness, "api-1").await;

    assert_eq!(response.notification_config, Some(json!({"subject": "Done in eu", "secret": "<redacted>"})));
}

#[tokio::test]
async fn unresolvable_notification_does_not_mask_the_result() {
    let plugins = Arc::new(ScriptedPlugins::default());
    let harness = Harness::new(plugins);
    let mut api = definition("api-1", "Orders", vec![action("a1", "Step1", "ds1", None)], vec![datasource("ds1", no_auth())]);
    api.api.actions.notification_config = Some(json!({"subject": "{{ Missing.value }}"}));
    harness.definitions.insert(api);

    let response = run(&harness, "api-1").await;

    assert!(response.state.error.is_none());
    assert_eq!(response.notification_config, None);
    assert_eq!(outputs(&response.state), vec!["Step1"]);
}
