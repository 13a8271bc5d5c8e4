//! Auth bindings and header injection for datasource configurations.

use outpost_types::{AuthContext, AuthType, DatasourceConfiguration, ExecutionState, HeaderEntry};
use serde_json::{Map, Value};

use crate::StatePair;

/// Key into the execution's auth contexts for this configuration.
pub fn auth_id<'a>(configuration: &'a DatasourceConfiguration, datasource_id: &'a str) -> &'a str {
    configuration.auth_config.auth_id.as_deref().filter(|id| !id.is_empty()).unwrap_or(datasource_id)
}

/// Whether a request cannot authenticate without a bound token.
pub fn expects_bindings(configuration: &DatasourceConfiguration) -> bool {
    let config = &configuration.auth_config;
    match configuration.effective_auth_type() {
        AuthType::None | AuthType::Unknown => false,
        AuthType::Basic => !config.share_basic_auth_creds,
        AuthType::OAuth2Password => !config.use_fixed_password_creds,
        AuthType::OAuth2ClientCredentials | AuthType::OAuth2Implicit | AuthType::OAuth2Code | AuthType::Firebase => true,
    }
}

/// Binds the params from the matching auth context under the scheme's binding
/// key, real values in the authoritative view and display values in the
/// redacted one.
pub fn bind_auth_contexts(states: &mut StatePair, auth_contexts: &AuthContext, configuration: &DatasourceConfiguration, datasource_id: &str) {
    let key = configuration.effective_auth_type().binding_key();
    if key.is_empty() {
        return;
    }
    let Some(params) = auth_contexts.get(auth_id(configuration, datasource_id)) else {
        return;
    };
    if params.is_empty() {
        return;
    }

    let mut real = Map::new();
    let mut redacted = Map::new();
    for param in params {
        real.insert(param.key.clone(), param.value.clone());
        redacted.insert(param.key.clone(), param.display_value().clone());
    }
    states.add_variable(key, Value::Object(real), Value::Object(redacted));
}

/// Token bound under `key`, if any.
pub fn bound_token<'a>(state: &'a ExecutionState, key: &str) -> Option<&'a str> {
    if key.is_empty() {
        return None;
    }
    state.global(key).and_then(|binding| binding.get("token")).and_then(Value::as_str).filter(|token| !token.is_empty())
}

/// Copy of `configuration` with an `Authorization` header appended.
pub fn with_authorization_header(configuration: &DatasourceConfiguration, value: String) -> DatasourceConfiguration {
    let mut updated = configuration.clone();
    updated.headers.push(HeaderEntry::new("Authorization", value));
    updated
}
