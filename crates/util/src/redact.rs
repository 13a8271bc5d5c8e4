use base64::{Engine as _, engine::general_purpose::STANDARD};
use once_cell::sync::Lazy;
use outpost_types::REDACTED_PLACEHOLDER;
use regex::Regex;
use serde_json::Value;

const MAX_LOGGED_BODY_CHARS: usize = 500;

const SECRET_RESPONSE_FIELDS: [&str; 7] = ["access_token", "refresh_token", "id_token", "token", "secret", "client_secret", "password"];

static SENSITIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(authorization: )((?:bearer |basic )?[\w\-\.=:/+]+)",
        r"(?i)([A-Z0-9_]*?(KEY|TOKEN|SECRET|PASSWORD)=)([^\s]+)",
        r"(?i)(bearer )([\w\-\.=:/+]+)",
    ]
    .iter()
    .filter_map(|pat| Regex::new(pat).ok())
    .collect()
});

/// Redacts values that look like secrets in a string.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for re in SENSITIVE_PATTERNS.iter() {
        redacted = re
            .replace_all(&redacted, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{prefix}{REDACTED_PLACEHOLDER}")
            })
            .to_string();
    }
    redacted
}

/// Copy of `value` with the same shape but every scalar leaf replaced by the
/// redacted placeholder. `null` stays `null`.
pub fn redact_json_leaves(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), redact_json_leaves(v))).collect()),
        Value::Array(items) => Value::Array(items.iter().map(redact_json_leaves).collect()),
        _ => Value::String(REDACTED_PLACEHOLDER.to_string()),
    }
}

/// Makes an auth provider response body safe to log: known secret fields are
/// replaced and the result is truncated.
pub fn sanitize_response_for_logging(body: &str) -> String {
    let cleaned = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(mut map)) => {
            for field in SECRET_RESPONSE_FIELDS {
                if let Some(slot) = map.get_mut(field) {
                    *slot = Value::String(REDACTED_PLACEHOLDER.to_string());
                }
            }
            Value::Object(map).to_string()
        }
        _ => redact_sensitive(body),
    };

    let total = cleaned.chars().count();
    if total > MAX_LOGGED_BODY_CHARS {
        let head: String = cleaned.chars().take(MAX_LOGGED_BODY_CHARS).collect();
        format!("{head}... [truncated, {total} total chars]")
    } else {
        cleaned
    }
}

/// Credential part of a Basic `Authorization` header.
pub fn basic_auth_token(username: &str, password: &str) -> String {
    STANDARD.encode(format!("{username}:{password}"))
}
