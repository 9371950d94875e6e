use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Refresh endpoint request body
#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
    pub subject_id: &'a str,
}

/// Token pair returned by the refresh endpoint
///
/// Servers that do not rotate refresh tokens omit `refresh_token`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPair {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &format_args!("[{} bytes]", self.access_token.len()))
            .field("rotated", &self.refresh_token.is_some())
            .finish()
    }
}

/// Strip the uniform `{code, message, details}` wrapper when present
pub fn unwrap_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("code") && map.contains_key("details") => {
            map.remove("details").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Server-supplied error detail (`{"detail": "..."}`), if any
pub fn error_detail(body: &Value) -> Option<String> {
    let detail = body.get("detail").or_else(|| body.get("message"))?;
    match detail {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Null | Value::String(_) => None,
        other => Some(other.to_string()),
    }
}
