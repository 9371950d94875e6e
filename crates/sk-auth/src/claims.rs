//! Client-side inspection of bearer token claims
//!
//! Tokens are `header.payload.signature`. Only the payload is decoded, and
//! only to learn when the token expires. The signature is never checked
//! here; the issuing server is the only verifier.

use std::time::Duration;

use base64::Engine;
use base64::engine::DecodePaddingMode;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, Utc};
use serde::Deserialize;

const PADDING_INDIFFERENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);

const URL_SAFE: GeneralPurpose = GeneralPurpose::new(&base64::alphabet::URL_SAFE, PADDING_INDIFFERENT);
const STANDARD: GeneralPurpose = GeneralPurpose::new(&base64::alphabet::STANDARD, PADDING_INDIFFERENT);

/// Claims the session layer cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
}

impl TokenClaims {
    /// Whether the token expires within `margin` of `now`
    pub fn is_expired(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        chrono::Duration::from_std(margin)
            .ok()
            .and_then(|margin| now.checked_add_signed(margin))
            .is_none_or(|deadline| deadline >= self.expires_at)
    }
}

/// Result of inspecting a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claims {
    Valid(TokenClaims),
    Malformed,
}

impl Claims {
    /// Malformed tokens count as expired
    pub fn is_expired(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self {
            Self::Valid(claims) => claims.is_expired(now, margin),
            Self::Malformed => true,
        }
    }
}

#[derive(Deserialize)]
struct Payload {
    exp: Option<serde_json::Value>,
    #[serde(default)]
    scope: Option<serde_json::Value>,
}

/// Decode the payload segment of a token. Never fails.
pub fn inspect(token: &str) -> Claims {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Claims::Malformed;
    };

    let Some(bytes) = decode_segment(payload) else {
        return Claims::Malformed;
    };
    let Ok(payload) = serde_json::from_slice::<Payload>(&bytes) else {
        return Claims::Malformed;
    };

    let Some(expires_at) = payload
        .exp
        .as_ref()
        .and_then(serde_json::Value::as_f64)
        .and_then(|exp| DateTime::from_timestamp(exp.trunc() as i64, 0))
    else {
        return Claims::Malformed;
    };

    let scope = match payload.scope {
        Some(serde_json::Value::String(scope)) => Some(scope),
        Some(serde_json::Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(serde_json::Value::as_str)
                .collect::<Vec<_>>()
                .join(" "),
        ),
        _ => None,
    };

    Claims::Valid(TokenClaims { expires_at, scope })
}

fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    if segment.is_empty() {
        return None;
    }
    URL_SAFE
        .decode(segment)
        .or_else(|_| STANDARD.decode(segment))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::{self, URL_SAFE_NO_PAD};

    fn token(payload: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_valid_token() {
        let claims = inspect(&token(r#"{"exp":1700000000,"scope":"read write"}"#));
        assert_eq!(
            claims,
            Claims::Valid(TokenClaims {
                expires_at: at(1_700_000_000),
                scope: Some("read write".to_string()),
            })
        );
    }

    #[test]
    fn test_padded_standard_alphabet() {
        let payload = general_purpose::STANDARD.encode(r#"{"exp":1700000000,"x":12}"#);
        assert!(payload.ends_with("=="));
        let claims = inspect(&format!("h.{payload}.s"));
        assert!(matches!(claims, Claims::Valid(c) if c.expires_at == at(1_700_000_000)));
    }

    #[test]
    fn test_scope_array() {
        let claims = inspect(&token(r#"{"exp":1,"scope":["a","b"]}"#));
        assert!(matches!(claims, Claims::Valid(c) if c.scope.as_deref() == Some("a b")));
    }

    #[test]
    fn test_malformed_inputs() {
        assert_eq!(inspect(""), Claims::Malformed);
        assert_eq!(inspect("opaque-token"), Claims::Malformed);
        assert_eq!(inspect("a.b"), Claims::Malformed);
        assert_eq!(inspect("a.b.c.d"), Claims::Malformed);
        assert_eq!(inspect("h.!!!.s"), Claims::Malformed);
        assert_eq!(inspect(&token("not json")), Claims::Malformed);
        assert_eq!(inspect(&token(r#"{"sub":"u1"}"#)), Claims::Malformed);
        assert_eq!(inspect(&token(r#"{"exp":"soon"}"#)), Claims::Malformed);
    }

    #[test]
    fn test_expiry_margin() {
        let claims = inspect(&token(r#"{"exp":1000}"#));
        let margin = Duration::from_secs(30);

        assert!(!claims.is_expired(at(900), margin));
        assert!(claims.is_expired(at(970), margin));
        assert!(claims.is_expired(at(1000), Duration::ZERO));
        assert!(Claims::Malformed.is_expired(at(0), margin));
    }
}
