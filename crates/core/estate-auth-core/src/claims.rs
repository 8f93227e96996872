//! Unverified decoding of token payloads.
//!
//! Tokens only ever arrive freshly minted from a trusted exchange, so the
//! signature is not checked here. Decoding never panics: malformed input is an
//! integration bug reported through `DecodeError`.

use std::collections::BTreeSet;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{Session, SessionClaims, TokenTriple};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("token is not a three-segment compact serialization")]
    Malformed,

    #[error("token payload is not valid base64url")]
    Base64,

    #[error("token payload is not a JSON object: {0}")]
    Json(String),

    #[error("missing claim: {0}")]
    MissingClaim(String),

    #[error("invalid claim: {0}")]
    InvalidClaim(String),
}

/// Names of the claims carrying each session attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimMapping {
    pub subject: String,
    pub email: String,
    pub display_name: String,
    pub groups: String,
    pub tenant_binding: String,
}

impl Default for ClaimMapping {
    fn default() -> Self {
        Self {
            subject: "sub".to_string(),
            email: "email".to_string(),
            display_name: "name".to_string(),
            groups: "cognito:groups".to_string(),
            tenant_binding: "custom:currentAgency".to_string(),
        }
    }
}

fn payload(token: &str) -> Result<Map<String, Value>, DecodeError> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(DecodeError::Malformed);
    };

    if header.is_empty() || payload.is_empty() {
        return Err(DecodeError::Malformed);
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| DecodeError::Base64)?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(DecodeError::Json("payload is not an object".to_string())),
        Err(e) => Err(DecodeError::Json(e.to_string())),
    }
}

fn optional_string(claims: &Map<String, Value>, name: &str) -> Result<Option<String>, DecodeError> {
    match claims.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(DecodeError::InvalidClaim(name.to_string())),
    }
}

fn string_set(claims: &Map<String, Value>, name: &str) -> Result<BTreeSet<String>, DecodeError> {
    match claims.get(name) {
        None | Some(Value::Null) => Ok(BTreeSet::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(String::from)
                    .ok_or_else(|| DecodeError::InvalidClaim(name.to_string()))
            })
            .collect(),
        Some(_) => Err(DecodeError::InvalidClaim(name.to_string())),
    }
}

/// Decode the session claims carried by an ID token.
pub fn decode_claims(id_token: &str, mapping: &ClaimMapping) -> Result<SessionClaims, DecodeError> {
    let claims = payload(id_token)?;

    let subject_id = optional_string(&claims, &mapping.subject)?
        .ok_or_else(|| DecodeError::MissingClaim(mapping.subject.clone()))?;

    Ok(SessionClaims {
        subject_id,
        email: optional_string(&claims, &mapping.email)?,
        display_name: optional_string(&claims, &mapping.display_name)?,
        group_memberships: string_set(&claims, &mapping.groups)?,
        tenant_binding: optional_string(&claims, &mapping.tenant_binding)?,
    })
}

/// Read the `exp` claim of a token.
pub fn decode_expiry(token: &str) -> Result<DateTime<Utc>, DecodeError> {
    let claims = payload(token)?;

    let exp = match claims.get("exp") {
        None | Some(Value::Null) => return Err(DecodeError::MissingClaim("exp".to_string())),
        Some(value) => value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .ok_or_else(|| DecodeError::InvalidClaim("exp".to_string()))?,
    };

    DateTime::<Utc>::from_timestamp(exp, 0).ok_or_else(|| DecodeError::InvalidClaim("exp".to_string()))
}

impl Session {
    /// Build a session from freshly issued tokens.
    ///
    /// Claims come from the ID token, the expiry from the access token.
    pub fn from_tokens(tokens: TokenTriple, mapping: &ClaimMapping) -> Result<Self, DecodeError> {
        let claims = decode_claims(&tokens.id_token, mapping)?;
        let expires_at = decode_expiry(&tokens.access_token)?;

        Ok(Self {
            tokens,
            claims,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn mint(claims: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-signing-key"),
        )
        .unwrap()
    }

    fn unsigned(payload: &str) -> String {
        format!(
            "{}.{}.",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn test_decode_full_claims() {
        let token = mint(serde_json::json!({
            "sub": "0b3c-11ee",
            "email": "agent@example.com",
            "name": "Agent Smith",
            "cognito:groups": ["managers", "inspectors"],
            "custom:currentAgency": "agency-42",
            "exp": 1_900_000_000,
        }));

        let claims = decode_claims(&token, &ClaimMapping::default()).unwrap();
        assert_eq!(claims.subject_id, "0b3c-11ee");
        assert_eq!(claims.email.as_deref(), Some("agent@example.com"));
        assert_eq!(claims.display_name.as_deref(), Some("Agent Smith"));
        assert!(claims.in_group("managers"));
        assert!(claims.in_group("inspectors"));
        assert_eq!(claims.tenant_binding.as_deref(), Some("agency-42"));
    }

    #[test]
    fn test_decode_minimal_claims() {
        let token = mint(serde_json::json!({ "sub": "only-sub" }));

        let claims = decode_claims(&token, &ClaimMapping::default()).unwrap();
        assert_eq!(claims.subject_id, "only-sub");
        assert!(claims.email.is_none());
        assert!(claims.group_memberships.is_empty());
        assert!(claims.tenant_binding.is_none());
    }

    #[test]
    fn test_custom_mapping() {
        let token = mint(serde_json::json!({
            "uid": "u-1",
            "tenant": "agency-7",
            "roles": ["admin"],
        }));
        let mapping = ClaimMapping {
            subject: "uid".to_string(),
            groups: "roles".to_string(),
            tenant_binding: "tenant".to_string(),
            ..ClaimMapping::default()
        };

        let claims = decode_claims(&token, &mapping).unwrap();
        assert_eq!(claims.subject_id, "u-1");
        assert_eq!(claims.tenant_binding.as_deref(), Some("agency-7"));
        assert!(claims.in_group("admin"));
    }

    #[test]
    fn test_empty_tenant_binding_is_absent() {
        let token = mint(serde_json::json!({ "sub": "s", "custom:currentAgency": "" }));
        let claims = decode_claims(&token, &ClaimMapping::default()).unwrap();
        assert!(claims.tenant_binding.is_none());
    }

    #[test]
    fn test_decode_errors_are_tagged() {
        let mapping = ClaimMapping::default();

        assert_eq!(decode_claims("", &mapping), Err(DecodeError::Malformed));
        assert_eq!(decode_claims("a.b", &mapping), Err(DecodeError::Malformed));
        assert_eq!(decode_claims("a.b.c.d", &mapping), Err(DecodeError::Malformed));
        assert_eq!(decode_claims("a.!!!.c", &mapping), Err(DecodeError::Base64));
        assert!(matches!(
            decode_claims(&unsigned("not json"), &mapping),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            decode_claims(&unsigned("[1,2]"), &mapping),
            Err(DecodeError::Json(_))
        ));
        assert_eq!(
            decode_claims(&unsigned(r#"{"email":"x@y"}"#), &mapping),
            Err(DecodeError::MissingClaim("sub".to_string()))
        );
        assert_eq!(
            decode_claims(&unsigned(r#"{"sub":42}"#), &mapping),
            Err(DecodeError::InvalidClaim("sub".to_string()))
        );
        assert_eq!(
            decode_claims(&unsigned(r#"{"sub":"s","cognito:groups":"admins"}"#), &mapping),
            Err(DecodeError::InvalidClaim("cognito:groups".to_string()))
        );
    }

    #[test]
    fn test_decode_expiry() {
        let token = mint(serde_json::json!({ "sub": "s", "exp": 1_700_000_000 }));
        let expiry = decode_expiry(&token).unwrap();
        assert_eq!(expiry.timestamp(), 1_700_000_000);

        let token = mint(serde_json::json!({ "sub": "s" }));
        assert_eq!(
            decode_expiry(&token),
            Err(DecodeError::MissingClaim("exp".to_string()))
        );

        assert_eq!(
            decode_expiry(&unsigned(r#"{"exp":"soon"}"#)),
            Err(DecodeError::InvalidClaim("exp".to_string()))
        );
    }

    #[test]
    fn test_session_from_tokens() {
        let access = mint(serde_json::json!({ "sub": "s-1", "exp": 1_800_000_000 }));
        let id = mint(serde_json::json!({
            "sub": "s-1",
            "custom:currentAgency": "agency-1",
            "exp": 1_800_000_000,
        }));
        let tokens = TokenTriple::bearer(access, id, "opaque-refresh");

        let session = Session::from_tokens(tokens, &ClaimMapping::default()).unwrap();
        assert_eq!(session.subject_id(), "s-1");
        assert_eq!(session.expires_at.timestamp(), 1_800_000_000);
        assert_eq!(session.claims.tenant_binding.as_deref(), Some("agency-1"));
        assert_eq!(session.tokens.refresh_token, "opaque-refresh");
    }
}
