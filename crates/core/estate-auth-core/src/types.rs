//! Credential, challenge, token and session types.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// An identifier/secret pair, alive only for the duration of one exchange call.
///
/// The secret is never serialized and is redacted from `Debug` output.
#[derive(Clone)]
pub struct Credential {
    identifier: String,
    secret: String,
}

impl Credential {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeKind {
    None,
    /// The account holds a temporary secret that must be replaced.
    NewSecretRequired,
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeKind::None => write!(f, "NONE"),
            ChallengeKind::NewSecretRequired => write!(f, "NEW_SECRET_REQUIRED"),
        }
    }
}

/// State of a pending challenge, correlated purely through the client round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeContext {
    pub kind: ChallengeKind,
    /// Opaque token issued by the provider; must be echoed back on completion.
    pub continuation_token: String,
    pub identifier: String,
}

impl ChallengeContext {
    pub fn new_secret_required(
        continuation_token: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            kind: ChallengeKind::NewSecretRequired,
            continuation_token: continuation_token.into(),
            identifier: identifier.into(),
        }
    }
}

/// Access, ID and refresh tokens issued together by the provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTriple {
    pub access_token: String,
    pub id_token: String,
    pub refresh_token: String,
    pub token_type: String,
}

impl TokenTriple {
    pub fn bearer(
        access_token: impl Into<String>,
        id_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            id_token: id_token.into(),
            refresh_token: refresh_token.into(),
            token_type: "Bearer".to_string(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.id_token.is_empty() && !self.refresh_token.is_empty()
    }
}

impl fmt::Debug for TokenTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenTriple")
            .field("access_token", &format_args!("<{} bytes>", self.access_token.len()))
            .field("id_token", &format_args!("<{} bytes>", self.id_token.len()))
            .field("refresh_token", &format_args!("<{} bytes>", self.refresh_token.len()))
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Attributes decoded from the ID token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub subject_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub group_memberships: BTreeSet<String>,
    /// The agency this session is scoped to.
    pub tenant_binding: Option<String>,
}

impl SessionClaims {
    pub fn in_group(&self, group: &str) -> bool {
        self.group_memberships.contains(group)
    }
}

/// The unit handed to the rest of the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub tokens: TokenTriple,
    pub claims: SessionClaims,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn subject_id(&self) -> &str {
        &self.claims.subject_id
    }

    /// The credential attached to BFF requests.
    pub fn bearer_token(&self) -> &str {
        &self.tokens.id_token
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True once `now` has reached the safety margin before expiry.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        now >= self.expires_at - skew
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_expiring_at(expires_at: DateTime<Utc>) -> Session {
        Session {
            tokens: TokenTriple::bearer("access", "id", "refresh"),
            claims: SessionClaims {
                subject_id: "sub-1".to_string(),
                email: None,
                display_name: None,
                group_memberships: BTreeSet::new(),
                tenant_binding: None,
            },
            expires_at,
        }
    }

    #[test]
    fn test_credential_debug_redacts_secret() {
        let credential = Credential::new("agent@example.com", "hunter2-Secret!");
        let rendered = format!("{:?}", credential);
        assert!(rendered.contains("agent@example.com"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_token_triple_debug_redacts_tokens() {
        let tokens = TokenTriple::bearer("aaaa", "bbbb", "cccc");
        let rendered = format!("{:?}", tokens);
        assert!(!rendered.contains("aaaa"));
        assert!(rendered.contains("Bearer"));
        assert!(tokens.is_complete());
        assert!(!TokenTriple::bearer("a", "", "c").is_complete());
    }

    #[test]
    fn test_challenge_kind_serialization() {
        let context = ChallengeContext::new_secret_required("opaque", "agent@example.com");
        let json = serde_json::to_value(&context).unwrap();
        assert_eq!(json["kind"], "NEW_SECRET_REQUIRED");
        assert_eq!(json["continuation_token"], "opaque");

        let parsed: ChallengeContext = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, context);
    }

    #[test]
    fn test_refresh_window() {
        let now = Utc::now();
        let session = session_expiring_at(now + Duration::seconds(90));
        let skew = Duration::seconds(60);

        assert!(!session.is_expired_at(now));
        assert!(!session.needs_refresh_at(now, skew));
        assert!(session.needs_refresh_at(now + Duration::seconds(31), skew));
        assert!(session.is_expired_at(now + Duration::seconds(90)));
    }
}
