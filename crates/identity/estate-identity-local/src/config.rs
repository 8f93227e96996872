use std::time::Duration as StdDuration;

use chrono::Duration;
use estate_auth_core::{ClaimMapping, PasswordPolicy};

/// Settings for the in-process provider.
#[derive(Debug, Clone)]
pub struct LocalProviderConfig {
    /// `iss` claim of issued tokens.
    pub issuer: String,
    /// `aud` claim of ID tokens and `client_id` claim of access tokens.
    pub audience: String,
    pub signing_secret: String,
    pub token_ttl: Duration,
    /// Validity window of a continuation token.
    pub challenge_ttl: Duration,
    pub reset_code_ttl: Duration,
    /// Issue a new refresh token on every refresh and revoke the old one.
    pub rotate_refresh_tokens: bool,
    pub policy: PasswordPolicy,
    pub claim_mapping: ClaimMapping,
    /// Artificial latency added to each refresh call.
    pub refresh_delay: Option<StdDuration>,
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            issuer: "estate-local".to_string(),
            audience: "estate-dashboard".to_string(),
            signing_secret: "change-me-in-production".to_string(),
            token_ttl: Duration::hours(1),
            challenge_ttl: Duration::minutes(3),
            reset_code_ttl: Duration::hours(1),
            rotate_refresh_tokens: false,
            policy: PasswordPolicy::default(),
            claim_mapping: ClaimMapping::default(),
            refresh_delay: None,
        }
    }
}

impl LocalProviderConfig {
    pub fn with_signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.signing_secret = secret.into();
        self
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = ttl;
        self
    }

    pub fn with_refresh_rotation(mut self, rotate: bool) -> Self {
        self.rotate_refresh_tokens = rotate;
        self
    }

    pub fn with_policy(mut self, policy: PasswordPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_claim_mapping(mut self, mapping: ClaimMapping) -> Self {
        self.claim_mapping = mapping;
        self
    }

    pub fn with_refresh_delay(mut self, delay: StdDuration) -> Self {
        self.refresh_delay = Some(delay);
        self
    }
}
