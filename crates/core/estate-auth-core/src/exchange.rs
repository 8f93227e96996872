use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::RejectReason;
use crate::types::{ChallengeContext, Credential, TokenTriple};

/// Result of a sign-in or challenge completion call.
///
/// An exchange call never both authenticates and leaves a challenge pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Authenticated(TokenTriple),
    ChallengePending(ChallengeContext),
    Rejected(RejectReason),
}

impl Outcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Outcome::Authenticated(_))
    }
}

/// Exchanges credentials for tokens with an identity provider.
///
/// Implementations must not persist secrets beyond the call and must report
/// network failures as `RejectReason::Transient`.
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    /// Identifier used in logs.
    fn provider_id(&self) -> &str;

    /// Authenticate an identifier/secret pair.
    async fn sign_in(&self, credential: &Credential) -> Outcome;

    /// Answer a pending challenge with a new secret.
    async fn complete_challenge(&self, context: &ChallengeContext, new_secret: &str) -> Outcome;

    /// Trade a refresh token for fresh tokens.
    ///
    /// The returned triple always carries a refresh token; providers that do
    /// not rotate it hand back the one they were given.
    async fn refresh(&self, refresh_token: &str, identifier: &str)
    -> Result<TokenTriple, RejectReason>;

    /// Read the attributes of the account owning `access_token`.
    async fn read_attributes(
        &self,
        access_token: &str,
    ) -> Result<HashMap<String, String>, RejectReason>;
}

/// Account self-service operations that sit next to the credential exchange.
#[async_trait]
pub trait AccountMaintenance: Send + Sync {
    /// Start the forgotten-password flow; the provider delivers a code out of band.
    async fn forgot_password(&self, identifier: &str) -> Result<(), RejectReason>;

    async fn confirm_forgot_password(
        &self,
        identifier: &str,
        code: &str,
        new_secret: &str,
    ) -> Result<(), RejectReason>;

    async fn change_password(
        &self,
        access_token: &str,
        current_secret: &str,
        new_secret: &str,
    ) -> Result<(), RejectReason>;

    /// Update attributes. The ID token only reflects them after a refresh.
    async fn update_attributes(
        &self,
        access_token: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), RejectReason>;
}
