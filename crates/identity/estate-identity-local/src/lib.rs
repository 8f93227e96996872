//! In-process credential exchange with username/password authentication.
//!
//! Users are kept in memory with Argon2-hashed secrets. Accounts seeded with a
//! temporary secret answer their first sign-in with a new-secret challenge.
//! Access and ID tokens are HS256 JWTs; refresh tokens are opaque.

mod config;
mod tokens;
mod user;

pub use config::LocalProviderConfig;
pub use user::NewUser;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use estate_auth_core::{
    AccountMaintenance, ChallengeContext, Credential, CredentialExchange, Outcome, RejectReason,
    TokenTriple,
};
use rand_core::{OsRng, RngCore};
use thiserror::Error;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::tokens::{TokenMinter, opaque_token};
use crate::user::LocalUser;

// A real Argon2 hash of "dummy_password", verified when the identifier is unknown
// so both failure paths cost the same.
const DUMMY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$9QsJRKgzJkKaOUvlp7gl2Q$qmE3qIFBNJ6nZYbLYXEI2uo0zZc7T0Q8LU1ZsqsZ3QE";

#[derive(Debug, Error)]
pub enum LocalProviderError {
    #[error("Password hashing failed: {0}")]
    Hash(String),

    #[error("User already exists: {0}")]
    UserExists(String),
}

struct PendingChallenge {
    identifier: String,
    expires_at: DateTime<Utc>,
}

struct PendingReset {
    code: String,
    expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct LocalIdentityProvider {
    config: Arc<LocalProviderConfig>,
    minter: Arc<TokenMinter>,
    users: Arc<RwLock<HashMap<String, LocalUser>>>,
    challenges: Arc<DashMap<String, PendingChallenge>>,
    // refresh token -> identifier
    refresh_tokens: Arc<DashMap<String, String>>,
    reset_codes: Arc<DashMap<String, PendingReset>>,
    refresh_calls: Arc<AtomicUsize>,
    semaphore: Arc<Semaphore>,
}

impl LocalIdentityProvider {
    pub fn new(config: LocalProviderConfig) -> Self {
        Self {
            minter: Arc::new(TokenMinter::new(config.clone())),
            config: Arc::new(config),
            users: Arc::new(RwLock::new(HashMap::new())),
            challenges: Arc::new(DashMap::new()),
            refresh_tokens: Arc::new(DashMap::new()),
            reset_codes: Arc::new(DashMap::new()),
            refresh_calls: Arc::new(AtomicUsize::new(0)),
            semaphore: Arc::new(Semaphore::new(5)),
        }
    }

    pub fn config(&self) -> &LocalProviderConfig {
        &self.config
    }

    /// Register an account and return its subject id.
    pub async fn add_user(&self, new_user: NewUser) -> Result<String, LocalProviderError> {
        let password_hash = hash_secret(&new_user.secret)?;

        let mut users = self.users.write().await;
        if users.contains_key(&new_user.identifier) {
            return Err(LocalProviderError::UserExists(new_user.identifier));
        }

        let subject_id = Uuid::new_v4().to_string();
        let user = LocalUser {
            subject_id: subject_id.clone(),
            identifier: new_user.identifier.clone(),
            password_hash,
            temporary: new_user.temporary,
            attributes: new_user.attributes,
            groups: new_user.groups,
        };
        users.insert(new_user.identifier, user);

        Ok(subject_id)
    }

    pub async fn remove_user(&self, identifier: &str) -> bool {
        self.invalidate_user_refresh_tokens(identifier);
        self.users.write().await.remove(identifier).is_some()
    }

    /// Number of refresh calls received so far.
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Revoke a single refresh token.
    pub fn invalidate_refresh_token(&self, refresh_token: &str) -> bool {
        self.refresh_tokens.remove(refresh_token).is_some()
    }

    /// Revoke every refresh token issued to `identifier`.
    pub fn invalidate_user_refresh_tokens(&self, identifier: &str) {
        self.refresh_tokens
            .retain(|_, owner| owner.as_str() != identifier);
    }

    /// Push a continuation token past its validity window.
    pub fn expire_challenge(&self, continuation_token: &str) -> bool {
        match self.challenges.get_mut(continuation_token) {
            Some(mut pending) => {
                pending.expires_at = Utc::now() - chrono::Duration::seconds(1);
                true
            }
            None => false,
        }
    }

    /// The reset code that would have been delivered out of band.
    pub fn pending_reset_code(&self, identifier: &str) -> Option<String> {
        self.reset_codes
            .get(identifier)
            .map(|pending| pending.code.clone())
    }

    async fn verify_user(&self, identifier: &str, secret: &str) -> Result<LocalUser, RejectReason> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| RejectReason::transient(e.to_string()))?;
        let users = self.users.read().await;

        let user = users.get(identifier);
        let password_hash = user.map_or(DUMMY_HASH, |user| user.password_hash.as_str());

        let parsed_hash =
            PasswordHash::new(password_hash).map_err(|e| RejectReason::transient(e.to_string()))?;

        let secret_valid = Argon2::default()
            .verify_password(secret.as_bytes(), &parsed_hash)
            .is_ok();

        match user {
            Some(user) if secret_valid => Ok(user.clone()),
            _ => Err(RejectReason::InvalidCredentials),
        }
    }

    async fn user_for_access_token(&self, access_token: &str) -> Result<LocalUser, RejectReason> {
        let claims = self.minter.verify_access(access_token).map_err(|e| {
            debug!(error = %e, "access token rejected");
            RejectReason::InvalidCredentials
        })?;

        let users = self.users.read().await;
        users
            .get(&claims.username)
            .filter(|user| user.subject_id == claims.sub)
            .cloned()
            .ok_or(RejectReason::InvalidCredentials)
    }

    async fn set_secret(&self, identifier: &str, new_secret: &str) -> Result<(), RejectReason> {
        let password_hash =
            hash_secret(new_secret).map_err(|e| RejectReason::transient(e.to_string()))?;

        let mut users = self.users.write().await;
        let user = users
            .get_mut(identifier)
            .ok_or(RejectReason::InvalidCredentials)?;
        user.password_hash = password_hash;
        user.temporary = false;

        Ok(())
    }

    fn open_challenge(&self, identifier: &str) -> ChallengeContext {
        let continuation_token = opaque_token();
        self.challenges.insert(
            continuation_token.clone(),
            PendingChallenge {
                identifier: identifier.to_string(),
                expires_at: Utc::now() + self.config.challenge_ttl,
            },
        );

        ChallengeContext::new_secret_required(continuation_token, identifier)
    }

    fn issue(&self, user: &LocalUser) -> Result<TokenTriple, RejectReason> {
        let now = Utc::now();
        let access_token = self
            .minter
            .access_token(user, now)
            .map_err(|e| RejectReason::transient(e.to_string()))?;
        let id_token = self
            .minter
            .id_token(user, now)
            .map_err(|e| RejectReason::transient(e.to_string()))?;

        let refresh_token = opaque_token();
        self.refresh_tokens
            .insert(refresh_token.clone(), user.identifier.clone());

        Ok(TokenTriple::bearer(access_token, id_token, refresh_token))
    }

    fn check_policy(&self, new_secret: &str) -> Result<(), RejectReason> {
        self.config
            .policy
            .check(new_secret)
            .map_err(RejectReason::Policy)
    }
}

impl Default for LocalIdentityProvider {
    fn default() -> Self {
        Self::new(LocalProviderConfig::default())
    }
}

fn hash_secret(secret: &str) -> Result<String, LocalProviderError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| LocalProviderError::Hash(e.to_string()))
}

#[async_trait]
impl CredentialExchange for LocalIdentityProvider {
    fn provider_id(&self) -> &str {
        "local"
    }

    async fn sign_in(&self, credential: &Credential) -> Outcome {
        let user = match self
            .verify_user(credential.identifier(), credential.secret())
            .await
        {
            Ok(user) => user,
            Err(reason) => {
                debug!(identifier = %credential.identifier(), %reason, "sign-in rejected");
                return Outcome::Rejected(reason);
            }
        };

        if user.temporary {
            info!(subject_id = %user.subject_id, "temporary secret in use, new secret required");
            return Outcome::ChallengePending(self.open_challenge(&user.identifier));
        }

        match self.issue(&user) {
            Ok(tokens) => Outcome::Authenticated(tokens),
            Err(reason) => Outcome::Rejected(reason),
        }
    }

    async fn complete_challenge(&self, context: &ChallengeContext, new_secret: &str) -> Outcome {
        let pending = self
            .challenges
            .get(&context.continuation_token)
            .map(|pending| (pending.identifier.clone(), pending.expires_at));

        let Some((identifier, expires_at)) = pending else {
            return Outcome::Rejected(RejectReason::ChallengeExpired);
        };

        if Utc::now() >= expires_at {
            self.challenges.remove(&context.continuation_token);
            return Outcome::Rejected(RejectReason::ChallengeExpired);
        }

        if identifier != context.identifier {
            warn!(identifier = %context.identifier, "continuation token presented for another account");
            return Outcome::Rejected(RejectReason::InvalidCredentials);
        }

        // The token stays valid so the user can pick another secret.
        if let Err(reason) = self.check_policy(new_secret) {
            return Outcome::Rejected(reason);
        }

        if self
            .challenges
            .remove(&context.continuation_token)
            .is_none()
        {
            return Outcome::Rejected(RejectReason::ChallengeExpired);
        }

        if let Err(reason) = self.set_secret(&identifier, new_secret).await {
            return Outcome::Rejected(reason);
        }

        let user = self.users.read().await.get(&identifier).cloned();
        match user {
            Some(user) => match self.issue(&user) {
                Ok(tokens) => Outcome::Authenticated(tokens),
                Err(reason) => Outcome::Rejected(reason),
            },
            None => Outcome::Rejected(RejectReason::InvalidCredentials),
        }
    }

    async fn refresh(
        &self,
        refresh_token: &str,
        identifier: &str,
    ) -> Result<TokenTriple, RejectReason> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.config.refresh_delay {
            tokio::time::sleep(delay).await;
        }

        let owner = self
            .refresh_tokens
            .get(refresh_token)
            .map(|owner| owner.clone())
            .ok_or(RejectReason::InvalidCredentials)?;

        let user = self
            .users
            .read()
            .await
            .get(&owner)
            .cloned()
            .ok_or(RejectReason::InvalidCredentials)?;

        if identifier != user.subject_id && identifier != user.identifier {
            warn!(subject_id = %user.subject_id, "refresh token presented for another subject");
            return Err(RejectReason::InvalidCredentials);
        }

        let mut tokens = self.issue(&user)?;
        if self.config.rotate_refresh_tokens {
            self.refresh_tokens.remove(refresh_token);
        } else {
            self.refresh_tokens.remove(&tokens.refresh_token);
            tokens.refresh_token = refresh_token.to_string();
        }

        Ok(tokens)
    }

    async fn read_attributes(
        &self,
        access_token: &str,
    ) -> Result<HashMap<String, String>, RejectReason> {
        let user = self.user_for_access_token(access_token).await?;

        let mut attributes = user.attributes;
        attributes.insert("sub".to_string(), user.subject_id);
        Ok(attributes)
    }
}

#[async_trait]
impl AccountMaintenance for LocalIdentityProvider {
    async fn forgot_password(&self, identifier: &str) -> Result<(), RejectReason> {
        // Unknown identifiers succeed silently.
        if !self.users.read().await.contains_key(identifier) {
            debug!(identifier, "reset requested for unknown identifier");
            return Ok(());
        }

        let code = format!("{:06}", OsRng.next_u32() % 1_000_000);
        self.reset_codes.insert(
            identifier.to_string(),
            PendingReset {
                code,
                expires_at: Utc::now() + self.config.reset_code_ttl,
            },
        );

        info!(identifier, "reset code issued");
        Ok(())
    }

    async fn confirm_forgot_password(
        &self,
        identifier: &str,
        code: &str,
        new_secret: &str,
    ) -> Result<(), RejectReason> {
        let valid = self
            .reset_codes
            .get(identifier)
            .map(|pending| pending.code == code && Utc::now() < pending.expires_at)
            .unwrap_or(false);
        if !valid {
            return Err(RejectReason::ChallengeExpired);
        }

        self.check_policy(new_secret)?;
        self.set_secret(identifier, new_secret).await?;
        self.reset_codes.remove(identifier);

        Ok(())
    }

    async fn change_password(
        &self,
        access_token: &str,
        current_secret: &str,
        new_secret: &str,
    ) -> Result<(), RejectReason> {
        let user = self.user_for_access_token(access_token).await?;
        self.verify_user(&user.identifier, current_secret).await?;
        self.check_policy(new_secret)?;
        self.set_secret(&user.identifier, new_secret).await
    }

    async fn update_attributes(
        &self,
        access_token: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), RejectReason> {
        let user = self.user_for_access_token(access_token).await?;

        let mut users = self.users.write().await;
        let stored = users
            .get_mut(&user.identifier)
            .ok_or(RejectReason::InvalidCredentials)?;
        for (name, value) in attributes {
            if name == "sub" {
                continue;
            }
            stored.attributes.insert(name.clone(), value.clone());
        }

        Ok(())
    }
}
