//! Application-facing session management.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use estate_auth_core::{
    AccountMaintenance, AuthError, AuthResult, ChallengeContext, ClaimMapping, Credential,
    CredentialExchange, PasswordPolicy, Session,
};
use tracing::{error, info};

use crate::challenge::{LoginFlow, LoginStep};
use crate::guard::{Access, DEFAULT_LOGIN_PATH, RouteGuard};
use crate::refresh::{RefreshConfig, RefreshOrchestrator};
use crate::retry::retry_transient_once;
use crate::store::TokenStore;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub skew: Duration,
    pub login_path: String,
    pub claim_mapping: ClaimMapping,
    /// Checked locally before a new secret is sent to the provider.
    pub password_policy: PasswordPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            skew: Duration::seconds(60),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            claim_mapping: ClaimMapping::default(),
            password_policy: PasswordPolicy::default(),
        }
    }
}

impl SessionConfig {
    fn refresh_config(&self) -> RefreshConfig {
        RefreshConfig {
            skew: self.skew,
            claim_mapping: self.claim_mapping.clone(),
        }
    }
}

/// Ties the login flow, refresh orchestrator and route guard to a provider.
#[derive(Clone)]
pub struct SessionManager {
    exchange: Arc<dyn CredentialExchange>,
    maintenance: Option<Arc<dyn AccountMaintenance>>,
    config: Arc<SessionConfig>,
    orchestrator: RefreshOrchestrator,
    guard: RouteGuard,
}

impl SessionManager {
    pub fn new(exchange: Arc<dyn CredentialExchange>, config: SessionConfig) -> Self {
        let orchestrator = RefreshOrchestrator::new(exchange.clone(), config.refresh_config());
        let guard = RouteGuard::new(orchestrator.clone(), config.login_path.clone());

        Self {
            exchange,
            maintenance: None,
            config: Arc::new(config),
            orchestrator,
            guard,
        }
    }

    pub fn with_maintenance(mut self, maintenance: Arc<dyn AccountMaintenance>) -> Self {
        self.maintenance = Some(maintenance);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &RefreshOrchestrator {
        &self.orchestrator
    }

    pub fn guard(&self) -> &RouteGuard {
        &self.guard
    }

    pub fn login_flow(&self) -> LoginFlow {
        LoginFlow::new(self.exchange.clone(), self.config.claim_mapping.clone())
    }

    pub fn resume_challenge(&self, context: ChallengeContext) -> LoginFlow {
        LoginFlow::resume(
            self.exchange.clone(),
            self.config.claim_mapping.clone(),
            context,
        )
    }

    /// Sign in and store the session on success.
    pub async fn sign_in(
        &self,
        store: &TokenStore,
        credential: &Credential,
    ) -> AuthResult<LoginStep> {
        let step = self.login_flow().sign_in(credential).await?;
        if let LoginStep::Authenticated(session) = &step {
            store.set(session.clone()).await;
        }
        Ok(step)
    }

    /// Complete a challenge carried back by the client and store the session.
    ///
    /// With a confirmation, the secrets must match and pass the local policy
    /// before the provider is contacted.
    pub async fn complete_challenge(
        &self,
        store: &TokenStore,
        context: ChallengeContext,
        new_secret: &str,
        confirmation: Option<&str>,
    ) -> AuthResult<Session> {
        let mut flow = self.resume_challenge(context);
        let session = match confirmation {
            Some(confirmation) => {
                flow.complete_challenge_confirmed(
                    new_secret,
                    confirmation,
                    &self.config.password_policy,
                )
                .await?
            }
            None => flow.complete_challenge(new_secret).await?,
        };

        store.set(session.clone()).await;
        Ok(session)
    }

    /// The session for a protected page, or where to send the user instead.
    pub async fn current_session(&self, store: &TokenStore) -> Access {
        self.guard.authorize(store).await
    }

    /// Clear the store and return the sign-in path.
    pub async fn sign_out(&self, store: &TokenStore) -> String {
        if let Some(session) = store.clear().await {
            info!(subject_id = %session.subject_id(), "signed out");
        }
        self.config.login_path.clone()
    }

    /// Attributes of the signed-in account, retried once on a transient failure.
    pub async fn read_profile(&self, store: &TokenStore) -> AuthResult<HashMap<String, String>> {
        let session = self.require_session(store).await?;
        let access_token = session.tokens.access_token;

        retry_transient_once(|| {
            let exchange = self.exchange.clone();
            let access_token = access_token.clone();
            async move {
                exchange
                    .read_attributes(&access_token)
                    .await
                    .map_err(AuthError::from)
            }
        })
        .await
    }

    /// Update account attributes and refresh the session so the ID token
    /// claims reflect them.
    pub async fn update_attributes_and_refresh(
        &self,
        store: &TokenStore,
        attributes: &HashMap<String, String>,
    ) -> AuthResult<Session> {
        let maintenance = self.maintenance()?;
        let session = self.require_session(store).await?;

        maintenance
            .update_attributes(&session.tokens.access_token, attributes)
            .await?;

        match self.orchestrator.force_refresh_in(store).await? {
            Some(refreshed) => {
                info!(subject_id = %refreshed.subject_id(), "attributes updated");
                Ok(refreshed)
            }
            None => Err(AuthError::SessionExpired),
        }
    }

    pub async fn forgot_password(&self, identifier: &str) -> AuthResult<()> {
        self.maintenance()?.forgot_password(identifier).await?;
        Ok(())
    }

    pub async fn confirm_forgot_password(
        &self,
        identifier: &str,
        code: &str,
        new_secret: &str,
        confirmation: &str,
    ) -> AuthResult<()> {
        self.check_new_secret(new_secret, confirmation)?;
        self.maintenance()?
            .confirm_forgot_password(identifier, code, new_secret)
            .await?;
        info!(identifier, "secret reset");
        Ok(())
    }

    pub async fn change_password(
        &self,
        store: &TokenStore,
        current_secret: &str,
        new_secret: &str,
        confirmation: &str,
    ) -> AuthResult<()> {
        self.check_new_secret(new_secret, confirmation)?;
        let maintenance = self.maintenance()?;
        let session = self.require_session(store).await?;

        maintenance
            .change_password(&session.tokens.access_token, current_secret, new_secret)
            .await?;
        info!(subject_id = %session.subject_id(), "secret changed");
        Ok(())
    }

    /// The stored session, refreshed if stale.
    pub async fn require_session(&self, store: &TokenStore) -> AuthResult<Session> {
        self.orchestrator
            .ensure_fresh_in(store)
            .await?
            .ok_or(AuthError::SessionExpired)
    }

    fn check_new_secret(&self, new_secret: &str, confirmation: &str) -> AuthResult<()> {
        if new_secret != confirmation {
            return Err(AuthError::SecretMismatch);
        }
        self.config
            .password_policy
            .check(new_secret)
            .map_err(AuthError::PolicyViolation)
    }

    fn maintenance(&self) -> AuthResult<&Arc<dyn AccountMaintenance>> {
        self.maintenance.as_ref().ok_or_else(|| {
            error!("account maintenance requested but no backend is configured");
            AuthError::Transient("account maintenance unavailable".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::local_provider;
    use estate_identity_local::{LocalIdentityProvider, LocalProviderConfig};

    fn manager(provider: &LocalIdentityProvider) -> SessionManager {
        SessionManager::new(Arc::new(provider.clone()), SessionConfig::default())
            .with_maintenance(Arc::new(provider.clone()))
    }

    async fn signed_in_store(manager: &SessionManager) -> TokenStore {
        let store = TokenStore::new();
        manager
            .sign_in(&store, &Credential::new("agent@example.com", "Agent-Secret1"))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_sign_in_stores_session() {
        let provider = local_provider(LocalProviderConfig::default()).await;
        let manager = manager(&provider);
        let store = signed_in_store(&manager).await;

        let Access::Allowed(session) = manager.current_session(&store).await else {
            panic!("Expected Allowed");
        };
        assert_eq!(session.claims.tenant_binding.as_deref(), Some("agency-1"));
    }

    #[tokio::test]
    async fn test_challenge_does_not_store_session() {
        let provider = local_provider(LocalProviderConfig::default()).await;
        let manager = manager(&provider);
        let store = TokenStore::new();

        let step = manager
            .sign_in(&store, &Credential::new("new@example.com", "Temp-Secret1"))
            .await
            .unwrap();
        let LoginStep::ChallengePending(context) = step else {
            panic!("Expected ChallengePending");
        };
        assert!(store.get().await.is_none());

        let err = manager
            .complete_challenge(&store, context.clone(), "Mismatch1!", Some("Mismatch2!"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::SecretMismatch);

        let session = manager
            .complete_challenge(&store, context, "LongEnough1!", Some("LongEnough1!"))
            .await
            .unwrap();
        assert_eq!(store.get().await, Some(session));
    }

    #[tokio::test]
    async fn test_sign_out_redirects_to_login() {
        let provider = local_provider(LocalProviderConfig::default()).await;
        let manager = manager(&provider);
        let store = signed_in_store(&manager).await;

        assert_eq!(manager.sign_out(&store).await, "/login");
        assert_eq!(
            manager.current_session(&store).await,
            Access::Redirect("/login".to_string())
        );
    }

    #[tokio::test]
    async fn test_update_attributes_refreshes_claims() {
        let provider = local_provider(LocalProviderConfig::default()).await;
        let manager = manager(&provider);
        let store = signed_in_store(&manager).await;

        let attributes =
            HashMap::from([("custom:currentAgency".to_string(), "agency-2".to_string())]);
        let session = manager
            .update_attributes_and_refresh(&store, &attributes)
            .await
            .unwrap();

        assert_eq!(session.claims.tenant_binding.as_deref(), Some("agency-2"));
        assert_eq!(store.get().await, Some(session));
        assert_eq!(provider.refresh_calls(), 1);

        let profile = manager.read_profile(&store).await.unwrap();
        assert_eq!(
            profile.get("custom:currentAgency").map(String::as_str),
            Some("agency-2")
        );
    }

    #[tokio::test]
    async fn test_password_maintenance() {
        let provider = local_provider(LocalProviderConfig::default()).await;
        let manager = manager(&provider);
        let store = signed_in_store(&manager).await;

        assert!(matches!(
            manager
                .change_password(&store, "Agent-Secret1", "short", "short")
                .await,
            Err(AuthError::PolicyViolation(_))
        ));
        manager
            .change_password(&store, "Agent-Secret1", "Changed-Secret1", "Changed-Secret1")
            .await
            .unwrap();

        manager.forgot_password("agent@example.com").await.unwrap();
        let code = provider.pending_reset_code("agent@example.com").unwrap();
        manager
            .confirm_forgot_password("agent@example.com", &code, "Recovered-1", "Recovered-1")
            .await
            .unwrap();

        let fresh = TokenStore::new();
        assert!(
            manager
                .sign_in(&fresh, &Credential::new("agent@example.com", "Recovered-1"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_maintenance_requires_backend() {
        let provider = local_provider(LocalProviderConfig::default()).await;
        let manager = SessionManager::new(Arc::new(provider), SessionConfig::default());

        assert!(matches!(
            manager.forgot_password("agent@example.com").await,
            Err(AuthError::Transient(_))
        ));
    }

    #[tokio::test]
    async fn test_profile_requires_session() {
        let provider = local_provider(LocalProviderConfig::default()).await;
        let manager = manager(&provider);

        assert_eq!(
            manager.read_profile(&TokenStore::new()).await,
            Err(AuthError::SessionExpired)
        );
    }
}
