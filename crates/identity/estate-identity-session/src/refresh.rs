//! Transparent session extension with single-flight de-duplication.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use estate_auth_core::{AuthError, AuthResult, ClaimMapping, CredentialExchange, RejectReason, Session};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, error, info, warn};

use crate::store::TokenStore;

type RefreshFuture = Shared<BoxFuture<'static, AuthResult<Session>>>;

/// Subject and the refresh token being redeemed. Only callers holding the
/// same token share a call.
type RefreshKey = (String, String);

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// How long before expiry a session is already treated as stale.
    pub skew: Duration,
    pub claim_mapping: ClaimMapping,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            skew: Duration::seconds(60),
            claim_mapping: ClaimMapping::default(),
        }
    }
}

/// Refreshes stale sessions through the credential exchange.
///
/// Concurrent refreshes of the same session share one in-flight call. The
/// call runs on its own task, so it completes and drops its entry even when
/// every caller has gone away.
#[derive(Clone)]
pub struct RefreshOrchestrator {
    exchange: Arc<dyn CredentialExchange>,
    config: Arc<RefreshConfig>,
    in_flight: Arc<DashMap<RefreshKey, RefreshFuture>>,
}

impl RefreshOrchestrator {
    pub fn new(exchange: Arc<dyn CredentialExchange>, config: RefreshConfig) -> Self {
        Self {
            exchange,
            config: Arc::new(config),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    /// Number of subjects with a refresh currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub async fn ensure_fresh(&self, session: &Session) -> AuthResult<Session> {
        self.ensure_fresh_at(session, Utc::now()).await
    }

    /// Return `session` unchanged while `now` is before `expires_at - skew`,
    /// otherwise refresh it once.
    pub async fn ensure_fresh_at(
        &self,
        session: &Session,
        now: DateTime<Utc>,
    ) -> AuthResult<Session> {
        if !session.needs_refresh_at(now, self.config.skew) {
            return Ok(session.clone());
        }

        self.force_refresh(session).await
    }

    /// Refresh regardless of the expiry, e.g. after the BFF rejected the token.
    pub async fn force_refresh(&self, session: &Session) -> AuthResult<Session> {
        let key = (
            session.subject_id().to_string(),
            session.tokens.refresh_token.clone(),
        );

        let refresh = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!(subject_id = %session.subject_id(), "joining in-flight refresh");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let refresh = self.spawn_refresh(key, session.clone());
                entry.insert(refresh.clone());
                refresh
            }
        };

        refresh.await
    }

    fn spawn_refresh(&self, key: RefreshKey, session: Session) -> RefreshFuture {
        let exchange = self.exchange.clone();
        let config = self.config.clone();
        let in_flight = self.in_flight.clone();

        let task = tokio::spawn(async move {
            let result = refresh_once(exchange.as_ref(), &config, &session).await;
            in_flight.remove(&key);
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                error!(error = %e, "refresh task failed");
                Err(AuthError::Transient(format!("refresh task failed: {e}")))
            })
        }
        .boxed()
        .shared()
    }

    /// Refresh the session held in `store` if it is stale and write it back.
    ///
    /// Returns `None` for an empty store. A `SessionExpired` result clears the store.
    pub async fn ensure_fresh_in(&self, store: &TokenStore) -> AuthResult<Option<Session>> {
        self.refresh_in(store, false).await
    }

    pub async fn force_refresh_in(&self, store: &TokenStore) -> AuthResult<Option<Session>> {
        self.refresh_in(store, true).await
    }

    async fn refresh_in(&self, store: &TokenStore, force: bool) -> AuthResult<Option<Session>> {
        let Some(session) = store.get().await else {
            return Ok(None);
        };

        let result = if force {
            self.force_refresh(&session).await
        } else {
            self.ensure_fresh(&session).await
        };

        match result {
            Ok(fresh) => {
                if fresh != session {
                    store.update(fresh.clone()).await;
                }
                Ok(Some(fresh))
            }
            Err(AuthError::SessionExpired) => {
                store.clear().await;
                Err(AuthError::SessionExpired)
            }
            Err(err) => Err(err),
        }
    }
}

async fn refresh_once(
    exchange: &dyn CredentialExchange,
    config: &RefreshConfig,
    session: &Session,
) -> AuthResult<Session> {
    let subject_id = session.subject_id();

    let tokens = match exchange
        .refresh(&session.tokens.refresh_token, subject_id)
        .await
    {
        Ok(tokens) => tokens,
        Err(RejectReason::Transient(cause)) => {
            warn!(subject_id = %subject_id, cause = %cause, "session refresh failed");
            return Err(AuthError::Transient(cause));
        }
        Err(reason) => {
            info!(subject_id = %subject_id, %reason, "refresh token rejected");
            return Err(AuthError::SessionExpired);
        }
    };

    let refreshed = Session::from_tokens(tokens, &config.claim_mapping).map_err(|e| {
        error!(subject_id = %subject_id, error = %e, "refreshed tokens could not be decoded");
        AuthError::Transient(format!("undecodable tokens: {e}"))
    })?;

    if refreshed.subject_id() != subject_id {
        warn!(
            subject_id = %subject_id,
            refreshed_subject_id = %refreshed.subject_id(),
            "refresh returned another subject"
        );
        return Err(AuthError::SessionExpired);
    }

    info!(
        subject_id = %subject_id,
        expires_at = %refreshed.expires_at,
        provider = exchange.provider_id(),
        "session refreshed"
    );
    Ok(refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{local_provider, session_for, signed_in};
    use estate_identity_local::LocalProviderConfig;
    use std::time::Duration as StdDuration;

    fn orchestrator(provider: &estate_identity_local::LocalIdentityProvider) -> RefreshOrchestrator {
        RefreshOrchestrator::new(Arc::new(provider.clone()), RefreshConfig::default())
    }

    #[tokio::test]
    async fn test_fresh_session_is_returned_unchanged() {
        let provider = local_provider(LocalProviderConfig::default()).await;
        let session = signed_in(&provider).await;
        let orchestrator = orchestrator(&provider);

        let result = orchestrator.ensure_fresh(&session).await.unwrap();
        assert_eq!(result, session);
        assert_eq!(provider.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_stale_session_refreshes_once() {
        let provider = local_provider(LocalProviderConfig::default()).await;
        let session = signed_in(&provider).await;
        let orchestrator = orchestrator(&provider);

        let now = session.expires_at - Duration::seconds(30);
        let refreshed = orchestrator.ensure_fresh_at(&session, now).await.unwrap();

        assert_eq!(provider.refresh_calls(), 1);
        assert_ne!(refreshed.tokens.access_token, session.tokens.access_token);
        assert_eq!(refreshed.subject_id(), session.subject_id());
        assert_eq!(refreshed.claims.tenant_binding, session.claims.tenant_binding);
        assert_eq!(refreshed.tokens.refresh_token, session.tokens.refresh_token);
        assert_eq!(orchestrator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_call() {
        let config = LocalProviderConfig::default().with_refresh_delay(StdDuration::from_millis(100));
        let provider = local_provider(config).await;
        let session = signed_in(&provider).await;
        let orchestrator = orchestrator(&provider);

        let now = session.expires_at + Duration::seconds(1);
        let (first, second) = tokio::join!(
            orchestrator.ensure_fresh_at(&session, now),
            orchestrator.ensure_fresh_at(&session, now),
        );

        assert_eq!(provider.refresh_calls(), 1);
        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(orchestrator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_across_tasks() {
        let config = LocalProviderConfig::default().with_refresh_delay(StdDuration::from_millis(100));
        let provider = local_provider(config).await;
        let session = signed_in(&provider).await;
        let orchestrator = orchestrator(&provider);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let orchestrator = orchestrator.clone();
                let session = session.clone();
                tokio::spawn(async move { orchestrator.force_refresh(&session).await })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(provider.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_sequential_refreshes_are_not_merged() {
        let provider = local_provider(LocalProviderConfig::default()).await;
        let session = signed_in(&provider).await;
        let orchestrator = orchestrator(&provider);

        orchestrator.force_refresh(&session).await.unwrap();
        orchestrator.force_refresh(&session).await.unwrap();
        assert_eq!(provider.refresh_calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidated_refresh_token_expires_session() {
        let provider = local_provider(LocalProviderConfig::default()).await;
        let session = signed_in(&provider).await;
        let orchestrator = orchestrator(&provider);

        provider.invalidate_refresh_token(&session.tokens.refresh_token);

        let result = orchestrator.force_refresh(&session).await;
        assert_eq!(result, Err(AuthError::SessionExpired));
    }

    #[tokio::test]
    async fn test_ensure_fresh_in_clears_store_on_expiry() {
        let provider = local_provider(LocalProviderConfig::default()).await;
        let session = signed_in(&provider).await;
        let orchestrator = orchestrator(&provider);
        let store = TokenStore::with_session(session.clone());

        let refreshed = orchestrator.force_refresh_in(&store).await.unwrap().unwrap();
        assert_eq!(store.get().await, Some(refreshed));

        provider.invalidate_user_refresh_tokens("agent@example.com");
        assert_eq!(
            orchestrator.force_refresh_in(&store).await,
            Err(AuthError::SessionExpired)
        );
        assert!(store.get().await.is_none());

        assert_eq!(orchestrator.ensure_fresh_in(&store).await, Ok(None));
    }

    #[tokio::test]
    async fn test_abandoned_refresh_does_not_block_later_sessions() {
        let config = LocalProviderConfig::default().with_refresh_delay(StdDuration::from_millis(200));
        let provider = local_provider(config).await;
        let old = signed_in(&provider).await;
        let orchestrator = orchestrator(&provider);

        let abandoned =
            tokio::time::timeout(StdDuration::from_millis(20), orchestrator.force_refresh(&old))
                .await;
        assert!(abandoned.is_err());
        assert_eq!(orchestrator.in_flight(), 1);

        provider.invalidate_refresh_token(&old.tokens.refresh_token);
        let fresh = signed_in(&provider).await;

        let refreshed = orchestrator.force_refresh(&fresh).await.unwrap();
        assert_eq!(refreshed.subject_id(), fresh.subject_id());
        assert_eq!(provider.refresh_calls(), 2);

        // The abandoned call still runs to completion and drops its entry.
        tokio::time::sleep(StdDuration::from_millis(300)).await;
        assert_eq!(orchestrator.in_flight(), 0);
    }

    struct FlakyExchange;

    #[async_trait::async_trait]
    impl CredentialExchange for FlakyExchange {
        fn provider_id(&self) -> &str {
            "flaky"
        }

        async fn sign_in(&self, _: &estate_auth_core::Credential) -> estate_auth_core::Outcome {
            estate_auth_core::Outcome::Rejected(RejectReason::transient("down"))
        }

        async fn complete_challenge(
            &self,
            _: &estate_auth_core::ChallengeContext,
            _: &str,
        ) -> estate_auth_core::Outcome {
            estate_auth_core::Outcome::Rejected(RejectReason::transient("down"))
        }

        async fn refresh(
            &self,
            _: &str,
            _: &str,
        ) -> Result<estate_auth_core::TokenTriple, RejectReason> {
            Err(RejectReason::transient("connection reset"))
        }

        async fn read_attributes(
            &self,
            _: &str,
        ) -> Result<std::collections::HashMap<String, String>, RejectReason> {
            Err(RejectReason::transient("down"))
        }
    }

    #[tokio::test]
    async fn test_transient_refresh_failure_keeps_store() {
        let orchestrator = RefreshOrchestrator::new(Arc::new(FlakyExchange), RefreshConfig::default());
        let session = session_for("subject-1");
        let store = TokenStore::with_session(session.clone());

        let result = orchestrator.force_refresh_in(&store).await;
        assert_eq!(result, Err(AuthError::Transient("connection reset".to_string())));
        assert_eq!(store.get().await, Some(session));
    }
}
