//! End-to-end session lifecycle against the in-process provider.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use estate_auth_core::{AuthError, Credential};
use estate_identity_local::{LocalIdentityProvider, LocalProviderConfig, NewUser};
use estate_identity_session::{
    Access, LoginStep, SessionConfig, SessionManager, TenantAccess, TokenStore,
    require_tenant_binding,
};

async fn setup(config: LocalProviderConfig) -> (LocalIdentityProvider, SessionManager) {
    let provider = LocalIdentityProvider::new(config);
    provider
        .add_user(
            NewUser::new("manager@example.com", "Manager-Secret1")
                .email("manager@example.com")
                .agency("agency-7"),
        )
        .await
        .unwrap();
    provider
        .add_user(NewUser::new("unbound@example.com", "Unbound-Secret1"))
        .await
        .unwrap();
    provider
        .add_user(NewUser::new("invited@example.com", "Invite-Temp1").temporary())
        .await
        .unwrap();

    let manager = SessionManager::new(Arc::new(provider.clone()), SessionConfig::default())
        .with_maintenance(Arc::new(provider.clone()));
    (provider, manager)
}

#[tokio::test]
async fn test_forced_change_then_protected_access() {
    let (_, manager) = setup(LocalProviderConfig::default()).await;
    let store = TokenStore::new();

    let step = manager
        .sign_in(&store, &Credential::new("invited@example.com", "Invite-Temp1"))
        .await
        .unwrap();
    let LoginStep::ChallengePending(context) = step else {
        panic!("Expected ChallengePending");
    };
    assert_eq!(
        manager.current_session(&store).await,
        Access::Redirect("/login".to_string())
    );

    let err = manager
        .complete_challenge(&store, context.clone(), "short1", None)
        .await
        .unwrap_err();
    let AuthError::PolicyViolation(violation) = err else {
        panic!("Expected PolicyViolation");
    };
    assert!(violation.cites_min_length());

    manager
        .complete_challenge(&store, context.clone(), "LongEnough1!", None)
        .await
        .unwrap();
    assert!(matches!(
        manager.current_session(&store).await,
        Access::Allowed(_)
    ));

    // The context is spent.
    assert_eq!(
        manager
            .complete_challenge(&TokenStore::new(), context, "LongEnough2!", None)
            .await,
        Err(AuthError::ChallengeExpired)
    );
}

#[tokio::test]
async fn test_refresh_preserves_claims_and_deduplicates() {
    let config = LocalProviderConfig::default().with_refresh_delay(StdDuration::from_millis(50));
    let (provider, manager) = setup(config).await;
    let store = TokenStore::new();
    manager
        .sign_in(&store, &Credential::new("manager@example.com", "Manager-Secret1"))
        .await
        .unwrap();

    let session = store.get().await.unwrap();
    let stale = session.expires_at - Duration::seconds(10);
    let guard = manager.guard();

    let (first, second) = tokio::join!(
        guard.authorize_at(&store, stale),
        guard.authorize_at(&store, stale),
    );
    assert_eq!(provider.refresh_calls(), 1);

    let (Access::Allowed(first), Access::Allowed(second)) = (first, second) else {
        panic!("Expected both requests to be allowed");
    };
    assert_eq!(first, second);
    assert_eq!(first.subject_id(), session.subject_id());
    assert_eq!(first.claims.tenant_binding.as_deref(), Some("agency-7"));
    assert_eq!(store.get().await, Some(first));
}

#[tokio::test]
async fn test_invalidated_refresh_token_redirects_to_login() {
    let (provider, manager) = setup(LocalProviderConfig::default()).await;
    let store = TokenStore::new();
    manager
        .sign_in(&store, &Credential::new("manager@example.com", "Manager-Secret1"))
        .await
        .unwrap();
    let session = store.get().await.unwrap();

    provider.invalidate_user_refresh_tokens("manager@example.com");

    assert_eq!(
        manager.orchestrator().force_refresh(&session).await,
        Err(AuthError::SessionExpired)
    );
    assert_eq!(
        manager
            .guard()
            .authorize_at(&store, session.expires_at + Duration::seconds(1))
            .await,
        Access::Redirect("/login".to_string())
    );
    assert!(store.get().await.is_none());
}

#[tokio::test]
async fn test_tenant_binding_is_required() {
    let (_, manager) = setup(LocalProviderConfig::default()).await;

    let store = TokenStore::new();
    manager
        .sign_in(&store, &Credential::new("unbound@example.com", "Unbound-Secret1"))
        .await
        .unwrap();
    let Access::Allowed(session) = manager.current_session(&store).await else {
        panic!("Expected Allowed");
    };
    assert_eq!(require_tenant_binding(&session), TenantAccess::Forbidden);

    let store = TokenStore::new();
    manager
        .sign_in(&store, &Credential::new("manager@example.com", "Manager-Secret1"))
        .await
        .unwrap();
    let Access::Allowed(session) = manager.current_session(&store).await else {
        panic!("Expected Allowed");
    };
    let TenantAccess::Allowed(tenant) = require_tenant_binding(&session) else {
        panic!("Expected tenant binding");
    };
    assert_eq!(tenant.tenant, "agency-7");
}
