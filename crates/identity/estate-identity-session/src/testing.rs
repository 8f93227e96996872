use std::collections::BTreeSet;

use chrono::{Duration, Utc};
use estate_auth_core::{
    ClaimMapping, Credential, CredentialExchange, Outcome, Session, SessionClaims, TokenTriple,
};
use estate_identity_local::{LocalIdentityProvider, LocalProviderConfig, NewUser};

/// A provider seeded with `agent@example.com` and `new@example.com`, the
/// latter holding a temporary secret.
pub(crate) async fn local_provider(config: LocalProviderConfig) -> LocalIdentityProvider {
    let provider = LocalIdentityProvider::new(config);

    provider
        .add_user(
            NewUser::new("agent@example.com", "Agent-Secret1")
                .email("agent@example.com")
                .display_name("Agent Smith")
                .agency("agency-1")
                .group("managers"),
        )
        .await
        .unwrap();
    provider
        .add_user(NewUser::new("new@example.com", "Temp-Secret1").temporary())
        .await
        .unwrap();

    provider
}

pub(crate) async fn signed_in(provider: &LocalIdentityProvider) -> Session {
    match provider
        .sign_in(&Credential::new("agent@example.com", "Agent-Secret1"))
        .await
    {
        Outcome::Authenticated(tokens) => {
            Session::from_tokens(tokens, &ClaimMapping::default()).unwrap()
        }
        other => panic!("Expected Authenticated, got: {:?}", other),
    }
}

pub(crate) fn session_for(subject_id: &str) -> Session {
    Session {
        tokens: TokenTriple::bearer("access", "id", "refresh"),
        claims: SessionClaims {
            subject_id: subject_id.to_string(),
            email: None,
            display_name: None,
            group_memberships: BTreeSet::new(),
            tenant_binding: None,
        },
        expires_at: Utc::now() + Duration::hours(1),
    }
}
