//! Login flow state machine.
//!
//! ```text
//! Idle -> Resolving -> Done(Session)
//!                   -> Failed(AuthError)
//!                   -> AwaitingNewSecret -> Resolving -> Done | Failed
//! ```
//!
//! A flow is owned by one request context. It keeps no timer: the provider
//! decides when a continuation token has expired.

use std::fmt;
use std::sync::Arc;

use estate_auth_core::{
    AuthError, AuthResult, ChallengeContext, ClaimMapping, Credential, CredentialExchange,
    Outcome, PasswordPolicy, PolicyViolation, RejectReason, Session, TokenTriple,
};
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    Idle,
    /// An exchange call is in progress.
    Resolving,
    AwaitingNewSecret {
        context: ChallengeContext,
        last_violation: Option<PolicyViolation>,
    },
    Done(Session),
    Failed(AuthError),
}

impl LoginState {
    pub fn name(&self) -> &'static str {
        match self {
            LoginState::Idle => "idle",
            LoginState::Resolving => "resolving",
            LoginState::AwaitingNewSecret { .. } => "awaiting_new_secret",
            LoginState::Done(_) => "done",
            LoginState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Non-error result of `LoginFlow::sign_in`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStep {
    Authenticated(Session),
    ChallengePending(ChallengeContext),
}

pub struct LoginFlow {
    exchange: Arc<dyn CredentialExchange>,
    claim_mapping: ClaimMapping,
    state: LoginState,
}

impl LoginFlow {
    pub fn new(exchange: Arc<dyn CredentialExchange>, claim_mapping: ClaimMapping) -> Self {
        Self {
            exchange,
            claim_mapping,
            state: LoginState::Idle,
        }
    }

    /// Rebuild a flow from a challenge context round-tripped through the client.
    pub fn resume(
        exchange: Arc<dyn CredentialExchange>,
        claim_mapping: ClaimMapping,
        context: ChallengeContext,
    ) -> Self {
        Self {
            exchange,
            claim_mapping,
            state: LoginState::AwaitingNewSecret {
                context,
                last_violation: None,
            },
        }
    }

    pub fn state(&self) -> &LoginState {
        &self.state
    }

    pub fn session(&self) -> Option<&Session> {
        match &self.state {
            LoginState::Done(session) => Some(session),
            _ => None,
        }
    }

    pub async fn sign_in(&mut self, credential: &Credential) -> AuthResult<LoginStep> {
        match self.state {
            LoginState::Idle | LoginState::Failed(_) => {}
            _ => {
                return Err(AuthError::InvalidTransition(format!(
                    "sign_in from {}",
                    self.state
                )));
            }
        }

        self.state = LoginState::Resolving;
        debug!(identifier = %credential.identifier(), provider = self.exchange.provider_id(), "signing in");

        match self.exchange.sign_in(credential).await {
            Outcome::Authenticated(tokens) => self.establish(tokens).map(LoginStep::Authenticated),
            Outcome::ChallengePending(context) => {
                info!(identifier = %context.identifier, kind = %context.kind, "challenge pending");
                self.state = LoginState::AwaitingNewSecret {
                    context: context.clone(),
                    last_violation: None,
                };
                Ok(LoginStep::ChallengePending(context))
            }
            Outcome::Rejected(reason) => Err(self.fail(reason.into())),
        }
    }

    /// Answer the pending challenge. Only valid in `AwaitingNewSecret`.
    ///
    /// A policy rejection leaves the flow waiting for another secret; every
    /// other rejection is terminal.
    pub async fn complete_challenge(&mut self, new_secret: &str) -> AuthResult<Session> {
        let context = match &self.state {
            LoginState::AwaitingNewSecret { context, .. } => context.clone(),
            // The continuation token was consumed by the completion that got us here.
            LoginState::Done(_) => return Err(AuthError::ChallengeExpired),
            state => {
                return Err(AuthError::InvalidTransition(format!(
                    "complete_challenge from {state}"
                )));
            }
        };

        self.state = LoginState::Resolving;

        match self.exchange.complete_challenge(&context, new_secret).await {
            Outcome::Authenticated(tokens) => self.establish(tokens),
            Outcome::ChallengePending(next) => {
                error!(kind = %next.kind, "identity provider chained a second challenge");
                Err(self.fail(AuthError::Transient(
                    "unexpected follow-up challenge".to_string(),
                )))
            }
            Outcome::Rejected(RejectReason::Policy(violation)) => {
                debug!(identifier = %context.identifier, %violation, "new secret rejected by policy");
                self.state = LoginState::AwaitingNewSecret {
                    context,
                    last_violation: Some(violation.clone()),
                };
                Err(AuthError::PolicyViolation(violation))
            }
            Outcome::Rejected(reason) => Err(self.fail(reason.into())),
        }
    }

    /// Check the confirmation and the local policy, then complete the challenge.
    pub async fn complete_challenge_confirmed(
        &mut self,
        new_secret: &str,
        confirmation: &str,
        policy: &PasswordPolicy,
    ) -> AuthResult<Session> {
        if !matches!(self.state, LoginState::AwaitingNewSecret { .. }) {
            return self.complete_challenge(new_secret).await;
        }

        if new_secret != confirmation {
            return Err(AuthError::SecretMismatch);
        }
        if let Err(violation) = policy.check(new_secret) {
            if let LoginState::AwaitingNewSecret { last_violation, .. } = &mut self.state {
                *last_violation = Some(violation.clone());
            }
            return Err(AuthError::PolicyViolation(violation));
        }

        self.complete_challenge(new_secret).await
    }

    fn establish(&mut self, tokens: TokenTriple) -> AuthResult<Session> {
        match Session::from_tokens(tokens, &self.claim_mapping) {
            Ok(session) => {
                info!(subject_id = %session.subject_id(), expires_at = %session.expires_at, "signed in");
                self.state = LoginState::Done(session.clone());
                Ok(session)
            }
            Err(e) => {
                error!(error = %e, provider = self.exchange.provider_id(), "issued tokens could not be decoded");
                Err(self.fail(AuthError::Transient(format!("undecodable tokens: {e}"))))
            }
        }
    }

    fn fail(&mut self, err: AuthError) -> AuthError {
        self.state = LoginState::Failed(err.clone());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::local_provider;
    use estate_auth_core::PolicyRule;
    use estate_identity_local::{LocalIdentityProvider, LocalProviderConfig};

    fn flow(provider: &LocalIdentityProvider) -> LoginFlow {
        LoginFlow::new(Arc::new(provider.clone()), ClaimMapping::default())
    }

    async fn awaiting(provider: &LocalIdentityProvider) -> (LoginFlow, ChallengeContext) {
        let mut flow = flow(provider);
        let step = flow
            .sign_in(&Credential::new("new@example.com", "Temp-Secret1"))
            .await
            .unwrap();
        let LoginStep::ChallengePending(context) = step else {
            panic!("Expected ChallengePending, got: {:?}", step);
        };
        (flow, context)
    }

    #[tokio::test]
    async fn test_sign_in_reaches_done() {
        let provider = local_provider(LocalProviderConfig::default()).await;
        let mut flow = flow(&provider);

        let step = flow
            .sign_in(&Credential::new("agent@example.com", "Agent-Secret1"))
            .await
            .unwrap();

        let LoginStep::Authenticated(session) = step else {
            panic!("Expected Authenticated");
        };
        assert!(!session.subject_id().is_empty());
        assert!(session.tokens.is_complete());
        assert_eq!(flow.session(), Some(&session));
        assert_eq!(flow.state().name(), "done");
    }

    #[tokio::test]
    async fn test_invalid_credentials_fail_and_allow_retry() {
        let provider = local_provider(LocalProviderConfig::default()).await;
        let mut flow = flow(&provider);

        let result = flow
            .sign_in(&Credential::new("agent@example.com", "wrong"))
            .await;
        assert_eq!(result, Err(AuthError::InvalidCredentials));
        assert_eq!(flow.state(), &LoginState::Failed(AuthError::InvalidCredentials));

        let result = flow
            .sign_in(&Credential::new("agent@example.com", "Agent-Secret1"))
            .await;
        assert!(matches!(result, Ok(LoginStep::Authenticated(_))));
    }

    #[tokio::test]
    async fn test_challenge_then_complete() {
        let provider = local_provider(LocalProviderConfig::default()).await;
        let (mut flow, context) = awaiting(&provider).await;

        assert_eq!(context.identifier, "new@example.com");
        assert!(matches!(flow.state(), LoginState::AwaitingNewSecret { .. }));
        assert!(flow.session().is_none());

        let session = flow.complete_challenge("LongEnough1!").await.unwrap();
        assert!(session.tokens.is_complete());
        assert_eq!(flow.session(), Some(&session));
    }

    #[tokio::test]
    async fn test_completing_twice_never_authenticates_twice() {
        let provider = local_provider(LocalProviderConfig::default()).await;
        let (mut flow, context) = awaiting(&provider).await;

        flow.complete_challenge("LongEnough1!").await.unwrap();
        assert_eq!(
            flow.complete_challenge("LongEnough1!").await,
            Err(AuthError::ChallengeExpired)
        );

        // A second flow replaying the same context is refused by the provider.
        let mut replay = LoginFlow::resume(
            Arc::new(provider.clone()),
            ClaimMapping::default(),
            context,
        );
        assert_eq!(
            replay.complete_challenge("LongEnough2!").await,
            Err(AuthError::ChallengeExpired)
        );
        assert_eq!(replay.state(), &LoginState::Failed(AuthError::ChallengeExpired));
    }

    #[tokio::test]
    async fn test_policy_violation_keeps_awaiting() {
        let provider = local_provider(LocalProviderConfig::default()).await;
        let (mut flow, context) = awaiting(&provider).await;

        for _ in 0..2 {
            let err = flow.complete_challenge("short1").await.unwrap_err();
            let AuthError::PolicyViolation(violation) = err else {
                panic!("Expected PolicyViolation, got: {:?}", err);
            };
            assert!(violation.cites(&PolicyRule::MinLength(8)));
        }

        match flow.state() {
            LoginState::AwaitingNewSecret {
                context: pending,
                last_violation,
            } => {
                assert_eq!(pending, &context);
                assert!(last_violation.as_ref().is_some_and(|v| v.cites_min_length()));
            }
            other => panic!("Expected AwaitingNewSecret, got: {:?}", other),
        }

        assert!(flow.complete_challenge("LongEnough1!").await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_continuation_token() {
        let provider = local_provider(LocalProviderConfig::default()).await;
        let (mut flow, context) = awaiting(&provider).await;
        provider.expire_challenge(&context.continuation_token);

        assert_eq!(
            flow.complete_challenge("LongEnough1!").await,
            Err(AuthError::ChallengeExpired)
        );
        assert_eq!(flow.state(), &LoginState::Failed(AuthError::ChallengeExpired));
    }

    #[tokio::test]
    async fn test_confirmed_completion_checks_locally() {
        let provider = local_provider(LocalProviderConfig::default()).await;
        let (mut flow, _) = awaiting(&provider).await;
        let policy = PasswordPolicy::default();

        assert_eq!(
            flow.complete_challenge_confirmed("LongEnough1!", "LongEnough2!", &policy)
                .await,
            Err(AuthError::SecretMismatch)
        );
        assert!(matches!(
            flow.complete_challenge_confirmed("short1", "short1", &policy)
                .await,
            Err(AuthError::PolicyViolation(_))
        ));
        assert!(matches!(flow.state(), LoginState::AwaitingNewSecret { last_violation: Some(_), .. }));

        let session = flow
            .complete_challenge_confirmed("LongEnough1!", "LongEnough1!", &policy)
            .await
            .unwrap();
        assert!(!session.subject_id().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_order_calls() {
        let provider = local_provider(LocalProviderConfig::default()).await;

        let mut idle = flow(&provider);
        assert!(matches!(
            idle.complete_challenge("LongEnough1!").await,
            Err(AuthError::InvalidTransition(_))
        ));

        let (mut awaiting, _) = awaiting(&provider).await;
        assert!(matches!(
            awaiting
                .sign_in(&Credential::new("agent@example.com", "Agent-Secret1"))
                .await,
            Err(AuthError::InvalidTransition(_))
        ));

        let mut done = flow(&provider);
        done.sign_in(&Credential::new("agent@example.com", "Agent-Secret1"))
            .await
            .unwrap();
        assert!(matches!(
            done.sign_in(&Credential::new("agent@example.com", "Agent-Secret1"))
                .await,
            Err(AuthError::InvalidTransition(_))
        ));
    }

    /// Never answers, so a sign-in can be abandoned mid-exchange.
    struct StalledExchange;

    #[async_trait::async_trait]
    impl CredentialExchange for StalledExchange {
        fn provider_id(&self) -> &str {
            "stalled"
        }

        async fn sign_in(&self, _: &Credential) -> Outcome {
            std::future::pending().await
        }

        async fn complete_challenge(&self, _: &ChallengeContext, _: &str) -> Outcome {
            std::future::pending().await
        }

        async fn refresh(&self, _: &str, _: &str) -> Result<TokenTriple, RejectReason> {
            std::future::pending().await
        }

        async fn read_attributes(
            &self,
            _: &str,
        ) -> Result<std::collections::HashMap<String, String>, RejectReason> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_sign_in_refused_while_resolving() {
        let mut flow = LoginFlow::new(Arc::new(StalledExchange), ClaimMapping::default());
        let credential = Credential::new("agent@example.com", "Agent-Secret1");

        let abandoned =
            tokio::time::timeout(std::time::Duration::from_millis(20), flow.sign_in(&credential))
                .await;
        assert!(abandoned.is_err());
        assert_eq!(flow.state(), &LoginState::Resolving);

        assert!(matches!(
            flow.sign_in(&credential).await,
            Err(AuthError::InvalidTransition(_))
        ));
        assert_eq!(flow.state(), &LoginState::Resolving);
    }
}
