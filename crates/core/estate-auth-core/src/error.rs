//! Error taxonomy for credential exchange and session handling.

use std::fmt;

use thiserror::Error;

use crate::policy::PolicyViolation;
use crate::types::ChallengeContext;

/// Errors surfaced by the session layer to the application.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The identifier/secret pair was not accepted.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The provider requires an additional step before issuing tokens.
    #[error("Additional input required: {}", .0.kind)]
    ChallengeRequired(ChallengeContext),

    /// A new secret did not satisfy the provider's password policy.
    #[error("Secret rejected by policy: {0}")]
    PolicyViolation(PolicyViolation),

    /// The challenge continuation token is exhausted or past its validity window.
    #[error("Challenge expired")]
    ChallengeExpired,

    /// The session can no longer be refreshed; the user must sign in again.
    #[error("Session expired")]
    SessionExpired,

    /// The provider or the network failed; the caller may retry once.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The session lacks the tenant binding required by the resource.
    #[error("Tenant binding required")]
    Forbidden,

    /// The new secret and its confirmation differ.
    #[error("Secrets do not match")]
    SecretMismatch,

    /// The login flow was driven out of order.
    #[error("Invalid login flow transition: {0}")]
    InvalidTransition(String),
}

impl AuthError {
    /// Stable machine-readable code, used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::ChallengeRequired(_) => "challenge_required",
            AuthError::PolicyViolation(_) => "policy_violation",
            AuthError::ChallengeExpired => "challenge_expired",
            AuthError::SessionExpired => "session_expired",
            AuthError::Transient(_) => "transient",
            AuthError::Forbidden => "forbidden",
            AuthError::SecretMismatch => "secret_mismatch",
            AuthError::InvalidTransition(_) => "invalid_transition",
        }
    }

    /// Actionable text for the end user. Never includes provider internals.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials => "The email or password is incorrect.".to_string(),
            AuthError::ChallengeRequired(_) => "A new password is required.".to_string(),
            AuthError::PolicyViolation(violation) => violation.user_message(),
            AuthError::ChallengeExpired => {
                "This request has expired. Please sign in again.".to_string()
            }
            AuthError::SessionExpired => "Your session has expired.".to_string(),
            AuthError::Transient(_) => {
                "The sign-in service is temporarily unavailable. Please try again.".to_string()
            }
            AuthError::Forbidden => "Your account is not attached to an agency.".to_string(),
            AuthError::SecretMismatch => "The passwords do not match.".to_string(),
            AuthError::InvalidTransition(_) => "Please restart the sign-in.".to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::Transient(_))
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Rejection reported by a credential exchange call.
///
/// Renders as `transient`, `invalid_credentials`, `challenge_expired` or
/// `policy:<detail>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Network or provider failure. The cause is kept for logging only.
    Transient(String),
    InvalidCredentials,
    Policy(PolicyViolation),
    ChallengeExpired,
}

impl RejectReason {
    pub fn transient(cause: impl Into<String>) -> Self {
        RejectReason::Transient(cause.into())
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Transient(_) => write!(f, "transient"),
            RejectReason::InvalidCredentials => write!(f, "invalid_credentials"),
            RejectReason::Policy(violation) => write!(f, "policy:{violation}"),
            RejectReason::ChallengeExpired => write!(f, "challenge_expired"),
        }
    }
}

impl From<RejectReason> for AuthError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::Transient(cause) => AuthError::Transient(cause),
            RejectReason::InvalidCredentials => AuthError::InvalidCredentials,
            RejectReason::Policy(violation) => AuthError::PolicyViolation(violation),
            RejectReason::ChallengeExpired => AuthError::ChallengeExpired,
        }
    }
}
