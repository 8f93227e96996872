//! Cognito error types and their mapping onto rejection reasons.

use std::fmt;

use estate_auth_core::{PasswordPolicy, PolicyViolation, RejectReason};
use thiserror::Error;

pub type CognitoResult<T> = Result<T, CognitoError>;

#[derive(Debug, Error)]
pub enum CognitoError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider error {code}: {message}")]
    Provider { code: String, message: String },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),
}

/// The provider API call an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SignIn,
    CompleteChallenge,
    Refresh,
    ReadAttributes,
    UpdateAttributes,
    ForgotPassword,
    ConfirmForgotPassword,
    ChangePassword,
}

impl Operation {
    /// The `X-Amz-Target` action name.
    pub fn action(&self) -> &'static str {
        match self {
            Operation::SignIn | Operation::Refresh => "InitiateAuth",
            Operation::CompleteChallenge => "RespondToAuthChallenge",
            Operation::ReadAttributes => "GetUser",
            Operation::UpdateAttributes => "UpdateUserAttributes",
            Operation::ForgotPassword => "ForgotPassword",
            Operation::ConfirmForgotPassword => "ConfirmForgotPassword",
            Operation::ChangePassword => "ChangePassword",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::SignIn => "sign_in",
            Operation::CompleteChallenge => "complete_challenge",
            Operation::Refresh => "refresh",
            Operation::ReadAttributes => "read_attributes",
            Operation::UpdateAttributes => "update_attributes",
            Operation::ForgotPassword => "forgot_password",
            Operation::ConfirmForgotPassword => "confirm_forgot_password",
            Operation::ChangePassword => "change_password",
        };
        f.write_str(name)
    }
}

impl CognitoError {
    /// Map onto the rejection taxonomy. Unknown provider codes are transient.
    pub fn reject_reason(&self, operation: Operation, policy: &PasswordPolicy) -> RejectReason {
        let CognitoError::Provider { code, message } = self else {
            return RejectReason::transient(self.to_string());
        };

        match code.as_str() {
            // An exhausted challenge session surfaces as NotAuthorized.
            "NotAuthorizedException"
                if operation == Operation::CompleteChallenge
                    && message.to_lowercase().contains("session") =>
            {
                RejectReason::ChallengeExpired
            }
            "NotAuthorizedException"
            | "UserNotFoundException"
            | "UserNotConfirmedException"
            | "PasswordResetRequiredException" => RejectReason::InvalidCredentials,
            "InvalidPasswordException" => {
                RejectReason::Policy(PolicyViolation::from_provider_message(message, policy))
            }
            "InvalidParameterException" if message.to_lowercase().contains("password") => {
                RejectReason::Policy(PolicyViolation::from_provider_message(message, policy))
            }
            "ExpiredCodeException" | "CodeMismatchException" => RejectReason::ChallengeExpired,
            _ => RejectReason::transient(format!("{code}: {message}")),
        }
    }
}
