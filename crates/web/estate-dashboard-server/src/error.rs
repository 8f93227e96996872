//! Mapping of session errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use estate_auth_core::{AuthError, PolicyRule};
use serde::Serialize;
use tracing::{error, warn};

use crate::bff::BffError;

#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    /// The user must sign in again at this path.
    SignIn(String),
    /// The BFF failed for a reason unrelated to authentication.
    Upstream(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub rules: Vec<PolicyRule>,
}

impl ApiError {
    /// Route `SessionExpired` to the sign-in path; keep every other error.
    pub fn from_auth(err: AuthError, login_path: &str) -> Self {
        match err {
            AuthError::SessionExpired => ApiError::SignIn(login_path.to_string()),
            other => ApiError::Auth(other),
        }
    }

    pub fn from_bff(err: BffError, login_path: &str) -> Self {
        match err {
            BffError::Auth(err) => Self::from_auth(err, login_path),
            other => {
                error!(error = %other, "BFF request failed");
                ApiError::Upstream(other.to_string())
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        AuthError::SessionExpired => StatusCode::UNAUTHORIZED,
        AuthError::PolicyViolation(_) | AuthError::SecretMismatch => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AuthError::ChallengeExpired => StatusCode::GONE,
        AuthError::Forbidden => StatusCode::FORBIDDEN,
        AuthError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::ChallengeRequired(_) | AuthError::InvalidTransition(_) => StatusCode::CONFLICT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::SignIn(path) => Redirect::to(&path).into_response(),
            ApiError::Upstream(_) => {
                let body = ErrorBody {
                    error: "upstream".to_string(),
                    message: "The dashboard service is unavailable. Please try again.".to_string(),
                    rules: vec![],
                };
                (StatusCode::BAD_GATEWAY, Json(body)).into_response()
            }
            ApiError::Auth(err) => {
                let status = status_for(&err);
                if let AuthError::Transient(cause) = &err {
                    warn!(cause = %cause, "transient identity failure");
                }

                let rules = match &err {
                    AuthError::PolicyViolation(violation) => violation.rules.clone(),
                    _ => vec![],
                };
                let body = ErrorBody {
                    error: err.code().to_string(),
                    message: err.user_message(),
                    rules,
                };
                (status, Json(body)).into_response()
            }
        }
    }
}
