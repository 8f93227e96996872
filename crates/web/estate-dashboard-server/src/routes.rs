use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Utc};
use estate_auth_core::{AuthError, ChallengeContext, Credential, Session};
use estate_identity_session::{Access, LoginStep, SessionId, TenantAccess, TokenStore};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::bff::BffError;
use crate::error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/login/new-secret", post(complete_new_secret))
        .route("/logout", post(logout))
        .route("/password/forgot", post(forgot_password))
        .route("/password/reset", post(reset_password))
        .route("/password/change", post(change_password))
        .route("/session", get(current_session))
        .route("/profile", get(read_profile).post(update_profile))
        .route("/agency", get(agency))
        .route("/inspection", get(inspection))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub identifier: String,
    pub secret: String,
}

#[derive(Deserialize)]
pub struct NewSecretRequest {
    pub identifier: String,
    pub continuation_token: String,
    pub new_secret: String,
    #[serde(default)]
    pub confirm_secret: Option<String>,
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub identifier: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub identifier: String,
    pub code: String,
    pub new_secret: String,
    pub confirm_secret: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_secret: String,
    pub new_secret: String,
    pub confirm_secret: String,
}

/// What the browser may know about the session. Tokens stay server-side.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub subject_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub groups: BTreeSet<String>,
    pub tenant: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        let claims = &session.claims;
        Self {
            subject_id: claims.subject_id.clone(),
            email: claims.email.clone(),
            display_name: claims.display_name.clone(),
            groups: claims.group_memberships.clone(),
            tenant: claims.tenant_binding.clone(),
            expires_at: session.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginResponse {
    Authenticated { session: SessionView },
    Challenge { challenge: ChallengeContext },
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let credential = Credential::new(request.identifier, request.secret);
    // A sign-in never inherits the id the browser arrived with.
    let store = Arc::new(TokenStore::new());

    match state.manager.sign_in(&store, &credential).await {
        Ok(LoginStep::Authenticated(session)) => {
            let body = LoginResponse::Authenticated {
                session: SessionView::from(&session),
            };
            Ok((state.establish(jar, store), Json(body)).into_response())
        }
        Ok(LoginStep::ChallengePending(challenge)) => {
            Ok(Json(LoginResponse::Challenge { challenge }).into_response())
        }
        Err(err) => Err(ApiError::from_auth(err, state.login_path())),
    }
}

async fn complete_new_secret(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<NewSecretRequest>,
) -> Result<Response, ApiError> {
    let context =
        ChallengeContext::new_secret_required(request.continuation_token, request.identifier);
    let store = Arc::new(TokenStore::new());

    let session = state
        .manager
        .complete_challenge(
            &store,
            context,
            &request.new_secret,
            request.confirm_secret.as_deref(),
        )
        .await
        .map_err(|err| ApiError::from_auth(err, state.login_path()))?;

    let body = LoginResponse::Authenticated {
        session: SessionView::from(&session),
    };
    Ok((state.establish(jar, store), Json(body)).into_response())
}

async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Redirect) {
    let path = match state.session_store(&jar) {
        Some((id, store)) => {
            let path = state.manager.sign_out(&store).await;
            state.registry.remove(&id);
            path
        }
        None => state.login_path().to_string(),
    };

    (jar.remove(state.removal_cookie()), Redirect::to(&path))
}

async fn forgot_password(
    State(state): State<AppState>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.manager.forgot_password(&request.identifier).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "code_sent" }))))
}

async fn reset_password(
    State(state): State<AppState>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .manager
        .confirm_forgot_password(
            &request.identifier,
            &request.code,
            &request.new_secret,
            &request.confirm_secret,
        )
        .await?;
    Ok(Json(json!({ "status": "reset" })))
}

async fn change_password(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    let (id, store) = state
        .session_store(&jar)
        .ok_or_else(|| ApiError::SignIn(state.login_path().to_string()))?;

    state
        .manager
        .change_password(
            &store,
            &request.current_secret,
            &request.new_secret,
            &request.confirm_secret,
        )
        .await
        .map_err(|err| state.reject(&id, err))?;
    Ok(Json(json!({ "status": "changed" })))
}

async fn current_session(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<SessionView>, ApiError> {
    let admitted = authorize(&state, &jar).await?;
    Ok(Json(SessionView::from(&admitted.session)))
}

async fn read_profile(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<HashMap<String, String>>, ApiError> {
    let admitted = authorize(&state, &jar).await?;
    state
        .manager
        .read_profile(&admitted.store)
        .await
        .map(Json)
        .map_err(|err| state.reject(&admitted.id, err))
}

/// Update account attributes; the returned session already reflects them.
async fn update_profile(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(attributes): Json<HashMap<String, String>>,
) -> Result<Json<SessionView>, ApiError> {
    let admitted = authorize(&state, &jar).await?;
    let session = state
        .manager
        .update_attributes_and_refresh(&admitted.store, &attributes)
        .await
        .map_err(|err| state.reject(&admitted.id, err))?;
    info!(subject_id = %session.subject_id(), "profile updated");
    Ok(Json(SessionView::from(&session)))
}

async fn agency(State(state): State<AppState>, jar: CookieJar) -> Result<Json<Value>, ApiError> {
    let admitted = authorize(&state, &jar).await?;
    let tenant = tenant_of(&state, &admitted.session)?;
    bff_get(&state, &admitted, &format!("agencies/{tenant}")).await
}

async fn inspection(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<Value>, ApiError> {
    let admitted = authorize(&state, &jar).await?;
    let tenant = tenant_of(&state, &admitted.session)?;
    bff_get(&state, &admitted, &format!("agencies/{tenant}/inspections")).await
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// A request whose session passed the guard.
struct Admitted {
    id: SessionId,
    store: Arc<TokenStore>,
    session: Session,
}

/// Admit the request's session or send the user to sign in. A session the
/// guard turns away is dropped from the registry.
async fn authorize(state: &AppState, jar: &CookieJar) -> Result<Admitted, ApiError> {
    let Some((id, store)) = state.session_store(jar) else {
        return Err(ApiError::SignIn(state.login_path().to_string()));
    };

    match state.manager.current_session(&store).await {
        Access::Allowed(session) => Ok(Admitted { id, store, session }),
        Access::Redirect(path) => {
            state.registry.remove(&id);
            Err(ApiError::SignIn(path))
        }
    }
}

fn tenant_of(state: &AppState, session: &Session) -> Result<String, ApiError> {
    match state.manager.guard().require_tenant_binding(session) {
        TenantAccess::Allowed(bound) => Ok(bound.tenant),
        TenantAccess::Forbidden => Err(AuthError::Forbidden.into()),
    }
}

async fn bff_get(
    state: &AppState,
    admitted: &Admitted,
    path: &str,
) -> Result<Json<Value>, ApiError> {
    match state
        .bff
        .get_json(path, &admitted.store, state.manager.orchestrator())
        .await
    {
        Ok(value) => Ok(Json(value)),
        Err(BffError::Auth(err)) => Err(state.reject(&admitted.id, err)),
        Err(err) => Err(ApiError::from_bff(err, state.login_path())),
    }
}
