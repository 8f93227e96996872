//! Route guarding for protected pages.

use chrono::{DateTime, Utc};
use estate_auth_core::{AuthError, Session};
use tracing::{debug, warn};

use crate::refresh::RefreshOrchestrator;
use crate::store::TokenStore;

pub const DEFAULT_LOGIN_PATH: &str = "/login";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Allowed(Session),
    /// Send the user to this path to sign in again.
    Redirect(String),
}

/// A session known to carry a tenant binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantSession {
    pub session: Session,
    pub tenant: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantAccess {
    Allowed(TenantSession),
    Forbidden,
}

#[derive(Clone)]
pub struct RouteGuard {
    orchestrator: RefreshOrchestrator,
    login_path: String,
}

impl RouteGuard {
    pub fn new(orchestrator: RefreshOrchestrator, login_path: impl Into<String>) -> Self {
        Self {
            orchestrator,
            login_path: login_path.into(),
        }
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    pub async fn authorize(&self, store: &TokenStore) -> Access {
        self.authorize_at(store, Utc::now()).await
    }

    /// Admit the stored session, refreshing it first when it is stale.
    ///
    /// A transient refresh failure still admits a session that has not yet
    /// expired. A rejected refresh clears the store.
    pub async fn authorize_at(&self, store: &TokenStore, now: DateTime<Utc>) -> Access {
        let Some(session) = store.get().await else {
            debug!("no session, redirecting to sign-in");
            return self.redirect();
        };

        match self.orchestrator.ensure_fresh_at(&session, now).await {
            Ok(fresh) => {
                if fresh != session && !store.update(fresh.clone()).await {
                    // Signed out while the refresh was in flight.
                    return self.redirect();
                }
                Access::Allowed(fresh)
            }
            Err(AuthError::Transient(cause)) if !session.is_expired_at(now) => {
                warn!(subject_id = %session.subject_id(), cause = %cause, "refresh failed, serving current session");
                Access::Allowed(session)
            }
            Err(AuthError::SessionExpired) => {
                store.clear().await;
                self.redirect()
            }
            Err(err) => {
                warn!(subject_id = %session.subject_id(), error = %err, "session could not be refreshed");
                self.redirect()
            }
        }
    }

    pub fn require_tenant_binding(&self, session: &Session) -> TenantAccess {
        require_tenant_binding(session)
    }

    fn redirect(&self) -> Access {
        Access::Redirect(self.login_path.clone())
    }
}

/// Admit only sessions bound to a tenant.
pub fn require_tenant_binding(session: &Session) -> TenantAccess {
    match session.claims.tenant_binding.as_deref() {
        Some(tenant) if !tenant.is_empty() => TenantAccess::Allowed(TenantSession {
            session: session.clone(),
            tenant: tenant.to_string(),
        }),
        _ => {
            debug!(subject_id = %session.subject_id(), "session has no tenant binding");
            TenantAccess::Forbidden
        }
    }
}
