//! Session lifecycle for the estate dashboard.
//!
//! - `LoginFlow`: sign-in and forced-new-secret challenge state machine
//! - `TokenStore` / `SessionRegistry`: per-connection session storage
//! - `RefreshOrchestrator`: refresh with single-flight de-duplication per refresh token
//! - `RouteGuard`: admission of protected requests
//! - `SessionManager`: the above wired to one credential exchange

mod challenge;
mod guard;
mod refresh;
mod retry;
mod service;
mod store;

#[cfg(test)]
mod testing;

pub use challenge::{LoginFlow, LoginState, LoginStep};
pub use guard::{
    Access, DEFAULT_LOGIN_PATH, RouteGuard, TenantAccess, TenantSession, require_tenant_binding,
};
pub use refresh::{RefreshConfig, RefreshOrchestrator};
pub use retry::retry_transient_once;
pub use service::{SessionConfig, SessionManager};
pub use store::{SessionId, SessionRegistry, TokenStore};
