//! HTTP surface of the estate dashboard.
//!
//! Sign-in and the forced new-secret challenge, account recovery, a session
//! cookie naming a server-side token store, and guarded reads proxied to the
//! dashboard management BFF.

pub mod bff;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use axum::Router;
use tower_http::trace::TraceLayer;

pub use bff::{BffClient, BffError};
pub use config::{Config, LogFormat, ProviderKind};
pub use error::{ApiError, ErrorBody};
pub use state::{AppState, CookieSettings};

/// The full application router with request tracing.
pub fn app(state: AppState) -> Router {
    routes::router(state).layer(TraceLayer::new_for_http())
}
