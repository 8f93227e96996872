use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::Duration;
use estate_auth_core::AuthError;
use estate_identity_cognito::CognitoIdentityProvider;
use estate_identity_local::LocalIdentityProvider;
use estate_identity_session::{SessionId, SessionManager, SessionRegistry, TokenStore};
use tokio::task::JoinHandle;
use tracing::info;

use crate::bff::BffClient;
use crate::config::{Config, ProviderKind};
use crate::error::ApiError;

#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub name: String,
    pub secure: bool,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
    pub registry: SessionRegistry,
    pub bff: BffClient,
    pub cookies: CookieSettings,
}

impl AppState {
    pub fn new(manager: SessionManager, bff: BffClient, cookies: CookieSettings) -> Self {
        Self {
            manager,
            registry: SessionRegistry::new(),
            bff,
            cookies,
        }
    }

    /// Wire the configured identity provider, the session layer and the BFF client.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let session_config = config.session_config();

        let manager = match config.identity.provider {
            ProviderKind::Cognito => {
                let provider = Arc::new(
                    CognitoIdentityProvider::new(config.cognito_config())
                        .context("Failed to create Cognito provider")?,
                );
                SessionManager::new(provider.clone(), session_config).with_maintenance(provider)
            }
            ProviderKind::Local => {
                let provider = LocalIdentityProvider::new(config.local_config());
                for user in &config.identity.local.users {
                    provider
                        .add_user(user.to_new_user())
                        .await
                        .with_context(|| format!("Failed to seed user '{}'", user.identifier))?;
                }
                info!(
                    users = config.identity.local.users.len(),
                    "Using in-process identity provider"
                );
                SessionManager::new(Arc::new(provider.clone()), session_config)
                    .with_maintenance(Arc::new(provider))
            }
        };

        let bff = BffClient::new(&config.bff).context("Failed to create BFF client")?;

        Ok(Self::new(
            manager,
            bff,
            CookieSettings {
                name: config.session.cookie_name.clone(),
                secure: config.session.secure_cookies,
            },
        ))
    }

    pub fn login_path(&self) -> &str {
        &self.manager.config().login_path
    }

    /// The token store named by the request's session cookie.
    pub fn session_store(&self, jar: &CookieJar) -> Option<(SessionId, Arc<TokenStore>)> {
        let cookie = jar.get(&self.cookies.name)?;
        let id = SessionId::parse(cookie.value())?;
        self.registry.get(&id).map(|store| (id, store))
    }

    /// Register a freshly signed-in store under a new id and point the cookie
    /// at it. Any store the request's previous cookie named is dropped.
    pub fn establish(&self, jar: CookieJar, store: Arc<TokenStore>) -> CookieJar {
        if let Some((previous, _)) = self.session_store(&jar) {
            self.registry.remove(&previous);
        }
        let id = self.registry.insert(store);
        jar.add(self.session_cookie(&id))
    }

    /// Map a session error, evicting the store once the session is over.
    pub fn reject(&self, id: &SessionId, err: AuthError) -> ApiError {
        if err == AuthError::SessionExpired {
            self.registry.remove(id);
        }
        ApiError::from_auth(err, self.login_path())
    }

    /// Periodically drop empty and idle stores from the registry.
    pub fn spawn_sweeper(&self, idle_timeout: Duration, every: StdDuration) -> JoinHandle<()> {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                registry.sweep(idle_timeout).await;
            }
        })
    }

    pub fn session_cookie(&self, id: &SessionId) -> Cookie<'static> {
        Cookie::build((self.cookies.name.clone(), id.to_string()))
            .http_only(true)
            .secure(self.cookies.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .build()
    }

    pub fn removal_cookie(&self) -> Cookie<'static> {
        Cookie::build((self.cookies.name.clone(), "")).path("/").build()
    }
}
