//! Client for the dashboard management BFF.
//!
//! Every request carries the session's ID token as a bearer. A `401` is
//! answered with one forced refresh and one retry; if that fails the session
//! is over.

use std::time::Duration;

use estate_auth_core::{AuthError, Session};
use estate_identity_session::{RefreshOrchestrator, TokenStore};
use reqwest::{StatusCode, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BffConfig;

#[derive(Debug, Error)]
pub enum BffError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("BFF request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("BFF responded with status {0}")]
    Status(StatusCode),

    #[error("Invalid BFF URL: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Clone)]
pub struct BffClient {
    http: reqwest::Client,
    base_url: Url,
}

impl BffClient {
    pub fn new(config: &BffConfig) -> Result<Self, BffError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url(&config.base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// GET `path` (relative to the base URL) on behalf of the session in `store`.
    pub async fn get_json(
        &self,
        path: &str,
        store: &TokenStore,
        orchestrator: &RefreshOrchestrator,
    ) -> Result<Value, BffError> {
        let url = self.base_url.join(path.trim_start_matches('/'))?;

        let session = orchestrator
            .ensure_fresh_in(store)
            .await?
            .ok_or(AuthError::SessionExpired)?;

        let response = self.send(&url, &session).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return read_json(response).await;
        }

        warn!(subject_id = %session.subject_id(), path, "BFF rejected the ID token, refreshing");
        let refreshed = orchestrator
            .force_refresh_in(store)
            .await?
            .ok_or(AuthError::SessionExpired)?;

        let response = self.send(&url, &refreshed).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(subject_id = %refreshed.subject_id(), path, "BFF rejected the refreshed ID token");
            store.clear().await;
            return Err(AuthError::SessionExpired.into());
        }

        read_json(response).await
    }

    async fn send(&self, url: &Url, session: &Session) -> Result<reqwest::Response, BffError> {
        debug!(subject_id = %session.subject_id(), %url, "BFF request");
        Ok(self
            .http
            .get(url.clone())
            .bearer_auth(session.bearer_token())
            .send()
            .await?)
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, BffError> {
    let status = response.status();
    if !status.is_success() {
        return Err(BffError::Status(status));
    }
    if status == StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }
    Ok(response.json().await?)
}

/// Parse the base URL, making sure it ends in `/` so that joins append.
fn base_url(raw: &str) -> Result<Url, url::ParseError> {
    if raw.ends_with('/') {
        Url::parse(raw)
    } else {
        Url::parse(&format!("{raw}/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_keeps_prefix() {
        let url = base_url("https://bff.example.com/api").unwrap();
        assert_eq!(
            url.join("agencies/agency-1").unwrap().as_str(),
            "https://bff.example.com/api/agencies/agency-1"
        );
    }
}
