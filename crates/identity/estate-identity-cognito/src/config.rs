//! Cognito app client configuration.

use estate_auth_core::PasswordPolicy;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CognitoError, CognitoResult};

pub const DEFAULT_REGION: &str = "eu-central-1";

/// Settings for one Cognito user pool app client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitoConfig {
    #[serde(default = "default_region")]
    pub region: String,

    pub client_id: String,

    /// Empty for app clients without a secret; `SECRET_HASH` is then omitted.
    #[serde(default)]
    pub client_secret: String,

    /// Overrides the regional endpoint, e.g. for a local emulator.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,

    /// Pool policy, used to fill in limits the provider's messages leave out.
    #[serde(default)]
    pub policy: PasswordPolicy,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_http_timeout() -> u64 {
    30
}

impl CognitoConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            region: default_region(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            endpoint: None,
            http_timeout_seconds: default_http_timeout(),
            policy: PasswordPolicy::default(),
        }
    }

    /// Take the region from a user pool issuer URL, keeping the default when
    /// the issuer does not name one.
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        if let Some(region) = region_from_issuer(issuer) {
            self.region = region;
        }
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.http_timeout_seconds = seconds;
        self
    }

    pub fn with_policy(mut self, policy: PasswordPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://cognito-idp.{}.amazonaws.com/", self.region),
        }
    }

    pub fn validate(&self) -> CognitoResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(CognitoError::Config("client_id must be set".to_string()));
        }
        if self.region.trim().is_empty() {
            return Err(CognitoError::Config("region must be set".to_string()));
        }
        if self.http_timeout_seconds == 0 {
            return Err(CognitoError::Config(
                "http_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        Url::parse(&self.endpoint_url())?;
        Ok(())
    }
}

/// Extract the region from `https://cognito-idp.{region}.amazonaws.com/{pool}`.
pub fn region_from_issuer(issuer: &str) -> Option<String> {
    let url = Url::parse(issuer).ok()?;
    let region = url
        .host_str()?
        .strip_prefix("cognito-idp.")?
        .strip_suffix(".amazonaws.com")?;

    if region.is_empty() || region.contains('.') {
        return None;
    }
    Some(region.to_string())
}
