//! HTTP client for the Cognito JSON API.

use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::{debug, error};

use crate::config::CognitoConfig;
use crate::error::{CognitoError, CognitoResult, Operation};
use crate::types::ErrorBody;

type HmacSha256 = Hmac<Sha256>;

const AMZ_JSON: &str = "application/x-amz-json-1.1";
const TARGET_PREFIX: &str = "AWSCognitoIdentityProviderService";

#[derive(Clone)]
pub struct CognitoClient {
    http_client: Client,
    endpoint: String,
    client_id: String,
    client_secret: String,
}

impl CognitoClient {
    pub fn new(config: &CognitoConfig) -> CognitoResult<Self> {
        config.validate()?;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint_url(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// `base64(HMAC-SHA256(client_secret, username + client_id))`, or `None`
    /// for app clients without a secret.
    pub fn secret_hash(&self, username: &str) -> Option<String> {
        if self.client_secret.is_empty() {
            return None;
        }

        let mut mac = HmacSha256::new_from_slice(self.client_secret.as_bytes()).ok()?;
        mac.update(username.as_bytes());
        mac.update(self.client_id.as_bytes());
        Some(STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Perform one API call.
    pub(crate) async fn call<Req, Resp>(
        &self,
        operation: Operation,
        request: &Req,
    ) -> CognitoResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(request)?;

        let response = self
            .http_client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, AMZ_JSON)
            .header(
                "X-Amz-Target",
                format!("{TARGET_PREFIX}.{}", operation.action()),
            )
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let err = match serde_json::from_slice::<ErrorBody>(&bytes) {
                Ok(body) if body.code().is_some() => CognitoError::Provider {
                    code: body.code().unwrap_or_default().to_string(),
                    message: body.message.clone().unwrap_or_default(),
                },
                _ => CognitoError::InvalidResponse(format!("HTTP {status}")),
            };
            debug!(%operation, %status, error = %err, "provider call failed");
            return Err(err);
        }

        let bytes: &[u8] = if bytes.is_empty() { b"{}" } else { &bytes };
        serde_json::from_slice(bytes).map_err(|e| {
            error!(%operation, error = %e, "unreadable provider response");
            CognitoError::InvalidResponse(e.to_string())
        })
    }
}
