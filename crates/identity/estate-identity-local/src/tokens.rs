//! JWT minting for the in-process provider.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::LocalProviderConfig;
use crate::user::LocalUser;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AccessClaims {
    pub sub: String,
    pub username: String,
    pub client_id: String,
    pub iss: String,
    pub token_use: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

pub(crate) struct TokenMinter {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    config: LocalProviderConfig,
}

impl TokenMinter {
    pub fn new(config: LocalProviderConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.signing_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.signing_secret.as_bytes()),
            config,
        }
    }

    pub fn access_token(
        &self,
        user: &LocalUser,
        now: DateTime<Utc>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = AccessClaims {
            sub: user.subject_id.clone(),
            username: user.identifier.clone(),
            client_id: self.config.audience.clone(),
            iss: self.config.issuer.clone(),
            token_use: "access".to_string(),
            exp: (now + self.config.token_ttl).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
    }

    /// ID token carrying the user's attributes under the configured claim names.
    pub fn id_token(
        &self,
        user: &LocalUser,
        now: DateTime<Utc>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let mapping = &self.config.claim_mapping;
        let mut claims = Map::new();

        claims.insert(
            mapping.subject.clone(),
            Value::String(user.subject_id.clone()),
        );
        for name in [&mapping.email, &mapping.display_name, &mapping.tenant_binding] {
            if let Some(value) = user.attributes.get(name.as_str()) {
                claims.insert(name.clone(), Value::String(value.clone()));
            }
        }
        if !user.groups.is_empty() {
            claims.insert(
                mapping.groups.clone(),
                Value::Array(user.groups.iter().cloned().map(Value::String).collect()),
            );
        }

        claims.insert("iss".to_string(), Value::from(self.config.issuer.clone()));
        claims.insert("aud".to_string(), Value::from(self.config.audience.clone()));
        claims.insert("token_use".to_string(), Value::from("id"));
        claims.insert("iat".to_string(), Value::from(now.timestamp()));
        claims.insert(
            "exp".to_string(),
            Value::from((now + self.config.token_ttl).timestamp()),
        );
        claims.insert("jti".to_string(), Value::from(Uuid::new_v4().to_string()));

        encode(
            &Header::new(Algorithm::HS256),
            &Value::Object(claims),
            &self.encoding_key,
        )
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.set_issuer(&[self.config.issuer.as_str()]);
        validation.leeway = 0;

        let data = decode::<AccessClaims>(token, &self.decoding_key, &validation)?;
        if data.claims.token_use != "access" {
            return Err(jsonwebtoken::errors::ErrorKind::InvalidToken.into());
        }

        Ok(data.claims)
    }
}

pub(crate) fn opaque_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}
