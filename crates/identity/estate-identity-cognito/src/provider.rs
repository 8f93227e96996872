//! `CredentialExchange` and `AccountMaintenance` over a Cognito user pool.

use std::collections::HashMap;

use async_trait::async_trait;
use estate_auth_core::{
    AccountMaintenance, ChallengeContext, ChallengeKind, Credential, CredentialExchange, Outcome,
    RejectReason, TokenTriple,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::client::CognitoClient;
use crate::config::CognitoConfig;
use crate::error::{CognitoError, CognitoResult, Operation};
use crate::types::{
    AccessTokenRequest, AttributeType, AuthResponse, AuthenticationResult, ChangePasswordRequest,
    ConfirmForgotPasswordRequest, ForgotPasswordRequest, GetUserResponse, InitiateAuthRequest,
    RespondToAuthChallengeRequest, UpdateUserAttributesRequest,
};

const NEW_PASSWORD_REQUIRED: &str = "NEW_PASSWORD_REQUIRED";

#[derive(Clone)]
pub struct CognitoIdentityProvider {
    client: CognitoClient,
    config: CognitoConfig,
}

impl CognitoIdentityProvider {
    pub fn new(config: CognitoConfig) -> CognitoResult<Self> {
        Ok(Self {
            client: CognitoClient::new(&config)?,
            config,
        })
    }

    pub fn config(&self) -> &CognitoConfig {
        &self.config
    }

    fn reject(&self, operation: Operation, err: CognitoError) -> RejectReason {
        let reason = err.reject_reason(operation, &self.config.policy);
        match &reason {
            RejectReason::Transient(_) => {
                warn!(%operation, error = %err, "identity provider call failed")
            }
            _ => debug!(%operation, %reason, "identity provider rejected call"),
        }
        reason
    }

    fn with_secret_hash(
        &self,
        mut parameters: HashMap<&'static str, String>,
        username: &str,
    ) -> HashMap<&'static str, String> {
        if let Some(hash) = self.client.secret_hash(username) {
            parameters.insert("SECRET_HASH", hash);
        }
        parameters
    }

    fn tokens(
        result: AuthenticationResult,
        previous_refresh_token: Option<&str>,
    ) -> Result<TokenTriple, RejectReason> {
        let id_token = result
            .id_token
            .ok_or_else(|| RejectReason::transient("authentication result without an ID token"))?;
        let refresh_token = result
            .refresh_token
            .or_else(|| previous_refresh_token.map(String::from))
            .ok_or_else(|| {
                RejectReason::transient("authentication result without a refresh token")
            })?;

        let mut tokens = TokenTriple::bearer(result.access_token, id_token, refresh_token);
        if let Some(token_type) = result.token_type {
            tokens.token_type = token_type;
        }
        Ok(tokens)
    }

    fn outcome(&self, operation: Operation, response: AuthResponse, identifier: &str) -> Outcome {
        if let Some(result) = response.authentication_result {
            return match Self::tokens(result, None) {
                Ok(tokens) => Outcome::Authenticated(tokens),
                Err(reason) => {
                    error!(%operation, %reason, "incomplete token set from identity provider");
                    Outcome::Rejected(reason)
                }
            };
        }

        match (response.challenge_name.as_deref(), response.session) {
            (Some(NEW_PASSWORD_REQUIRED), Some(session)) if operation == Operation::SignIn => {
                // The pool may know the user under a different name than the one typed.
                let username = response
                    .challenge_parameters
                    .get("USER_ID_FOR_SRP")
                    .cloned()
                    .unwrap_or_else(|| identifier.to_string());
                info!(%operation, "new secret required");
                Outcome::ChallengePending(ChallengeContext::new_secret_required(session, username))
            }
            (name, _) => {
                error!(%operation, challenge = ?name, "unsupported identity provider challenge");
                Outcome::Rejected(RejectReason::transient(format!(
                    "unsupported challenge {}",
                    name.unwrap_or("<none>")
                )))
            }
        }
    }
}

#[async_trait]
impl CredentialExchange for CognitoIdentityProvider {
    fn provider_id(&self) -> &str {
        "cognito"
    }

    async fn sign_in(&self, credential: &Credential) -> Outcome {
        let parameters = HashMap::from([
            ("USERNAME", credential.identifier().to_string()),
            ("PASSWORD", credential.secret().to_string()),
        ]);
        let request = InitiateAuthRequest {
            auth_flow: "USER_PASSWORD_AUTH",
            client_id: self.client.client_id(),
            auth_parameters: self.with_secret_hash(parameters, credential.identifier()),
        };

        match self
            .client
            .call::<_, AuthResponse>(Operation::SignIn, &request)
            .await
        {
            Ok(response) => self.outcome(Operation::SignIn, response, credential.identifier()),
            Err(err) => Outcome::Rejected(self.reject(Operation::SignIn, err)),
        }
    }

    async fn complete_challenge(&self, context: &ChallengeContext, new_secret: &str) -> Outcome {
        if context.kind != ChallengeKind::NewSecretRequired {
            return Outcome::Rejected(RejectReason::ChallengeExpired);
        }

        let responses = HashMap::from([
            ("USERNAME", context.identifier.clone()),
            ("NEW_PASSWORD", new_secret.to_string()),
        ]);
        let request = RespondToAuthChallengeRequest {
            challenge_name: NEW_PASSWORD_REQUIRED,
            client_id: self.client.client_id(),
            session: &context.continuation_token,
            challenge_responses: self.with_secret_hash(responses, &context.identifier),
        };

        match self
            .client
            .call::<_, AuthResponse>(Operation::CompleteChallenge, &request)
            .await
        {
            Ok(response) => self.outcome(Operation::CompleteChallenge, response, &context.identifier),
            Err(err) => Outcome::Rejected(self.reject(Operation::CompleteChallenge, err)),
        }
    }

    async fn refresh(
        &self,
        refresh_token: &str,
        identifier: &str,
    ) -> Result<TokenTriple, RejectReason> {
        let parameters = HashMap::from([("REFRESH_TOKEN", refresh_token.to_string())]);
        let request = InitiateAuthRequest {
            auth_flow: "REFRESH_TOKEN_AUTH",
            client_id: self.client.client_id(),
            auth_parameters: self.with_secret_hash(parameters, identifier),
        };

        let response = self
            .client
            .call::<_, AuthResponse>(Operation::Refresh, &request)
            .await
            .map_err(|err| self.reject(Operation::Refresh, err))?;

        let result = response
            .authentication_result
            .ok_or_else(|| RejectReason::transient("refresh response without tokens"))?;

        // The provider does not rotate refresh tokens unless configured to.
        Self::tokens(result, Some(refresh_token))
    }

    async fn read_attributes(
        &self,
        access_token: &str,
    ) -> Result<HashMap<String, String>, RejectReason> {
        let response = self
            .client
            .call::<_, GetUserResponse>(Operation::ReadAttributes, &AccessTokenRequest { access_token })
            .await
            .map_err(|err| self.reject(Operation::ReadAttributes, err))?;

        Ok(response
            .user_attributes
            .into_iter()
            .filter_map(|attribute| attribute.value.map(|value| (attribute.name, value)))
            .collect())
    }
}

#[async_trait]
impl AccountMaintenance for CognitoIdentityProvider {
    async fn forgot_password(&self, identifier: &str) -> Result<(), RejectReason> {
        let request = ForgotPasswordRequest {
            client_id: self.client.client_id(),
            username: identifier,
            secret_hash: self.client.secret_hash(identifier),
        };

        self.client
            .call::<_, Value>(Operation::ForgotPassword, &request)
            .await
            .map(|_| ())
            .map_err(|err| self.reject(Operation::ForgotPassword, err))
    }

    async fn confirm_forgot_password(
        &self,
        identifier: &str,
        code: &str,
        new_secret: &str,
    ) -> Result<(), RejectReason> {
        let request = ConfirmForgotPasswordRequest {
            client_id: self.client.client_id(),
            username: identifier,
            confirmation_code: code,
            password: new_secret,
            secret_hash: self.client.secret_hash(identifier),
        };

        self.client
            .call::<_, Value>(Operation::ConfirmForgotPassword, &request)
            .await
            .map(|_| ())
            .map_err(|err| self.reject(Operation::ConfirmForgotPassword, err))
    }

    async fn change_password(
        &self,
        access_token: &str,
        current_secret: &str,
        new_secret: &str,
    ) -> Result<(), RejectReason> {
        let request = ChangePasswordRequest {
            previous_password: current_secret,
            proposed_password: new_secret,
            access_token,
        };

        self.client
            .call::<_, Value>(Operation::ChangePassword, &request)
            .await
            .map(|_| ())
            .map_err(|err| self.reject(Operation::ChangePassword, err))
    }

    async fn update_attributes(
        &self,
        access_token: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), RejectReason> {
        let mut user_attributes: Vec<AttributeType> = attributes
            .iter()
            .map(|(name, value)| AttributeType {
                name: name.clone(),
                value: Some(value.clone()),
            })
            .collect();
        user_attributes.sort_by(|a, b| a.name.cmp(&b.name));

        let request = UpdateUserAttributesRequest {
            access_token,
            user_attributes,
        };

        self.client
            .call::<_, Value>(Operation::UpdateAttributes, &request)
            .await
            .map(|_| ())
            .map_err(|err| self.reject(Operation::UpdateAttributes, err))
    }
}
