//! Cognito user pool implementation of the credential exchange.
//!
//! Talks to the provider's JSON-over-HTTP API (`application/x-amz-json-1.1`)
//! for password sign-in, the new-password challenge, refresh-token grants,
//! attribute reads and updates, and password recovery. Provider error codes
//! are mapped onto `RejectReason`; anything unrecognised is transient.

pub mod client;
pub mod config;
pub mod error;
pub mod provider;
pub mod types;


pub use client::CognitoClient;
pub use config::{CognitoConfig, DEFAULT_REGION, region_from_issuer};
pub use error::{CognitoError, CognitoResult, Operation};
pub use provider::CognitoIdentityProvider;
