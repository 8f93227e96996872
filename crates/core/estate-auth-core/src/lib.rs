//! Core identity traits and types for the estate dashboard.
//!
//! This crate defines the vocabulary shared by every identity provider and by
//! the session layer:
//! - `Credential`, `ChallengeContext`, `TokenTriple`, `SessionClaims` and `Session`
//! - the `CredentialExchange` and `AccountMaintenance` traits implemented by providers
//! - the `AuthError` taxonomy and the provider-facing `RejectReason`
//! - unverified claim decoding and password policy evaluation

mod claims;
mod error;
mod exchange;
mod policy;
mod types;

pub use claims::{ClaimMapping, DecodeError, decode_claims, decode_expiry};
pub use error::{AuthError, AuthResult, RejectReason};
pub use exchange::{AccountMaintenance, CredentialExchange, Outcome};
pub use policy::{PasswordPolicy, PolicyRule, PolicyViolation};
pub use types::{ChallengeContext, ChallengeKind, Credential, Session, SessionClaims, TokenTriple};
