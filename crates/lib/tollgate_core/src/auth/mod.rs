//! Authentication, token lifecycle and refresh coordination.
//!
//! Layered leaf to root: [`jwt`] (token codec), [`store`] (credential store
//! contract), [`ledger`] (recently rotated refresh tokens), [`coordinator`]
//! (the rotation state machine), [`single_flight`] (local + distributed
//! de-duplication around the coordinator), and [`session`] (login, logout,
//! refresh timing). [`authz`] holds the authorization oracle contract.

pub mod authz;
pub mod config;
pub mod coordinator;
pub mod jwt;
pub mod ledger;
pub mod password;
pub mod queries;
pub mod session;
pub mod single_flight;
pub mod store;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Authentication errors.
///
/// `Clone` so a single in-flight refresh can hand the same outcome to every
/// joined caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Login failed. Never says whether the identifier or the password was wrong.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Token signature is fine but its embedded expiry has passed.
    #[error("Token expired")]
    TokenExpired,

    /// Bad signature, malformed, replayed or otherwise unacceptable token.
    #[error("Invalid token: {0}")]
    TokenInvalid(String),

    /// Credential store or coordination substrate unreachable.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Lost a compare-and-swap to a concurrent rotation. Retried internally.
    #[error("Lost refresh race")]
    RaceLost,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AuthError::Validation("Username or email already registered".into())
            }
            _ => AuthError::UpstreamUnavailable(format!("credential store: {e}")),
        }
    }
}

/// Hex SHA-256 fingerprint of a token, safe for logs and cache keys.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{digest:x}")
}
