//! JWT token codec: issue and verify access and refresh tokens.
//!
//! Access and refresh tokens are signed with distinct HS256 secrets so one
//! can never be presented in place of the other.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;
use uuid::Uuid;

use super::AuthError;
use crate::models::auth::{AccessClaims, Principal, RefreshClaims};

/// Which secret a token is expected to be signed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Why a token failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    /// Signature valid, embedded expiry passed.
    Expired,
    /// Anything else: bad signature, wrong key, garbage.
    Malformed,
}

impl From<VerifyError> for AuthError {
    fn from(e: VerifyError) -> Self {
        match e {
            VerifyError::Expired => AuthError::TokenExpired,
            VerifyError::Malformed => AuthError::TokenInvalid("malformed token".into()),
        }
    }
}

/// A signed access token plus its expiry.
#[derive(Debug, Clone)]
pub struct IssuedAccess {
    pub token: String,
    pub claims: AccessClaims,
}

/// Stateless signer/verifier for both token kinds.
#[derive(Clone)]
pub struct TokenCodec {
    access_enc: EncodingKey,
    access_dec: DecodingKey,
    refresh_enc: EncodingKey,
    refresh_dec: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec. Fails if the two secrets are empty or identical.
    pub fn new(
        access_secret: &[u8],
        refresh_secret: &[u8],
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<Self, AuthError> {
        if access_secret.is_empty() || refresh_secret.is_empty() {
            return Err(AuthError::Internal("signing secrets must not be empty".into()));
        }
        if access_secret == refresh_secret {
            return Err(AuthError::Internal(
                "access and refresh signing secrets must differ".into(),
            ));
        }
        Ok(Self {
            access_enc: EncodingKey::from_secret(access_secret),
            access_dec: DecodingKey::from_secret(access_secret),
            refresh_enc: EncodingKey::from_secret(refresh_secret),
            refresh_dec: DecodingKey::from_secret(refresh_secret),
            access_ttl,
            refresh_ttl,
        })
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Sign an access token carrying id, role and effective plan.
    pub fn issue_access(&self, principal: &Principal) -> Result<IssuedAccess, AuthError> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: principal.id.clone(),
            role: principal.role.clone(),
            plan: principal.effective_plan(now),
            exp: expiry(now, self.access_ttl),
            iat: now.timestamp(),
        };
        let token = sign(&claims, &self.access_enc)?;
        Ok(IssuedAccess { token, claims })
    }

    /// Sign a refresh token carrying only the principal id.
    pub fn issue_refresh(&self, principal_id: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        self.issue_refresh_until(principal_id, now, expiry(now, self.refresh_ttl))
    }

    pub(crate) fn issue_refresh_until(
        &self,
        principal_id: &str,
        now: DateTime<Utc>,
        exp: i64,
    ) -> Result<String, AuthError> {
        let claims = RefreshClaims {
            sub: principal_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            exp,
            iat: now.timestamp(),
        };
        sign(&claims, &self.refresh_enc)
    }

    /// Verify an access token's signature and expiry.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, VerifyError> {
        verify(token, &self.access_dec)
    }

    /// Verify a refresh token's signature and expiry.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, VerifyError> {
        verify(token, &self.refresh_dec)
    }

    /// Verify a token of either kind, returning only the subject.
    pub fn verify_subject(&self, token: &str, kind: TokenKind) -> Result<String, VerifyError> {
        match kind {
            TokenKind::Access => self.verify_access(token).map(|c| c.sub),
            TokenKind::Refresh => self.verify_refresh(token).map(|c| c.sub),
        }
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> i64 {
    now.timestamp() + ttl.as_secs() as i64
}

fn sign<T: Serialize>(claims: &T, key: &EncodingKey) -> Result<String, AuthError> {
    encode(&Header::default(), claims, key)
        .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
}

fn verify<T: DeserializeOwned>(token: &str, key: &DecodingKey) -> Result<T, VerifyError> {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    // Expiry is exact; callers refresh early instead of relying on skew.
    validation.leeway = 0;
    decode::<T>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => VerifyError::Expired,
            _ => VerifyError::Malformed,
        })
}

/// Resolve a signing secret: env var `var` → persisted file `file_name`.
///
/// A fresh random secret is generated and persisted when neither exists.
pub fn resolve_secret(var: &str, file_name: &str) -> String {
    if let Ok(secret) = std::env::var(var)
        && !secret.is_empty()
    {
        return secret;
    }
    let secret_path = secret_path(file_name);
    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = secret_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(&secret_path, &secret);
    info!(path = %secret_path.display(), "generated new signing secret");
    secret
}

/// Path to a persisted secret file.
fn secret_path(file_name: &str) -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tollgate")
        .join(file_name)
}
