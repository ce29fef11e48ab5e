//! Password hashing via bcrypt.

use std::sync::LazyLock;

use super::AuthError;
use crate::models::auth::Principal;

/// bcrypt cost factor.
const BCRYPT_COST: u32 = 10;

/// Hash verified against when the identifier matched nobody, so a miss
/// costs the same as a wrong password.
static DECOY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| bcrypt::hash("tollgate-decoy-password", BCRYPT_COST).ok());

/// Hash a password with bcrypt (cost 10).
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    bcrypt::hash(password, BCRYPT_COST)
        .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
}

/// Verify a password against a bcrypt hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    bcrypt::verify(password, hash).map_err(|e| AuthError::Internal(format!("bcrypt verify: {e}")))
}

/// Verify a login attempt against a principal, or against a decoy hash when
/// the lookup found nobody. Always `false` for the decoy.
pub fn verify_principal_password(principal: Option<&Principal>, attempt: &str) -> bool {
    match principal {
        Some(p) => verify_password(attempt, &p.password_hash).unwrap_or(false),
        None => {
            if let Some(decoy) = DECOY_HASH.as_deref() {
                let _ = bcrypt::verify(attempt, decoy);
            }
            false
        }
    }
}
