//! Coordination substrate: a small key/value surface with leases.
//!
//! Backs the distributed refresh lock, the cached refresh result, and the
//! shared used-token ledger. Redis in production, an in-process map for
//! single-node runs and tests.

pub mod memory;
pub mod redis;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryCoordinationStore;
pub use self::redis::RedisCoordinationStore;

/// Substrate failures. Never surfaced to end users.
#[derive(Debug, Clone, Error)]
pub enum CoordinationError {
    #[error("coordination substrate unavailable: {0}")]
    Unavailable(String),

    #[error("coordination call timed out after {0:?}")]
    Timeout(Duration),

    #[error("coordination payload encoding: {0}")]
    Encoding(String),
}

/// Key/value operations with TTLs and owner-checked leases.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CoordinationError>;

    /// Write `value`, replacing any existing value, expiring after `ttl`.
    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CoordinationError>;

    /// Write only if the key is absent. `true` when this call created it.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinationError>;

    /// Reset the TTL only if the key still holds `expected`.
    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinationError>;

    /// Delete only if the key still holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str)
    -> Result<bool, CoordinationError>;
}

/// Run a substrate call under a deadline.
pub async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, CoordinationError>>,
) -> Result<T, CoordinationError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CoordinationError::Timeout(limit)),
    }
}
