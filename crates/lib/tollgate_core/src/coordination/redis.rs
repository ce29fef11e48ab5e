//! Redis coordination store with connection pooling and lease scripts.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Script};
use tracing::{info, warn};

use super::{CoordinationError, CoordinationStore};

/// Namespace prefix applied to every key.
const KEY_PREFIX: &str = "tollgate:";

const COMPARE_AND_DELETE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

const COMPARE_AND_PEXPIRE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
";

/// Connection settings for [`RedisCoordinationStore::connect`].
#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub url: String,
    pub connection_timeout: Duration,
    pub response_timeout: Duration,
    /// Attempts for the initial connection before giving up.
    pub initial_attempts: u32,
    pub initial_retry_delay: Duration,
}

impl RedisSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_timeout: Duration::from_secs(2),
            response_timeout: Duration::from_millis(500),
            initial_attempts: 3,
            initial_retry_delay: Duration::from_millis(200),
        }
    }
}

/// Redis-backed store.
///
/// Uses Redis `ConnectionManager` for automatic reconnection. Cloning is
/// cheap and shares the underlying connection.
#[derive(Clone)]
pub struct RedisCoordinationStore {
    manager: ConnectionManager,
    compare_and_delete: Script,
    compare_and_pexpire: Script,
}

impl RedisCoordinationStore {
    /// Connect with exponential backoff on the initial attempt.
    pub async fn connect(settings: &RedisSettings) -> Result<Self, CoordinationError> {
        info!(
            url = %settings.url,
            attempts = settings.initial_attempts,
            "connecting to Redis coordination store"
        );
        let client = redis::Client::open(settings.url.as_str())
            .map_err(|e| CoordinationError::Unavailable(format!("redis client: {e}")))?;

        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(settings.connection_timeout)
            .set_response_timeout(settings.response_timeout);

        let attempts = settings.initial_attempts.max(1);
        let mut delay = settings.initial_retry_delay;
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=attempts {
            match ConnectionManager::new_with_config(client.clone(), manager_config.clone()).await
            {
                Ok(manager) => {
                    info!(attempt, "connected to Redis coordination store");
                    return Ok(Self {
                        manager,
                        compare_and_delete: Script::new(COMPARE_AND_DELETE),
                        compare_and_pexpire: Script::new(COMPARE_AND_PEXPIRE),
                    });
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < attempts {
                        warn!(
                            attempt,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %e,
                            "Redis connection attempt failed"
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(CoordinationError::Unavailable(format!(
            "redis connect after {attempts} attempts: {last_error}"
        )))
    }

    fn key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }
}

fn unavailable(e: redis::RedisError) -> CoordinationError {
    CoordinationError::Unavailable(e.to_string())
}

fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        let mut conn = self.manager.clone();
        conn.get::<_, Option<String>>(Self::key(key))
            .await
            .map_err(unavailable)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CoordinationError> {
        let mut conn = self.manager.clone();
        conn.pset_ex::<_, _, ()>(Self::key(key), value, millis(ttl))
            .await
            .map_err(unavailable)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinationError> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(reply.is_some())
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinationError> {
        let mut conn = self.manager.clone();
        let renewed: i64 = self
            .compare_and_pexpire
            .key(Self::key(key))
            .arg(expected)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(renewed == 1)
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> Result<bool, CoordinationError> {
        let mut conn = self.manager.clone();
        let deleted: i64 = self
            .compare_and_delete
            .key(Self::key(key))
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(deleted == 1)
    }
}
