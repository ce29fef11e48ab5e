//! In-process coordination store with TTL-based expiration.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{CoordinationError, CoordinationStore};

/// A stored value with its expiry.
#[derive(Debug, Clone)]
struct Slot {
    value: String,
    expires_at: Instant,
}

impl Slot {
    fn new(value: &str, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// `DashMap`-backed store. Expired slots are treated as absent and evicted
/// lazily or via [`MemoryCoordinationStore::cleanup`].
#[derive(Debug, Default)]
pub struct MemoryCoordinationStore {
    slots: DashMap<String, Slot>,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evict expired entries.
    pub fn cleanup(&self) {
        self.slots.retain(|_, slot| slot.live());
    }

    /// Spawn a periodic cleanup task.
    pub fn spawn_cleanup_task(
        self: &std::sync::Arc<Self>,
        every: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let store = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                store.cleanup();
            }
        })
    }

    fn get_live(&self, key: &str) -> Option<String> {
        self.slots
            .get(key)
            .filter(|slot| slot.live())
            .map(|slot| slot.value.clone())
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        Ok(self.get_live(key))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CoordinationError> {
        self.slots.insert(key.to_string(), Slot::new(value, ttl));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinationError> {
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().live() {
                    Ok(false)
                } else {
                    entry.insert(Slot::new(value, ttl));
                    Ok(true)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Slot::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinationError> {
        match self.slots.get_mut(key) {
            Some(mut slot) if slot.live() && slot.value == expected => {
                slot.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> Result<bool, CoordinationError> {
        Ok(self
            .slots
            .remove_if(key, |_, slot| slot.live() && slot.value == expected)
            .is_some())
    }
}
