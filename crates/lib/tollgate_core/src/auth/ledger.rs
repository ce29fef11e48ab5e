//! Used-token ledger: refresh tokens rotated within the last few seconds.
//!
//! Each record maps a just-consumed refresh token to the access token issued
//! when it was rotated. Records expire passively after the grace window and
//! are never updated.
//!
//! Records always land in a process-local map. When a shared substrate is
//! configured they are written there too, so replicas see each other's
//! rotations; a substrate failure falls back to the local map.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::token_fingerprint;
use crate::coordination::{CoordinationStore, MemoryCoordinationStore, bounded};

const KEY_PREFIX: &str = "used_rt:";

/// What the ledger remembers about a rotated refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedTokenRecord {
    pub principal_id: String,
    pub access_token: String,
    pub access_expires_at: i64,
}

pub struct UsedTokenLedger {
    local: Arc<MemoryCoordinationStore>,
    shared: Option<Arc<dyn CoordinationStore>>,
    grace: Duration,
    call_timeout: Duration,
}

impl UsedTokenLedger {
    /// Process-local ledger.
    pub fn local(grace: Duration) -> Self {
        Self {
            local: Arc::new(MemoryCoordinationStore::new()),
            shared: None,
            grace,
            call_timeout: Duration::from_millis(500),
        }
    }

    /// Ledger mirrored into a shared substrate.
    pub fn shared(
        grace: Duration,
        substrate: Arc<dyn CoordinationStore>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            local: Arc::new(MemoryCoordinationStore::new()),
            shared: Some(substrate),
            grace,
            call_timeout,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Periodically evict expired records from the local map.
    pub fn spawn_cleanup_task(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        self.local.spawn_cleanup_task(every)
    }

    fn key(old_refresh_token: &str) -> String {
        format!("{KEY_PREFIX}{}", token_fingerprint(old_refresh_token))
    }

    /// Remember that `old_refresh_token` was rotated and which access token
    /// that rotation produced.
    pub async fn record(&self, old_refresh_token: &str, record: &UsedTokenRecord) {
        let key = Self::key(old_refresh_token);
        let payload = match serde_json::to_string(record) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to encode used-token record");
                return;
            }
        };

        let _ = self.local.set_with_ttl(&key, &payload, self.grace).await;

        if let Some(shared) = &self.shared
            && let Err(e) = bounded(
                self.call_timeout,
                shared.set_with_ttl(&key, &payload, self.grace),
            )
            .await
        {
            warn!(
                principal_id = %record.principal_id,
                error = %e,
                "used-token ledger write degraded to local"
            );
        }
    }

    /// Find a record for `old_refresh_token`. `None` means it was never
    /// rotated or the grace window has elapsed.
    pub async fn lookup(&self, old_refresh_token: &str) -> Option<UsedTokenRecord> {
        let key = Self::key(old_refresh_token);

        if let Some(shared) = &self.shared {
            match bounded(self.call_timeout, shared.get(&key)).await {
                Ok(Some(raw)) => {
                    if let Some(record) = decode(&raw) {
                        return Some(record);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "used-token ledger read degraded to local"),
            }
        }

        self.local
            .get(&key)
            .await
            .ok()
            .flatten()
            .and_then(|raw| decode(&raw))
    }
}

fn decode(raw: &str) -> Option<UsedTokenRecord> {
    serde_json::from_str(raw)
        .inspect_err(|e| warn!(error = %e, "discarding undecodable used-token record"))
        .ok()
}
