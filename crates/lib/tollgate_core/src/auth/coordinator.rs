//! Refresh coordinator: decides whether a presented refresh token is rotated,
//! answered from a recent rotation, or rejected.
//!
//! The stored pointer is authoritative. The ledger only answers "was this
//! exact token legitimately consumed a moment ago".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::jwt::TokenCodec;
use super::ledger::{UsedTokenLedger, UsedTokenRecord};
use super::store::CredentialStore;
use super::{AuthError, token_fingerprint};
use crate::models::auth::TokenPair;

/// Ledger re-checks before declaring a token stale. Covers the gap between
/// a concurrent winner's compare-and-swap and its ledger write.
const LEDGER_SETTLE_POLLS: u32 = 5;
const LEDGER_SETTLE_INTERVAL: Duration = Duration::from_millis(10);

/// Called when a validly signed refresh token is neither current nor
/// recently rotated: a replay, a stolen token, or a superseded session.
#[async_trait]
pub trait ReplayHook: Send + Sync {
    async fn on_replay(&self, principal_id: &str, fingerprint: &str);
}

/// Logs the replay and does nothing else.
pub struct LogReplay;

#[async_trait]
impl ReplayHook for LogReplay {
    async fn on_replay(&self, principal_id: &str, fingerprint: &str) {
        warn!(
            principal_id,
            token = short(fingerprint),
            "stale refresh token presented"
        );
    }
}

/// Clears the principal's current refresh token, ending every session that
/// descends from it.
pub struct RevokeSessionOnReplay {
    store: Arc<dyn CredentialStore>,
}

impl RevokeSessionOnReplay {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ReplayHook for RevokeSessionOnReplay {
    async fn on_replay(&self, principal_id: &str, fingerprint: &str) {
        warn!(
            principal_id,
            token = short(fingerprint),
            "stale refresh token presented, revoking session"
        );
        if let Err(e) = self.store.set_refresh_token(principal_id, None).await {
            warn!(principal_id, error = %e, "failed to revoke session after replay");
        }
    }
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}

pub struct RefreshCoordinator {
    codec: Arc<TokenCodec>,
    store: Arc<dyn CredentialStore>,
    ledger: Arc<UsedTokenLedger>,
    replay_hook: Arc<dyn ReplayHook>,
    cas_retries: u32,
}

impl RefreshCoordinator {
    pub fn new(
        codec: Arc<TokenCodec>,
        store: Arc<dyn CredentialStore>,
        ledger: Arc<UsedTokenLedger>,
        replay_hook: Arc<dyn ReplayHook>,
        cas_retries: u32,
    ) -> Self {
        Self {
            codec,
            store,
            ledger,
            replay_hook,
            cas_retries,
        }
    }

    /// Run the rotation state machine for `presented`.
    ///
    /// Errors: [`AuthError::TokenExpired`] when the token's own expiry has
    /// passed (checked first, even if it is still the stored pointer);
    /// [`AuthError::TokenInvalid`] when it is malformed, unknown, or stale.
    pub async fn rotate(&self, presented: &str) -> Result<TokenPair, AuthError> {
        let claims = self.codec.verify_refresh(presented).map_err(|e| {
            debug!(reason = ?e, "refresh token failed verification");
            AuthError::from(e)
        })?;

        for attempt in 0..=self.cas_retries {
            match self.evaluate(&claims.sub, presented).await {
                Err(AuthError::RaceLost) => {
                    debug!(principal_id = %claims.sub, attempt, "lost rotation race, re-evaluating");
                }
                outcome => return outcome,
            }
        }

        warn!(principal_id = %claims.sub, "refresh rotation contended past retry budget");
        Err(AuthError::UpstreamUnavailable(
            "refresh contention, retry shortly".into(),
        ))
    }

    async fn evaluate(&self, principal_id: &str, presented: &str) -> Result<TokenPair, AuthError> {
        let principal = self
            .store
            .find_by_id(principal_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| AuthError::TokenInvalid("unknown principal".into()))?;

        let current = principal.refresh_token.as_deref();

        if current == Some(presented) {
            let access = self.codec.issue_access(&principal)?;
            let refresh = self.codec.issue_refresh(&principal.id)?;

            let swapped = self
                .store
                .compare_and_swap_refresh_token(&principal.id, presented, &refresh)
                .await?;
            if !swapped {
                return Err(AuthError::RaceLost);
            }

            self.ledger
                .record(
                    presented,
                    &UsedTokenRecord {
                        principal_id: principal.id.clone(),
                        access_token: access.token.clone(),
                        access_expires_at: access.claims.exp,
                    },
                )
                .await;

            info!(principal_id = %principal.id, "refresh token rotated");
            return Ok(TokenPair {
                access_token: access.token,
                refresh_token: refresh,
                access_expires_at: access.claims.exp,
            });
        }

        match self.settled_lookup(presented).await {
            Some(record) if record.principal_id == principal.id => match current {
                Some(current) => {
                    debug!(principal_id = %principal.id, "answering from recent rotation");
                    Ok(TokenPair {
                        access_token: record.access_token,
                        refresh_token: current.to_string(),
                        access_expires_at: record.access_expires_at,
                    })
                }
                None => Err(AuthError::TokenInvalid("session ended".into())),
            },
            _ => {
                self.replay_hook
                    .on_replay(&principal.id, &token_fingerprint(presented))
                    .await;
                Err(AuthError::TokenInvalid(
                    "refresh token is no longer current".into(),
                ))
            }
        }
    }

    async fn settled_lookup(&self, presented: &str) -> Option<UsedTokenRecord> {
        for poll in 0..=LEDGER_SETTLE_POLLS {
            if let Some(record) = self.ledger.lookup(presented).await {
                return Some(record);
            }
            if poll < LEDGER_SETTLE_POLLS {
                tokio::time::sleep(LEDGER_SETTLE_INTERVAL).await;
            }
        }
        None
    }
}
