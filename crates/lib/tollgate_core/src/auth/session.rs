//! Session facade: login, registration, logout, refresh, and the
//! "is it time to refresh" decision.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::AuthError;
use super::config::AuthConfig;
use super::coordinator::{LogReplay, RefreshCoordinator, ReplayHook, RevokeSessionOnReplay};
use super::jwt::TokenCodec;
use super::ledger::UsedTokenLedger;
use super::password::{hash_password, verify_principal_password};
use super::single_flight::{RefreshSingleFlight, SingleFlightSettings};
use super::store::CredentialStore;
use crate::coordination::CoordinationStore;
use crate::models::auth::{
    ADMIN_ROLE, AccessClaims, NewPrincipal, Principal, PrincipalSummary, TokenPair, USER_ROLE,
};

/// Minimum password length accepted at registration.
const MIN_PASSWORD_LEN: usize = 8;

/// Result of a successful login or registration.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub tokens: TokenPair,
    pub principal: PrincipalSummary,
}

pub struct SessionService {
    store: Arc<dyn CredentialStore>,
    codec: Arc<TokenCodec>,
    refresher: Arc<RefreshSingleFlight>,
    ledger: Arc<UsedTokenLedger>,
    /// Serializes the first-principal check with the insert. Only covers
    /// this process: replicas registering the very first principal at the
    /// same instant can still both see an empty store.
    registration: Mutex<()>,
    early_refresh_window: Duration,
    jitter_max: Duration,
}

impl SessionService {
    /// Wire the ledger, coordinator and single-flight layer from `config`.
    ///
    /// With `substrate: None` the distributed layer is off and the ledger is
    /// process-local.
    pub fn assemble(
        config: &AuthConfig,
        codec: Arc<TokenCodec>,
        store: Arc<dyn CredentialStore>,
        substrate: Option<Arc<dyn CoordinationStore>>,
    ) -> Self {
        let ledger = Arc::new(match &substrate {
            Some(s) => UsedTokenLedger::shared(
                config.used_token_grace,
                Arc::clone(s),
                config.coordination_timeout,
            ),
            None => UsedTokenLedger::local(config.used_token_grace),
        });
        let replay_hook: Arc<dyn ReplayHook> = if config.revoke_on_replay {
            Arc::new(RevokeSessionOnReplay::new(Arc::clone(&store)))
        } else {
            Arc::new(LogReplay)
        };
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&codec),
            Arc::clone(&store),
            Arc::clone(&ledger),
            replay_hook,
            config.cas_retries,
        ));
        let refresher = RefreshSingleFlight::new(
            coordinator,
            substrate,
            SingleFlightSettings::from(config),
        );

        Self {
            store,
            codec,
            refresher,
            ledger,
            registration: Mutex::new(()),
            early_refresh_window: config.early_refresh_window,
            jitter_max: config.jitter_max,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Evict expired used-token records every `every`. Call once from
    /// inside the runtime.
    pub fn spawn_ledger_cleanup(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        self.ledger.spawn_cleanup_task(every)
    }

    pub fn is_distributed(&self) -> bool {
        self.refresher.is_distributed()
    }

    /// Authenticate by username or email. Every failure is
    /// [`AuthError::InvalidCredentials`].
    pub async fn login(&self, identifier: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let principal = self
            .store
            .find_by_identifier(identifier.trim())
            .await?
            .filter(|p| p.is_active);

        if !verify_principal_password(principal.as_ref(), password) {
            debug!("login rejected");
            return Err(AuthError::InvalidCredentials);
        }
        let Some(principal) = principal else {
            return Err(AuthError::InvalidCredentials);
        };

        let outcome = self.open_session(&principal).await?;
        info!(principal_id = %principal.id, "login succeeded");
        Ok(outcome)
    }

    /// Create a principal and open a session for it. The first principal
    /// ever registered becomes an admin.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<LoginOutcome, AuthError> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() {
            return Err(AuthError::Validation("Username is required".into()));
        }
        if username.contains('@') {
            return Err(AuthError::Validation(
                "Username must not contain '@'".into(),
            ));
        }
        if !email.contains('@') {
            return Err(AuthError::Validation("Email address is invalid".into()));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::Validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let password_hash = hash_password(password)?;

        let _registering = self.registration.lock().await;
        let role = if self.store.principal_count().await? == 0 {
            ADMIN_ROLE
        } else {
            USER_ROLE
        };

        let principal = self
            .store
            .create_principal(NewPrincipal {
                username: username.to_string(),
                email: email.to_string(),
                password_hash,
                role: role.to_string(),
            })
            .await?;
        info!(principal_id = %principal.id, role, "principal registered");

        self.open_session(&principal).await
    }

    /// Exchange a refresh token for a new pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        self.refresher.refresh(refresh_token).await
    }

    /// Clear the principal's current refresh token. Idempotent.
    pub async fn logout(&self, principal_id: &str) -> Result<(), AuthError> {
        self.store.set_refresh_token(principal_id, None).await?;
        info!(principal_id, "logged out");
        Ok(())
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.codec.verify_access(token).map_err(AuthError::from)
    }

    /// Whether an access token for `principal_id` expiring at
    /// `access_expires_at` should be refreshed now.
    pub fn needs_refresh(
        &self,
        access_expires_at: i64,
        principal_id: &str,
        now: DateTime<Utc>,
    ) -> bool {
        needs_refresh(
            access_expires_at,
            now,
            self.early_refresh_window,
            jitter_for(principal_id, self.jitter_max),
        )
    }

    async fn open_session(&self, principal: &Principal) -> Result<LoginOutcome, AuthError> {
        let access = self.codec.issue_access(principal)?;
        let refresh = self.codec.issue_refresh(&principal.id)?;
        self.store
            .set_refresh_token(&principal.id, Some(&refresh))
            .await?;

        Ok(LoginOutcome {
            tokens: TokenPair {
                access_token: access.token,
                refresh_token: refresh,
                access_expires_at: access.claims.exp,
            },
            principal: principal.summary(Utc::now()),
        })
    }
}

/// True once `now` is within `early_window + jitter` of the expiry.
pub fn needs_refresh(
    access_expires_at: i64,
    now: DateTime<Utc>,
    early_window: Duration,
    jitter: Duration,
) -> bool {
    let lead_ms = (early_window + jitter).as_millis() as i64;
    now.timestamp_millis() >= access_expires_at * 1000 - lead_ms
}

/// Stable per-principal jitter in `[0, max]`, derived from the id so
/// sessions opened together do not all refresh together.
pub fn jitter_for(principal_id: &str, max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let digest = Sha256::digest(principal_id.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    Duration::from_millis(u64::from_be_bytes(head) % (max_ms + 1))
}
