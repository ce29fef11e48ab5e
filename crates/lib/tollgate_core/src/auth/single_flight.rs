//! Single-flight de-duplication around the refresh coordinator.
//!
//! Two layers, both purely latency/load optimizations:
//!
//! - **Local:** concurrent calls in this process for the same refresh token
//!   share one in-flight future.
//! - **Distributed:** before running, check a cached result for the token;
//!   otherwise race for a leased lock. The leader runs the coordinator,
//!   publishes the result and releases the lock with compare-and-delete.
//!   Followers poll for the published result and, on timeout, run the
//!   coordinator themselves.
//!
//! Any substrate failure degrades to running the coordinator locally.
//! Correctness never depends on this module: the coordinator's
//! compare-and-swap and ledger make duplicate work safe.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::AuthConfig;
use super::coordinator::RefreshCoordinator;
use super::{AuthError, token_fingerprint};
use crate::coordination::{CoordinationError, CoordinationStore, bounded};
use crate::models::auth::TokenPair;

const LOCK_PREFIX: &str = "refresh_lock:";
const RESULT_PREFIX: &str = "refresh_result:";

type Flight = Shared<BoxFuture<'static, Result<TokenPair, AuthError>>>;

/// Timing knobs for the distributed layer.
#[derive(Debug, Clone, Copy)]
pub struct SingleFlightSettings {
    pub lock_lease: Duration,
    pub poll_interval: Duration,
    pub wait_timeout: Duration,
    pub result_ttl_cap: Duration,
    pub early_refresh_window: Duration,
    pub call_timeout: Duration,
    /// Lifetime of a used-token ledger record. A published result never
    /// outlives the ledger record of the rotation that produced it.
    pub used_token_grace: Duration,
    /// Access token lifetime, used to recover when a pair was minted.
    pub access_ttl: Duration,
}

impl From<&AuthConfig> for SingleFlightSettings {
    fn from(cfg: &AuthConfig) -> Self {
        Self {
            lock_lease: cfg.lock_lease,
            poll_interval: cfg.follower_poll_interval,
            wait_timeout: cfg.follower_wait_timeout,
            result_ttl_cap: cfg.result_ttl_cap,
            early_refresh_window: cfg.early_refresh_window,
            call_timeout: cfg.coordination_timeout,
            used_token_grace: cfg.used_token_grace,
            access_ttl: cfg.access_ttl,
        }
    }
}

impl SingleFlightSettings {
    /// How long a published result may be reused, given `now_ms` in unix
    /// milliseconds.
    ///
    /// Bounded by `result_ttl_cap`, by the moment the new access token is
    /// due for refresh, and by the end of the grace window counted from when
    /// the pair was minted. The mint time is rounded down to the second, so
    /// the result always expires no later than the ledger record. `None`
    /// when any bound has already passed.
    fn result_ttl(&self, pair: &TokenPair, now_ms: i64) -> Option<Duration> {
        let exp_ms = pair.access_expires_at * 1000;
        let minted_ms = exp_ms - self.access_ttl.as_secs() as i64 * 1000;

        let due_at = exp_ms - self.early_refresh_window.as_millis() as i64;
        let grace_ends = minted_ms + self.used_token_grace.as_millis() as i64;
        let capped = now_ms + self.result_ttl_cap.as_millis() as i64;

        let remaining = due_at.min(grace_ends).min(capped) - now_ms;
        (remaining > 0).then(|| Duration::from_millis(remaining as u64))
    }
}

pub struct RefreshSingleFlight {
    coordinator: Arc<RefreshCoordinator>,
    substrate: Option<Arc<dyn CoordinationStore>>,
    settings: SingleFlightSettings,
    in_flight: DashMap<String, Flight>,
    instance_id: String,
}

impl RefreshSingleFlight {
    /// `substrate: None` disables the distributed layer entirely.
    pub fn new(
        coordinator: Arc<RefreshCoordinator>,
        substrate: Option<Arc<dyn CoordinationStore>>,
        settings: SingleFlightSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            substrate,
            settings,
            in_flight: DashMap::new(),
            instance_id: Uuid::new_v4().to_string(),
        })
    }

    pub fn is_distributed(&self) -> bool {
        self.substrate.is_some()
    }

    /// Refresh `presented`, sharing work with concurrent callers.
    pub async fn refresh(self: &Arc<Self>, presented: &str) -> Result<TokenPair, AuthError> {
        let identity = token_fingerprint(presented);

        let flight = match self.in_flight.entry(identity.clone()) {
            Entry::Occupied(entry) => {
                debug!("joining in-flight refresh");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let this = Arc::clone(self);
                let presented = presented.to_string();
                let key = identity.clone();
                // Runs to completion even if every caller goes away, so the
                // rotation is always recorded and the entry always removed.
                let task = tokio::spawn(async move {
                    let outcome = this.run(&key, &presented).await;
                    this.in_flight.remove(&key);
                    outcome
                });
                let flight = async move {
                    task.await.unwrap_or_else(|e| {
                        Err(AuthError::Internal(format!("refresh task failed: {e}")))
                    })
                }
                .boxed()
                .shared();
                entry.insert(flight.clone());
                flight
            }
        };

        flight.await
    }

    async fn run(&self, identity: &str, presented: &str) -> Result<TokenPair, AuthError> {
        let Some(substrate) = &self.substrate else {
            return self.coordinator.rotate(presented).await;
        };

        let result_key = format!("{RESULT_PREFIX}{identity}");
        match self.call(substrate.get(&result_key)).await {
            Ok(Some(raw)) => {
                if let Some(pair) = decode(&raw) {
                    debug!("reusing published refresh result");
                    return Ok(pair);
                }
            }
            Ok(None) => {}
            Err(e) => return self.degraded(e, presented).await,
        }

        let lock_key = format!("{LOCK_PREFIX}{identity}");
        let holder = format!("{}:{}", self.instance_id, Uuid::new_v4());
        match self
            .call(substrate.set_if_absent(&lock_key, &holder, self.settings.lock_lease))
            .await
        {
            Ok(true) => {
                self.lead(substrate, &lock_key, &result_key, &holder, presented)
                    .await
            }
            Ok(false) => self.follow(substrate, &lock_key, &result_key, presented).await,
            Err(e) => self.degraded(e, presented).await,
        }
    }

    async fn lead(
        &self,
        substrate: &Arc<dyn CoordinationStore>,
        lock_key: &str,
        result_key: &str,
        holder: &str,
        presented: &str,
    ) -> Result<TokenPair, AuthError> {
        debug!("acquired refresh lock");
        let stop = CancellationToken::new();
        tokio::spawn(renew_lease(
            Arc::clone(substrate),
            lock_key.to_string(),
            holder.to_string(),
            self.settings,
            stop.clone(),
        ));
        let renewal = stop.drop_guard();

        let outcome = self.coordinator.rotate(presented).await;
        drop(renewal);

        if let Ok(pair) = &outcome {
            self.publish(substrate, result_key, pair).await;
        }

        match self.call(substrate.compare_and_delete(lock_key, holder)).await {
            Ok(true) => {}
            Ok(false) => debug!("refresh lock lease had already lapsed"),
            Err(e) => warn!(error = %e, "failed to release refresh lock, lease will expire"),
        }

        outcome
    }

    async fn publish(&self, substrate: &Arc<dyn CoordinationStore>, key: &str, pair: &TokenPair) {
        let Some(ttl) = self.settings.result_ttl(pair, Utc::now().timestamp_millis()) else {
            debug!("refresh result too close to expiry to publish");
            return;
        };
        let payload = match serde_json::to_string(pair) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to encode refresh result");
                return;
            }
        };
        if let Err(e) = self.call(substrate.set_with_ttl(key, &payload, ttl)).await {
            warn!(error = %e, "failed to publish refresh result");
        }
    }

    async fn follow(
        &self,
        substrate: &Arc<dyn CoordinationStore>,
        lock_key: &str,
        result_key: &str,
        presented: &str,
    ) -> Result<TokenPair, AuthError> {
        debug!("refresh lock held elsewhere, waiting for result");
        let deadline = Instant::now() + self.settings.wait_timeout;

        loop {
            tokio::time::sleep(self.settings.poll_interval).await;

            match self.call(substrate.get(result_key)).await {
                Ok(Some(raw)) => {
                    if let Some(pair) = decode(&raw) {
                        return Ok(pair);
                    }
                }
                Ok(None) => {}
                Err(e) => return self.degraded(e, presented).await,
            }

            if Instant::now() >= deadline {
                info!("timed out waiting for refresh leader, refreshing directly");
                break;
            }

            match self.call(substrate.get(lock_key)).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    // Leader finished: either it published just now or it failed.
                    if let Ok(Some(raw)) = self.call(substrate.get(result_key)).await
                        && let Some(pair) = decode(&raw)
                    {
                        return Ok(pair);
                    }
                    debug!("refresh leader released without a result");
                    break;
                }
                Err(e) => return self.degraded(e, presented).await,
            }
        }

        self.coordinator.rotate(presented).await
    }

    async fn degraded(
        &self,
        cause: CoordinationError,
        presented: &str,
    ) -> Result<TokenPair, AuthError> {
        warn!(error = %cause, "coordination substrate unavailable, refreshing locally");
        self.coordinator.rotate(presented).await
    }

    async fn call<T>(
        &self,
        op: impl Future<Output = Result<T, CoordinationError>>,
    ) -> Result<T, CoordinationError> {
        bounded(self.settings.call_timeout, op).await
    }
}

/// Keep the leader's lease alive at half-lease intervals until `stop` fires
/// or the lease turns out to belong to someone else.
async fn renew_lease(
    substrate: Arc<dyn CoordinationStore>,
    lock_key: String,
    holder: String,
    settings: SingleFlightSettings,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(settings.lock_lease / 2);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {
                let renewed = bounded(
                    settings.call_timeout,
                    substrate.compare_and_expire(&lock_key, &holder, settings.lock_lease),
                )
                .await;
                match renewed {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!("refresh lock lease lost before completion");
                        return;
                    }
                    Err(e) => warn!(error = %e, "refresh lock renewal failed"),
                }
            }
        }
    }
}

fn decode(raw: &str) -> Option<TokenPair> {
    serde_json::from_str(raw)
        .inspect_err(|e| warn!(error = %e, "discarding undecodable refresh result"))
        .ok()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::auth::coordinator::tests::{Fixture, fixture};
    use crate::auth::coordinator::LogReplay;
    use crate::auth::ledger::UsedTokenLedger;
    use crate::auth::store::{CredentialStore, MemoryCredentialStore};
    use crate::coordination::MemoryCoordinationStore;
    use crate::coordination::tests::{HangingStore, UnreachableStore};
    use crate::models::auth::{NewPrincipal, Principal};

    /// Wraps the memory store, slowing lookups so callers overlap, and
    /// counting lookups and successful swaps.
    struct SlowStore {
        inner: Arc<MemoryCredentialStore>,
        delay: Duration,
        lookups: AtomicUsize,
        swaps: AtomicUsize,
    }

    impl SlowStore {
        fn new(inner: Arc<MemoryCredentialStore>, delay: Duration) -> Self {
            Self {
                inner,
                delay,
                lookups: AtomicUsize::new(0),
                swaps: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CredentialStore for SlowStore {
        async fn find_by_identifier(
            &self,
            identifier: &str,
        ) -> Result<Option<Principal>, AuthError> {
            self.inner.find_by_identifier(identifier).await
        }

        async fn find_by_id(&self, principal_id: &str) -> Result<Option<Principal>, AuthError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.inner.find_by_id(principal_id).await
        }

        async fn compare_and_swap_refresh_token(
            &self,
            principal_id: &str,
            expected: &str,
            new_token: &str,
        ) -> Result<bool, AuthError> {
            let swapped = self
                .inner
                .compare_and_swap_refresh_token(principal_id, expected, new_token)
                .await?;
            if swapped {
                self.swaps.fetch_add(1, Ordering::SeqCst);
            }
            Ok(swapped)
        }

        async fn set_refresh_token(
            &self,
            principal_id: &str,
            token: Option<&str>,
        ) -> Result<(), AuthError> {
            self.inner.set_refresh_token(principal_id, token).await
        }

        async fn create_principal(&self, new: NewPrincipal) -> Result<Principal, AuthError> {
            self.inner.create_principal(new).await
        }

        async fn principal_count(&self) -> Result<i64, AuthError> {
            self.inner.principal_count().await
        }
    }

    fn settings() -> SingleFlightSettings {
        SingleFlightSettings {
            lock_lease: Duration::from_millis(500),
            poll_interval: Duration::from_millis(10),
            wait_timeout: Duration::from_millis(150),
            result_ttl_cap: Duration::from_secs(10),
            early_refresh_window: Duration::from_secs(60),
            call_timeout: Duration::from_millis(50),
            used_token_grace: Duration::from_secs(10),
            access_ttl: Duration::from_secs(900),
        }
    }

    /// A replica: its own coordinator and single-flight over shared state.
    fn replica(
        f: &Fixture,
        store: Arc<SlowStore>,
        substrate: Option<Arc<dyn CoordinationStore>>,
    ) -> Arc<RefreshSingleFlight> {
        replica_with(f, store, substrate, settings())
    }

    fn replica_with(
        f: &Fixture,
        store: Arc<SlowStore>,
        substrate: Option<Arc<dyn CoordinationStore>>,
        settings: SingleFlightSettings,
    ) -> Arc<RefreshSingleFlight> {
        let grace = settings.used_token_grace;
        let ledger = match &substrate {
            Some(s) => UsedTokenLedger::shared(grace, Arc::clone(s), Duration::from_millis(50)),
            None => UsedTokenLedger::local(grace),
        };
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&f.codec),
            store,
            Arc::new(ledger),
            Arc::new(LogReplay),
            1,
        ));
        RefreshSingleFlight::new(coordinator, substrate, settings)
    }

    fn slow(f: &Fixture, delay_ms: u64) -> Arc<SlowStore> {
        Arc::new(SlowStore::new(
            f.store.clone(),
            Duration::from_millis(delay_ms),
        ))
    }

    #[tokio::test]
    async fn local_callers_share_one_flight() {
        let f = fixture(Duration::from_secs(10)).await;
        let store = slow(&f, 50);
        let sf = replica(&f, store.clone(), None);

        let results =
            futures::future::join_all((0..5).map(|_| sf.refresh(&f.token))).await;

        let first = results[0].clone().unwrap();
        for r in &results {
            assert_eq!(r.as_ref().unwrap(), &first);
        }
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(store.swaps.load(Ordering::SeqCst), 1);
        assert!(sf.in_flight.is_empty());
    }

    #[tokio::test]
    async fn published_result_is_reused_without_store_access() {
        let f = fixture(Duration::from_secs(10)).await;
        let store = slow(&f, 0);
        let substrate: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
        let sf = replica(&f, store.clone(), Some(Arc::clone(&substrate)));

        let cached = TokenPair {
            access_token: "a".into(),
            refresh_token: "r".into(),
            access_expires_at: Utc::now().timestamp() + 900,
        };
        let key = format!("{RESULT_PREFIX}{}", token_fingerprint(&f.token));
        substrate
            .set_with_ttl(&key, &serde_json::to_string(&cached).unwrap(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(sf.refresh(&f.token).await.unwrap(), cached);
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn leader_publishes_and_releases_lock() {
        let f = fixture(Duration::from_secs(10)).await;
        let substrate: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
        let sf = replica(&f, slow(&f, 0), Some(Arc::clone(&substrate)));

        let pair = sf.refresh(&f.token).await.unwrap();
        let identity = token_fingerprint(&f.token);

        let published = substrate
            .get(&format!("{RESULT_PREFIX}{identity}"))
            .await
            .unwrap()
            .and_then(|raw| decode(&raw));
        assert_eq!(published, Some(pair));
        assert!(
            substrate
                .get(&format!("{LOCK_PREFIX}{identity}"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn follower_picks_up_leader_result() {
        let f = fixture(Duration::from_secs(10)).await;
        let store = slow(&f, 0);
        let substrate: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
        let sf = replica(&f, store.clone(), Some(Arc::clone(&substrate)));

        let identity = token_fingerprint(&f.token);
        substrate
            .set_if_absent(&format!("{LOCK_PREFIX}{identity}"), "other", Duration::from_secs(5))
            .await
            .unwrap();

        let published = TokenPair {
            access_token: "from-leader".into(),
            refresh_token: "next".into(),
            access_expires_at: Utc::now().timestamp() + 900,
        };
        let writer = {
            let substrate = Arc::clone(&substrate);
            let payload = serde_json::to_string(&published).unwrap();
            let key = format!("{RESULT_PREFIX}{identity}");
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                substrate
                    .set_with_ttl(&key, &payload, Duration::from_secs(5))
                    .await
                    .unwrap();
            })
        };

        assert_eq!(sf.refresh(&f.token).await.unwrap(), published);
        writer.await.unwrap();
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn follower_falls_back_after_timeout() {
        let f = fixture(Duration::from_secs(10)).await;
        let store = slow(&f, 0);
        let substrate: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
        let sf = replica(&f, store.clone(), Some(Arc::clone(&substrate)));

        let identity = token_fingerprint(&f.token);
        substrate
            .set_if_absent(&format!("{LOCK_PREFIX}{identity}"), "stuck", Duration::from_secs(30))
            .await
            .unwrap();

        let started = Instant::now();
        let pair = sf.refresh(&f.token).await.unwrap();
        assert!(started.elapsed() >= settings().wait_timeout);
        assert_eq!(store.swaps.load(Ordering::SeqCst), 1);
        assert_ne!(pair.refresh_token, f.token);
    }

    #[tokio::test]
    async fn unreachable_substrate_degrades_to_local() {
        let f = fixture(Duration::from_secs(10)).await;
        let store = slow(&f, 0);
        let sf = replica(&f, store.clone(), Some(Arc::new(UnreachableStore)));

        let pair = sf.refresh(&f.token).await.unwrap();
        assert_ne!(pair.refresh_token, f.token);
        assert_eq!(store.swaps.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hanging_substrate_is_bounded() {
        let f = fixture(Duration::from_secs(10)).await;
        let sf = replica(&f, slow(&f, 0), Some(Arc::new(HangingStore)));

        let pair = tokio::time::timeout(Duration::from_secs(2), sf.refresh(&f.token))
            .await
            .expect("refresh must not hang on the substrate")
            .unwrap();
        assert_ne!(pair.refresh_token, f.token);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn replicas_converge_on_one_rotation() {
        let f = fixture(Duration::from_secs(10)).await;
        let store = slow(&f, 20);
        let substrate: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
        let replicas: Vec<_> = (0..3)
            .map(|_| replica(&f, store.clone(), Some(Arc::clone(&substrate))))
            .collect();

        let handles: Vec<_> = replicas
            .iter()
            .flat_map(|sf| {
                (0..3).map(|_| {
                    let sf = Arc::clone(sf);
                    let token = f.token.clone();
                    tokio::spawn(async move { sf.refresh(&token).await })
                })
            })
            .collect();

        let mut refresh_tokens = Vec::new();
        for h in handles {
            refresh_tokens.push(h.await.unwrap().unwrap().refresh_token);
        }
        refresh_tokens.dedup();
        assert_eq!(refresh_tokens.len(), 1);
        assert_eq!(store.swaps.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lease_is_renewed_until_stopped() {
        let substrate: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
        let mut s = settings();
        s.lock_lease = Duration::from_millis(60);
        substrate.set_if_absent("lock", "me", s.lock_lease).await.unwrap();

        let stop = CancellationToken::new();
        let task = tokio::spawn(renew_lease(
            Arc::clone(&substrate),
            "lock".into(),
            "me".into(),
            s,
            stop.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(substrate.get("lock").await.unwrap().as_deref(), Some("me"));

        stop.cancel();
        task.await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(substrate.get("lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn abandoned_flight_still_completes_and_drains() {
        let f = fixture(Duration::from_secs(10)).await;
        let store = slow(&f, 0);
        let substrate: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
        let sf = replica(&f, store.clone(), Some(Arc::clone(&substrate)));

        // Another replica holds the lock, so this caller has to wait.
        let identity = token_fingerprint(&f.token);
        substrate
            .set_if_absent(&format!("{LOCK_PREFIX}{identity}"), "other", Duration::from_secs(30))
            .await
            .unwrap();

        let gave_up = tokio::time::timeout(Duration::from_millis(5), sf.refresh(&f.token)).await;
        assert!(gave_up.is_err());
        assert_eq!(sf.in_flight.len(), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(sf.in_flight.is_empty());
        assert_eq!(store.swaps.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rotated_token_is_rejected_once_grace_passes_despite_long_cache_cap() {
        let f = fixture(Duration::from_secs(10)).await;
        let substrate: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
        let mut s = settings();
        s.used_token_grace = Duration::from_millis(50);
        s.result_ttl_cap = Duration::from_secs(10);
        let sf = replica_with(&f, slow(&f, 0), Some(substrate), s);

        let rotated = sf.refresh(&f.token).await.unwrap();
        assert_ne!(rotated.refresh_token, f.token);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let stale = sf.refresh(&f.token).await;
        assert!(matches!(stale, Err(AuthError::TokenInvalid(_))), "{stale:?}");
    }

    #[test]
    fn result_ttl_respects_cap_grace_and_refresh_point() {
        let now = 1_000_000;
        let now_ms = now * 1000;
        let pair = |exp| TokenPair {
            access_token: String::new(),
            refresh_token: String::new(),
            access_expires_at: exp,
        };

        // Minted just now with a 900s access token.
        let s = settings();
        assert_eq!(s.result_ttl(&pair(now + 900), now_ms), Some(Duration::from_secs(10)));

        // The grace window bounds the cache even under a generous cap.
        let mut short_grace = settings();
        short_grace.used_token_grace = Duration::from_secs(2);
        short_grace.result_ttl_cap = Duration::from_secs(60);
        assert_eq!(
            short_grace.result_ttl(&pair(now + 900), now_ms),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            short_grace.result_ttl(&pair(now + 900), now_ms + 1500),
            Some(Duration::from_millis(500))
        );
        assert_eq!(short_grace.result_ttl(&pair(now + 900), now_ms + 3000), None);

        // A short-lived access token is due for refresh before the cap.
        let mut short_access = settings();
        short_access.access_ttl = Duration::from_secs(65);
        assert_eq!(
            short_access.result_ttl(&pair(now + 65), now_ms),
            Some(Duration::from_secs(5))
        );
        short_access.access_ttl = Duration::from_secs(60);
        assert_eq!(short_access.result_ttl(&pair(now + 60), now_ms), None);
    }
}
