//! Token lifecycle and refresh-coordination tunables.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Tunables for the token codec, ledger, coordinator and single-flight layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthConfig {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Refresh this long before the access token expires.
    pub early_refresh_window: Duration,
    /// Upper bound of the per-principal refresh jitter.
    pub jitter_max: Duration,
    /// How long a rotated refresh token stays in the used-token ledger.
    pub used_token_grace: Duration,
    /// Distributed lock lease; must exceed a worst-case refresh.
    pub lock_lease: Duration,
    pub follower_poll_interval: Duration,
    pub follower_wait_timeout: Duration,
    /// Upper bound on how long a cached refresh result is kept.
    pub result_ttl_cap: Duration,
    /// Per-call timeout for every coordination-substrate operation.
    pub coordination_timeout: Duration,
    /// Extra attempts after losing the refresh-token compare-and-swap.
    pub cas_retries: u32,
    /// Revoke the whole session when a stale refresh token is replayed.
    pub revoke_on_replay: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_ttl: Duration::from_secs(15 * 60),
            refresh_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            early_refresh_window: Duration::from_secs(60),
            jitter_max: Duration::from_secs(10),
            used_token_grace: Duration::from_secs(10),
            lock_lease: Duration::from_secs(5),
            follower_poll_interval: Duration::from_millis(100),
            follower_wait_timeout: Duration::from_secs(3),
            result_ttl_cap: Duration::from_secs(10),
            coordination_timeout: Duration::from_millis(500),
            cas_retries: 1,
            revoke_on_replay: false,
        }
    }
}

impl AuthConfig {
    /// Reads configuration from environment variables with safe defaults.
    ///
    /// | Variable                      | Default  |
    /// |-------------------------------|----------|
    /// | `ACCESS_TOKEN_TTL_SECS`       | `900`    |
    /// | `REFRESH_TOKEN_TTL_SECS`      | `604800` |
    /// | `EARLY_REFRESH_WINDOW_SECS`   | `60`     |
    /// | `REFRESH_JITTER_MAX_MS`       | `10000`  |
    /// | `USED_TOKEN_GRACE_SECS`       | `10`     |
    /// | `REFRESH_LOCK_LEASE_MS`       | `5000`   |
    /// | `FOLLOWER_POLL_INTERVAL_MS`   | `100`    |
    /// | `FOLLOWER_WAIT_TIMEOUT_MS`    | `3000`   |
    /// | `REFRESH_RESULT_TTL_CAP_SECS` | `10`     |
    /// | `COORDINATION_TIMEOUT_MS`     | `500`    |
    /// | `REFRESH_CAS_RETRIES`         | `1`      |
    /// | `REVOKE_ON_REPLAY`            | `false`  |
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`AuthConfig::from_env`] but reading from an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let secs = |name: &str, default: Duration| {
            Duration::from_secs(parse_or(&lookup, name, default.as_secs()))
        };
        let millis = |name: &str, default: Duration| {
            Duration::from_millis(parse_or(&lookup, name, default.as_millis() as u64))
        };

        Self {
            access_ttl: secs("ACCESS_TOKEN_TTL_SECS", d.access_ttl),
            refresh_ttl: secs("REFRESH_TOKEN_TTL_SECS", d.refresh_ttl),
            early_refresh_window: secs("EARLY_REFRESH_WINDOW_SECS", d.early_refresh_window),
            jitter_max: millis("REFRESH_JITTER_MAX_MS", d.jitter_max),
            used_token_grace: secs("USED_TOKEN_GRACE_SECS", d.used_token_grace),
            lock_lease: millis("REFRESH_LOCK_LEASE_MS", d.lock_lease),
            follower_poll_interval: millis("FOLLOWER_POLL_INTERVAL_MS", d.follower_poll_interval),
            follower_wait_timeout: millis("FOLLOWER_WAIT_TIMEOUT_MS", d.follower_wait_timeout),
            result_ttl_cap: secs("REFRESH_RESULT_TTL_CAP_SECS", d.result_ttl_cap),
            coordination_timeout: millis("COORDINATION_TIMEOUT_MS", d.coordination_timeout),
            cas_retries: parse_or(&lookup, "REFRESH_CAS_RETRIES", d.cas_retries),
            revoke_on_replay: parse_or(&lookup, "REVOKE_ON_REPLAY", d.revoke_on_replay),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    match lookup(name) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, "unparseable setting, using default");
            default
        }),
    }
}
