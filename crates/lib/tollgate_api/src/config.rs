//! API server configuration.

use tollgate_core::auth::config::AuthConfig;
use tollgate_core::auth::jwt::resolve_secret;

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3200").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub pg_connection_url: String,
    /// Redis URL for cross-replica refresh coordination. `None` keeps
    /// coordination process-local.
    pub redis_url: Option<String>,
    /// HS256 secret for access tokens.
    pub access_secret: String,
    /// HS256 secret for refresh tokens. Must differ from `access_secret`.
    pub refresh_secret: String,
    /// Token lifetimes and refresh coordination timings.
    pub auth: AuthConfig,
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable             | Default                              |
    /// |----------------------|--------------------------------------|
    /// | `BIND_ADDR`          | `127.0.0.1:3200`                     |
    /// | `DATABASE_URL`       | `postgres://localhost:5432/tollgate` |
    /// | `REDIS_URL`          | unset (local coordination only)      |
    /// | `JWT_ACCESS_SECRET`  | generated & persisted to file        |
    /// | `JWT_REFRESH_SECRET` | generated & persisted to file        |
    ///
    /// Timing knobs are read by [`AuthConfig::from_env`].
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3200".into()),
            pg_connection_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/tollgate".into()),
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            access_secret: resolve_secret("JWT_ACCESS_SECRET", "access-secret"),
            refresh_secret: resolve_secret("JWT_REFRESH_SECRET", "refresh-secret"),
            auth: AuthConfig::from_env(),
        }
    }
}
