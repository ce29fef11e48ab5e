//! Tollgate API server binary.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tollgate_core::auth::authz::{AuthorizationOracle, PolicyTable};
use tollgate_core::auth::jwt::TokenCodec;
use tollgate_core::auth::queries::PgCredentialStore;
use tollgate_core::auth::session::SessionService;
use tollgate_core::coordination::redis::RedisSettings;
use tollgate_core::coordination::{CoordinationStore, RedisCoordinationStore};
use tracing::{info, warn};

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "tollgate_server", about = "Tollgate authentication API server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3200")]
    bind: String,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/tollgate"
    )]
    database_url: String,

    /// Redis URL for cross-replica refresh coordination. Omit to keep
    /// coordination process-local.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tollgate_api=debug,tollgate_core=debug".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = tollgate_api::config::ApiConfig::from_env();
    config.bind_addr = args.bind;
    config.pg_connection_url = args.database_url;
    config.redis_url = args.redis_url.filter(|url| !url.is_empty());

    info!(
        bind = %config.bind_addr,
        max_connections = args.max_connections,
        "starting tollgate_server"
    );

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.pg_connection_url)
        .await?;

    info!("running database migrations");
    tollgate_core::migrate::migrate(&pool).await?;

    let substrate: Option<Arc<dyn CoordinationStore>> = match &config.redis_url {
        Some(url) => match RedisCoordinationStore::connect(&RedisSettings::new(url.as_str())).await
        {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!(error = %e, "redis unreachable, refresh coordination stays process-local");
                None
            }
        },
        None => {
            info!("no REDIS_URL, refresh coordination is process-local");
            None
        }
    };

    let codec = Arc::new(TokenCodec::new(
        config.access_secret.as_bytes(),
        config.refresh_secret.as_bytes(),
        config.auth.access_ttl,
        config.auth.refresh_ttl,
    )?);
    let session = Arc::new(SessionService::assemble(
        &config.auth,
        codec,
        Arc::new(PgCredentialStore::new(pool.clone())),
        substrate,
    ));
    let ledger_cleanup = session.spawn_ledger_cleanup(config.auth.used_token_grace);
    let oracle: Arc<dyn AuthorizationOracle> = Arc::new(PolicyTable::with_defaults());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    let local_addr = listener.local_addr()?;

    let app = tollgate_api::router(tollgate_api::AppState {
        session,
        oracle,
        config,
    });

    info!(addr = %local_addr, "REST API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ledger_cleanup.abort();
    pool.close().await;
    info!("shut down cleanly");

    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
