//! # tollgate_api
//!
//! HTTP API library for Tollgate.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tollgate_core::auth::authz::AuthorizationOracle;
use tollgate_core::auth::session::SessionService;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::handlers::{auth, authz, health};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Login, refresh and logout orchestration.
    pub session: Arc<SessionService>,
    /// Consulted by `/authorize` after authentication.
    pub oracle: Arc<dyn AuthorizationOracle>,
    /// API configuration.
    pub config: ApiConfig,
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route(routes::GET_HEALTH, get(health::health_handler))
        .route(routes::POST_LOGIN, post(auth::login_handler))
        .route(routes::POST_REGISTER, post(auth::register_handler))
        .route(routes::POST_REFRESH_TOKEN, post(auth::refresh_handler));

    // Protected routes (require auth)
    let protected = Router::new()
        .route(routes::POST_LOGOUT, post(auth::logout_handler))
        .route(routes::GET_ME, get(auth::me_handler))
        .route(routes::POST_AUTHORIZE, post(authz::authorize_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
