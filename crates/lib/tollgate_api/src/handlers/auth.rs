//! Authentication request handlers.

use axum::extract::State;
use axum::{Extension, Json};
use chrono::Utc;
use tollgate_core::models::auth::TokenPair;
use tracing::debug;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{
    LoginRequest, LogoutResponse, MeResponse, RefreshRequest, RefreshResponse, RegisterRequest,
    TokenResponse,
};

const TOKEN_TYPE: &str = "Bearer";

fn expires_in(tokens: &TokenPair) -> i64 {
    (tokens.access_expires_at - Utc::now().timestamp()).max(0)
}

/// `POST /login`: authenticate with username or email plus password.
pub async fn login_handler(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    if body.identifier.trim().is_empty() || body.password.is_empty() {
        return Err(AppError::Validation(
            "Identifier and password are required".into(),
        ));
    }
    let outcome = state.session.login(&body.identifier, &body.password).await?;
    Ok(Json(TokenResponse {
        expires_in: expires_in(&outcome.tokens),
        access_token: outcome.tokens.access_token,
        refresh_token: outcome.tokens.refresh_token,
        token_type: TOKEN_TYPE.into(),
        user: outcome.principal.into(),
    }))
}

/// `POST /register`: create an account and sign it in.
pub async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<Json<TokenResponse>> {
    let outcome = state
        .session
        .register(&body.username, &body.email, &body.password)
        .await?;
    Ok(Json(TokenResponse {
        expires_in: expires_in(&outcome.tokens),
        access_token: outcome.tokens.access_token,
        refresh_token: outcome.tokens.refresh_token,
        token_type: TOKEN_TYPE.into(),
        user: outcome.principal.into(),
    }))
}

/// `POST /refresh-token`: exchange a refresh token for a new pair.
///
/// Concurrent calls presenting the same token all receive the same pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<RefreshResponse>> {
    if body.refresh_token.is_empty() {
        return Err(AppError::Validation("Refresh token is required".into()));
    }
    let tokens = state.session.refresh(&body.refresh_token).await?;
    Ok(Json(RefreshResponse {
        expires_in: expires_in(&tokens),
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        token_type: TOKEN_TYPE.into(),
    }))
}

/// `POST /logout`: end the caller's session. Requires authentication.
pub async fn logout_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
) -> AppResult<Json<LogoutResponse>> {
    state.session.logout(&claims.sub).await?;
    Ok(Json(LogoutResponse { success: true }))
}

/// `GET /me`: the caller's claims plus a hint about refreshing early.
pub async fn me_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
) -> Json<MeResponse> {
    let refresh_due = state
        .session
        .needs_refresh(claims.exp, &claims.sub, Utc::now());
    debug!(principal_id = %claims.sub, refresh_due, "me");
    Json(MeResponse {
        id: claims.sub,
        role: claims.role,
        plan: claims.plan,
        expires_at: claims.exp,
        refresh_due,
    })
}
