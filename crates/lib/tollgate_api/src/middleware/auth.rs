//! Bearer token extraction and access-token verification.

use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tollgate_core::auth::AuthError;
use tollgate_core::models::auth::AccessClaims;

use crate::AppState;
use crate::error::AppError;

/// Verified access claims, stored in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub AccessClaims);

/// Axum middleware: extracts `Authorization: Bearer <token>`, verifies the
/// access token, and injects `AuthenticatedUser` into request extensions.
///
/// An expired token answers `token_expired` so the client refreshes; any
/// other failure is a plain 401.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization scheme".into()))?;

    let claims = state.session.verify_access(token).map_err(|e| match e {
        AuthError::TokenExpired => AppError::TokenExpired,
        _ => AppError::Unauthorized("Invalid access token".into()),
    })?;

    request.extensions_mut().insert(AuthenticatedUser(claims));

    Ok(next.run(request).await)
}
