//! Authorization decisions for authenticated callers.

use axum::extract::State;
use axum::{Extension, Json};
use tollgate_core::auth::authz::AccessRequest;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{AuthorizeRequest, AuthorizeResponse};

/// `POST /authorize`: ask the oracle whether the caller's role, under
/// their current plan, may perform `action` on `resource`.
pub async fn authorize_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
    Json(body): Json<AuthorizeRequest>,
) -> AppResult<Json<AuthorizeResponse>> {
    if body.resource.is_empty() || body.action.is_empty() {
        return Err(AppError::Validation(
            "Resource and action are required".into(),
        ));
    }
    let allowed = state
        .oracle
        .enforce(AccessRequest {
            subject: &claims.role,
            domain: &claims.plan,
            resource: &body.resource,
            action: &body.action,
        })
        .await?;
    Ok(Json(AuthorizeResponse { allowed }))
}
