//! PostgreSQL-backed credential store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;

use super::AuthError;
use super::store::CredentialStore;
use crate::models::auth::{NewPrincipal, Principal, SubscriptionStatus};
use crate::uuid::uuidv7;

const PRINCIPAL_COLUMNS: &str = "id::text, username, email, password_hash, role, plan_slug, \
     subscription_status, subscription_started_at, subscription_ends_at, refresh_token, \
     is_active, created_at";

#[derive(sqlx::FromRow)]
struct PrincipalRow {
    id: String,
    username: String,
    email: String,
    password_hash: String,
    role: String,
    plan_slug: Option<String>,
    subscription_status: String,
    subscription_started_at: Option<DateTime<Utc>>,
    subscription_ends_at: Option<DateTime<Utc>>,
    refresh_token: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<PrincipalRow> for Principal {
    fn from(row: PrincipalRow) -> Self {
        let subscription_status = row.subscription_status.parse().unwrap_or_else(|e| {
            warn!(principal_id = %row.id, error = %e, "treating subscription as inactive");
            SubscriptionStatus::Inactive
        });
        Principal {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            role: row.role,
            plan_slug: row.plan_slug,
            subscription_status,
            subscription_started_at: row.subscription_started_at,
            subscription_ends_at: row.subscription_ends_at,
            refresh_token: row.refresh_token,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

/// Credential store over the `users` table.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Principal>, AuthError> {
        let sql = if identifier.contains('@') {
            format!("SELECT {PRINCIPAL_COLUMNS} FROM users WHERE lower(email) = lower($1)")
        } else {
            format!("SELECT {PRINCIPAL_COLUMNS} FROM users WHERE username = $1")
        };
        let row = sqlx::query_as::<_, PrincipalRow>(&sql)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Principal::from))
    }

    async fn find_by_id(&self, principal_id: &str) -> Result<Option<Principal>, AuthError> {
        let Ok(id) = principal_id.parse::<uuid::Uuid>() else {
            return Ok(None);
        };
        let sql = format!("SELECT {PRINCIPAL_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, PrincipalRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Principal::from))
    }

    async fn compare_and_swap_refresh_token(
        &self,
        principal_id: &str,
        expected: &str,
        new_token: &str,
    ) -> Result<bool, AuthError> {
        let Ok(id) = principal_id.parse::<uuid::Uuid>() else {
            return Ok(false);
        };
        let result = sqlx::query(
            "UPDATE users SET refresh_token = $3 \
             WHERE id = $1 AND refresh_token = $2",
        )
        .bind(id)
        .bind(expected)
        .bind(new_token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_refresh_token(
        &self,
        principal_id: &str,
        token: Option<&str>,
    ) -> Result<(), AuthError> {
        let Ok(id) = principal_id.parse::<uuid::Uuid>() else {
            return Ok(());
        };
        sqlx::query("UPDATE users SET refresh_token = $2 WHERE id = $1")
            .bind(id)
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_principal(&self, new: NewPrincipal) -> Result<Principal, AuthError> {
        let sql = format!(
            "INSERT INTO users (id, username, email, password_hash, role) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {PRINCIPAL_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PrincipalRow>(&sql)
            .bind(uuidv7())
            .bind(&new.username)
            .bind(&new.email)
            .bind(&new.password_hash)
            .bind(&new.role)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    async fn principal_count(&self) -> Result<i64, AuthError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
