//! Authentication domain models.
//!
//! These are internal domain models, distinct from the API request/response
//! shapes in `tollgate_api` (which use camelCase on the wire).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Plan slug embedded in access tokens when no paid subscription is in effect.
pub const FREE_PLAN: &str = "free";

/// Role granted to the first registered principal.
pub const ADMIN_ROLE: &str = "admin";

/// Role granted to every later principal.
pub const USER_ROLE: &str = "user";

/// Subscription lifecycle as recorded by the billing side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Inactive,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "inactive" => Ok(SubscriptionStatus::Inactive),
            other => Err(format!("unknown subscription status: {other}")),
        }
    }
}

/// Domain principal (a user account) as held by the credential store.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    /// Stored plan reference; `None` means the principal never subscribed.
    pub plan_slug: Option<String>,
    pub subscription_status: SubscriptionStatus,
    pub subscription_started_at: Option<DateTime<Utc>>,
    pub subscription_ends_at: Option<DateTime<Utc>>,
    /// The single current refresh token, if a session is open.
    pub refresh_token: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Principal {
    /// Plan that gates access right now.
    ///
    /// Falls back to [`FREE_PLAN`] unless the subscription is active or
    /// trialing and has not passed its end date.
    pub fn effective_plan(&self, now: DateTime<Utc>) -> String {
        let live = matches!(
            self.subscription_status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        ) && self.subscription_ends_at.is_none_or(|ends| ends > now);

        match (&self.plan_slug, live) {
            (Some(slug), true) => slug.clone(),
            _ => FREE_PLAN.to_string(),
        }
    }

    /// Public view handed back to clients at login.
    pub fn summary(&self, now: DateTime<Utc>) -> PrincipalSummary {
        PrincipalSummary {
            id: self.id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
            plan: self.effective_plan(now),
            subscription_status: self.subscription_status,
        }
    }
}

/// Input for creating a principal.
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
}

/// Client-facing subset of a principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalSummary {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: String,
    pub plan: String,
    pub subscription_status: SubscriptionStatus,
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject: principal ID (standard JWT `sub` claim).
    pub sub: String,
    pub role: String,
    /// Effective plan slug at issue time.
    pub plan: String,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
}

/// JWT claims embedded in refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    /// Unique per token so two rotations in the same second never collide.
    pub jti: String,
    pub exp: i64,
    pub iat: i64,
}

/// A freshly issued or replayed access/refresh pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry (unix timestamp).
    pub access_expires_at: i64,
}
