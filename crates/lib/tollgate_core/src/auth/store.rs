//! Credential store contract and an in-memory implementation.
//!
//! The store owns the single "current refresh token" pointer per principal.
//! [`CredentialStore::compare_and_swap_refresh_token`] is the one
//! linearization point for rotation: every other coordination layer is an
//! optimization on top of it.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::AuthError;
use crate::models::auth::{NewPrincipal, Principal, SubscriptionStatus};

/// Persistence for principals and their current refresh-token pointer.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up by email (case-insensitive) when `identifier` contains `@`,
    /// otherwise by username. Usernames never contain `@`, so at most one
    /// principal can match.
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Principal>, AuthError>;

    async fn find_by_id(&self, principal_id: &str) -> Result<Option<Principal>, AuthError>;

    /// Replace the pointer with `new_token` only if it still equals `expected`.
    ///
    /// Returns `false` on mismatch, including when the principal is gone or
    /// has no current token.
    async fn compare_and_swap_refresh_token(
        &self,
        principal_id: &str,
        expected: &str,
        new_token: &str,
    ) -> Result<bool, AuthError>;

    /// Unconditionally set (or clear, with `None`) the pointer.
    async fn set_refresh_token(
        &self,
        principal_id: &str,
        token: Option<&str>,
    ) -> Result<(), AuthError>;

    async fn create_principal(&self, new: NewPrincipal) -> Result<Principal, AuthError>;

    async fn principal_count(&self) -> Result<i64, AuthError>;
}

/// `DashMap`-backed store keyed by principal id.
///
/// Each CAS runs under the shard lock of its entry, so it is atomic with
/// respect to every other write for the same principal.
#[derive(Default)]
pub struct MemoryCredentialStore {
    principals: DashMap<String, Principal>,
    /// Serializes the uniqueness check and insert in `create_principal`.
    registrations: Mutex<()>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite subscription fields, standing in for the billing collaborator.
    pub fn set_subscription(
        &self,
        principal_id: &str,
        plan_slug: Option<&str>,
        status: SubscriptionStatus,
    ) -> bool {
        match self.principals.get_mut(principal_id) {
            Some(mut p) => {
                p.plan_slug = plan_slug.map(str::to_string);
                p.subscription_status = status;
                p.subscription_started_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    pub fn deactivate(&self, principal_id: &str) -> bool {
        match self.principals.get_mut(principal_id) {
            Some(mut p) => {
                p.is_active = false;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Principal>, AuthError> {
        let by_email = identifier.contains('@');
        Ok(self
            .principals
            .iter()
            .find(|p| {
                if by_email {
                    p.email.eq_ignore_ascii_case(identifier)
                } else {
                    p.username == identifier
                }
            })
            .map(|p| p.value().clone()))
    }

    async fn find_by_id(&self, principal_id: &str) -> Result<Option<Principal>, AuthError> {
        Ok(self.principals.get(principal_id).map(|p| p.value().clone()))
    }

    async fn compare_and_swap_refresh_token(
        &self,
        principal_id: &str,
        expected: &str,
        new_token: &str,
    ) -> Result<bool, AuthError> {
        match self.principals.entry(principal_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let p = entry.get_mut();
                if p.refresh_token.as_deref() == Some(expected) {
                    p.refresh_token = Some(new_token.to_string());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    async fn set_refresh_token(
        &self,
        principal_id: &str,
        token: Option<&str>,
    ) -> Result<(), AuthError> {
        if let Some(mut p) = self.principals.get_mut(principal_id) {
            p.refresh_token = token.map(str::to_string);
        }
        Ok(())
    }

    async fn create_principal(&self, new: NewPrincipal) -> Result<Principal, AuthError> {
        let _registering = self
            .registrations
            .lock()
            .map_err(|_| AuthError::Internal("registration lock poisoned".into()))?;
        let taken = self.principals.iter().any(|p| {
            p.username == new.username || p.email.eq_ignore_ascii_case(&new.email)
        });
        if taken {
            return Err(AuthError::Validation(
                "Username or email already registered".into(),
            ));
        }
        let principal = Principal {
            id: crate::uuid::uuidv7().to_string(),
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            role: new.role,
            plan_slug: None,
            subscription_status: SubscriptionStatus::Inactive,
            subscription_started_at: None,
            subscription_ends_at: None,
            refresh_token: None,
            is_active: true,
            created_at: Utc::now(),
        };
        self.principals
            .insert(principal.id.clone(), principal.clone());
        Ok(principal)
    }

    async fn principal_count(&self) -> Result<i64, AuthError> {
        Ok(self.principals.len() as i64)
    }
}
