//! Authorization oracle contract plus a simple in-memory policy table.
//!
//! Consulted only after authentication, with the subject (role) and domain
//! (plan slug) taken from a verified access token. Decisions are never
//! cached; a [`PolicyTable::reload`] takes effect on the next call.

use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use super::AuthError;

/// One question put to the oracle.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    pub subject: &'a str,
    pub domain: &'a str,
    pub resource: &'a str,
    pub action: &'a str,
}

/// External decision function.
#[async_trait]
pub trait AuthorizationOracle: Send + Sync {
    async fn enforce(&self, request: AccessRequest<'_>) -> Result<bool, AuthError>;
}

/// An allow rule. `*` matches anything; a resource ending in `*` matches by
/// prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    pub subject: String,
    pub domain: String,
    pub resource: String,
    pub action: String,
}

impl PolicyRule {
    pub fn new(subject: &str, domain: &str, resource: &str, action: &str) -> Self {
        Self {
            subject: subject.to_string(),
            domain: domain.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
        }
    }

    fn matches(&self, req: &AccessRequest<'_>) -> bool {
        exact_or_any(&self.subject, req.subject)
            && exact_or_any(&self.domain, req.domain)
            && exact_or_any(&self.action, req.action)
            && match self.resource.strip_suffix('*') {
                Some(prefix) => req.resource.starts_with(prefix),
                None => self.resource == req.resource,
            }
    }
}

fn exact_or_any(pattern: &str, value: &str) -> bool {
    pattern == "*" || pattern == value
}

/// Deny-by-default table of allow rules.
#[derive(Debug, Default)]
pub struct PolicyTable {
    rules: RwLock<Vec<PolicyRule>>,
}

impl PolicyTable {
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    /// Admins may do anything; everyone may read their own profile.
    pub fn with_defaults() -> Self {
        Self::new(vec![
            PolicyRule::new("admin", "*", "*", "*"),
            PolicyRule::new("*", "*", "profile", "read"),
        ])
    }

    /// Replace the rule set atomically.
    pub fn reload(&self, rules: Vec<PolicyRule>) -> Result<(), AuthError> {
        let mut guard = self
            .rules
            .write()
            .map_err(|_| AuthError::Internal("policy table lock poisoned".into()))?;
        *guard = rules;
        Ok(())
    }
}

#[async_trait]
impl AuthorizationOracle for PolicyTable {
    async fn enforce(&self, request: AccessRequest<'_>) -> Result<bool, AuthError> {
        let rules = self
            .rules
            .read()
            .map_err(|_| AuthError::Internal("policy table lock poisoned".into()))?;
        let allowed = rules.iter().any(|rule| rule.matches(&request));
        debug!(
            subject = request.subject,
            domain = request.domain,
            resource = request.resource,
            action = request.action,
            allowed,
            "policy decision"
        );
        Ok(allowed)
    }
}
