//! Request handlers.

pub mod auth;
pub mod authz;
pub mod health;
