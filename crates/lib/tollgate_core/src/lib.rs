//! # tollgate_core
//!
//! Token lifecycle and refresh coordination for Tollgate: JWT issuance,
//! refresh-token rotation with a grace window, and single-flight refresh
//! de-duplication across tabs, devices and server replicas.

pub mod auth;
pub mod coordination;
pub mod migrate;
pub mod models;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
