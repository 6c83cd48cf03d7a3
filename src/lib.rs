//! AuthHub — central identity and authorization broker.
//!
//! Authenticates users against an external SSO provider, issues
//! self-describing asymmetrically-signed access tokens carrying a full
//! permission snapshot, and distributes namespace-scoped role/permission/
//! route configuration to downstream systems so they can authorize requests
//! locally without a per-request round-trip.
//!
//! # Components
//!
//! - [`keys`] — asymmetric keypair loading and the signing/verification keys
//! - [`store`] — TTL key-value store protocol (blacklist, refresh tokens,
//!   one-time SSO state)
//! - [`token`] — access/system/refresh token lifecycle
//! - [`rbac`] — namespace-partitioned permission aggregation and admin
//!   mutations
//! - [`sync`] — per-system config payload assembly
//! - [`notify`] — change-notification bus (cache-invalidation hints)
//! - [`server`] — axum HTTP surface

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod keys;
pub mod notify;
pub mod principal;
pub mod rbac;
pub mod repo;
pub mod server;
pub mod sso;
pub mod store;
pub mod sync;
pub mod system;
pub mod token;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
