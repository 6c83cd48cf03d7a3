//! Revocation & session store — the TTL key-value protocol behind token
//! blacklisting, one-time refresh tokens, and one-time SSO anti-CSRF state.
//!
//! Every key is independently addressable; no cross-key transaction is
//! assumed. [`KeyValueStore::take`] is the one atomic primitive the broker
//! relies on: removal returns the stored value in a single step, which is
//! what makes refresh-token rotation and SSO-state consumption exactly-once
//! even under concurrent presentation.

mod memory;

pub use memory::MemoryStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// Key protocol: access-token blacklist entry.
#[must_use]
pub fn blacklist_key(jti: &str) -> String {
    format!("blacklist:{jti}")
}

/// Key protocol: server-side refresh token record.
#[must_use]
pub fn refresh_token_key(opaque: &str) -> String {
    format!("refresh_token:{opaque}")
}

/// Key protocol: one-time SSO anti-CSRF state.
#[must_use]
pub fn sso_state_key(state: &str) -> String {
    format!("sso:state:{state}")
}

/// TTL key-value store used for revocation and session bookkeeping.
///
/// Implementations may block/suspend on I/O; callers must not hold an
/// in-process lock across these calls. Unreachability surfaces as
/// [`crate::Error::StoreUnavailable`].
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value. Expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value with a TTL, overwriting any existing entry.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Write a value with a TTL only if the key is absent.
    /// Returns `false` (and leaves the existing entry intact) otherwise.
    async fn set_ex_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Whether a live entry exists for the key.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete an entry. Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomically remove and return the value. Two concurrent `take`s of the
    /// same key observe it at most once between them.
    async fn take(&self, key: &str) -> Result<Option<String>>;
}
