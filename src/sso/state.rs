//! One-time anti-CSRF state for the login redirect.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;

use crate::store::{KeyValueStore, sso_state_key};
use crate::{Error, Result};

/// Issues and consumes one-time login states.
///
/// A state lives in the key-value store under a short TTL and is removed
/// atomically on first presentation, so a replayed or forged callback fails
/// with [`Error::StaleSsoState`] before any provider call is made.
pub struct StateStore {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl StateStore {
    /// Create a state store with the given lifetime per state.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Mint a fresh state bound to the caller's redirect URI.
    pub async fn create(&self, redirect_uri: &str) -> Result<String> {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let state = URL_SAFE_NO_PAD.encode(bytes);
        self.store
            .set_ex(&sso_state_key(&state), redirect_uri, self.ttl)
            .await?;
        Ok(state)
    }

    /// Consume a state exactly once, yielding the redirect URI it was bound
    /// to. Absent, expired, or already-consumed states all fail identically.
    pub async fn consume(&self, state: &str) -> Result<String> {
        self.store
            .take(&sso_state_key(state))
            .await?
            .ok_or(Error::StaleSsoState)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn store() -> StateStore {
        StateStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(300))
    }

    #[tokio::test]
    async fn state_yields_its_redirect_uri_exactly_once() {
        let states = store();
        let state = states.create("https://app.example.com/cb").await.unwrap();

        let redirect = states.consume(&state).await.unwrap();
        assert_eq!(redirect, "https://app.example.com/cb");
        let replay = states.consume(&state).await;
        assert!(matches!(replay, Err(Error::StaleSsoState)));
    }

    #[tokio::test]
    async fn unknown_state_is_stale() {
        let states = store();
        let result = states.consume("never-issued").await;
        assert!(matches!(result, Err(Error::StaleSsoState)));
    }

    #[tokio::test]
    async fn expired_state_is_stale() {
        let states = StateStore::new(Arc::new(MemoryStore::new()), Duration::from_millis(10));
        let state = states.create("https://app.example.com/cb").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let result = states.consume(&state).await;
        assert!(matches!(result, Err(Error::StaleSsoState)));
    }

    #[tokio::test]
    async fn concurrent_consumption_has_one_winner() {
        let states = Arc::new(store());
        let state = states.create("https://app.example.com/cb").await.unwrap();

        let (a, b) = tokio::join!(states.consume(&state), states.consume(&state));
        assert_eq!(usize::from(a.is_ok()) + usize::from(b.is_ok()), 1);
    }
}
