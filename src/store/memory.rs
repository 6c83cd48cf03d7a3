//! In-process key-value store with per-entry TTL.
//!
//! Backs tests and single-node deployments; a networked store (e.g. Redis)
//! is a drop-in behind the same trait. Expired entries are evicted lazily on
//! read rather than by a background sweeper.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::KeyValueStore;
use crate::Result;

/// Thread-safe in-memory TTL store.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

struct Entry {
    value: String,
    deadline: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                deadline: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_ex_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        // entry API holds the shard lock, making the check-then-insert atomic
        let mut inserted = false;
        self.entries
            .entry(key.to_string())
            .and_modify(|existing| {
                if existing.is_expired() {
                    existing.value = value.to_string();
                    existing.deadline = Instant::now() + ttl;
                    inserted = true;
                }
            })
            .or_insert_with(|| {
                inserted = true;
                Entry {
                    value: value.to_string(),
                    deadline: Instant::now() + ttl,
                }
            });
        Ok(inserted)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match self.entries.remove(key) {
            Some((_, entry)) => Ok(!entry.is_expired()),
            None => Ok(false),
        }
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        match self.entries.remove(key) {
            Some((_, entry)) if !entry.is_expired() => Ok(Some(entry.value)),
            _ => Ok(None),
        }
    }
}
