//! Secondary storage: an optional key-value layer (Redis-class) used for
//! session caching and rate-limit counters.

use crate::error::AuthResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// A TTL-aware key-value store.
#[async_trait]
pub trait SecondaryStorage: Send + Sync {
    async fn get(&self, key: &str) -> AuthResult<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AuthResult<()>;
    async fn delete(&self, key: &str) -> AuthResult<()>;
}

/// In-memory secondary storage, for tests and single-process deployments.
#[derive(Default)]
pub struct MemorySecondaryStorage {
    entries: RwLock<HashMap<String, (String, Option<Instant>)>>,
}

impl MemorySecondaryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecondaryStorage for MemorySecondaryStorage {
    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).and_then(|(value, deadline)| {
            match deadline {
                Some(deadline) if *deadline <= Instant::now() => None,
                _ => Some(value.clone()),
            }
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AuthResult<()> {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> AuthResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
