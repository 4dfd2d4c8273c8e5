use super::{Cache, CacheKey};
use anyhow::Result;
use async_trait::async_trait;
use std::{collections::HashMap, time::Duration};
use tokio::{sync::Mutex, time::Instant};

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process cache for single-instance deployments and tests.
pub struct MemoryCache {
    prefix: String,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Namespaced keys of live entries, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(&key.namespaced(&self.prefix))
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &CacheKey, value: String, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.is_live(now));
        entries.insert(
            key.namespaced(&self.prefix),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn take(&self, key: &CacheKey) -> Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        Ok(entries
            .remove(&key.namespaced(&self.prefix))
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value))
    }

    async fn delete(&self, key: &CacheKey) -> Result<()> {
        self.entries
            .lock()
            .await
            .remove(&key.namespaced(&self.prefix));
        Ok(())
    }
}
