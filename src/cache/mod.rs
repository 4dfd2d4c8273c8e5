//! Short-lived shared state: system config snapshot, captcha codes, refresh
//! token rotation, revoked access tokens and job status.
//!
//! Keys are logical ([`CacheKey`]); every implementation stores them under
//! `<prefix>:<logical key>` and relies on expiry rather than locking for
//! cross-request coordination.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

mod memory;

pub use memory::MemoryCache;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    SystemConfig,
    Captcha(String),
    RefreshToken(String),
    /// Refresh token `jti` issued alongside an access token `jti`.
    SessionRefresh(String),
    RevokedToken(String),
    Job(String),
}

impl CacheKey {
    #[must_use]
    pub fn logical(&self) -> String {
        match self {
            Self::SystemConfig => "system_config:init_system_config".to_string(),
            Self::Captcha(key) => format!("captcha:{key}"),
            Self::RefreshToken(jti) => format!("token:refresh:{jti}"),
            Self::SessionRefresh(jti) => format!("token:session:{jti}"),
            Self::RevokedToken(jti) => format!("token:revoked:{jti}"),
            Self::Job(id) => format!("job:{id}"),
        }
    }

    #[must_use]
    pub fn namespaced(&self, prefix: &str) -> String {
        format!("{prefix}:{}", self.logical())
    }
}

#[async_trait]
pub trait Cache: Send + Sync {
    /// Value if present and not expired.
    async fn get(&self, key: &CacheKey) -> Result<Option<String>>;

    /// Store `value`, replacing any previous entry; it expires after `ttl`.
    async fn set(&self, key: &CacheKey, value: String, ttl: Duration) -> Result<()>;

    /// Atomically read and remove. Only one caller can observe a given entry.
    async fn take(&self, key: &CacheKey) -> Result<Option<String>>;

    async fn delete(&self, key: &CacheKey) -> Result<()>;
}

/// # Errors
/// Returns an error if the backend fails or the entry is not valid JSON for `T`.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &CacheKey) -> Result<Option<T>> {
    match cache.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .with_context(|| format!("corrupt cache entry: {}", key.logical())),
        None => Ok(None),
    }
}

/// # Errors
/// Returns an error if serialization or the backend fails.
pub async fn set_json<T: Serialize + Sync>(
    cache: &dyn Cache,
    key: &CacheKey,
    value: &T,
    ttl: Duration,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    cache.set(key, raw, ttl).await
}
