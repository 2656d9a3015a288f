//! Remote cache tier
//!
//! A shared key/value service (Redis, Memcached, ...) sitting in front of
//! the local map. The cache manager connects once at startup; when that
//! fails it runs local-only for the rest of the process lifetime.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Remote key/value store used as the first cache tier
#[async_trait]
pub trait RemoteCacheStore: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        "remote"
    }

    /// Establish the connection. Called once by `CacheManager::initialize`.
    async fn connect(&self) -> Result<()>;

    /// Fetch a payload; expired keys read as `None`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a payload; `ttl_seconds == 0` means no expiry
    async fn set(&self, key: &str, payload: &str, ttl_seconds: u64) -> Result<()>;

    /// Remove a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Keys matching a glob pattern (`*`, `?`).
    ///
    /// Stores without key enumeration keep the default, and pattern
    /// invalidation then only reaches the local tier.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        Err(Error::unsupported(format!(
            "{} does not support key enumeration ({})",
            self.name(),
            pattern
        )))
    }

    /// Remove every key
    async fn flush(&self) -> Result<()>;
}
