// src/cache/store.rs
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("cache store is closed")]
    Closed,
}

/// Key/value store with per-entry expiration shared by all route handlers.
///
/// Implementations must be safe to call concurrently without external locking.
/// An expired entry is indistinguishable from one that was never set.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Unconditionally overwrites any previous value under `key`.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Evict expired entries from stores that do not expire them on their
    /// own, returning how many were removed.
    fn purge_expired(&self) -> usize {
        0
    }

    /// Release connections held by the store. Later calls fail with `Closed`.
    async fn shutdown(&self) {}

    fn name(&self) -> &'static str;
}
