// src/cache/mod.rs
mod memory;
mod redis;
mod store;

pub use self::memory::MemoryCacheStore;
pub use self::redis::RedisCacheStore;
pub use store::{CacheError, CacheStore};

use crate::config::{CacheBackend, CacheConfig, RedisConfig};
use std::sync::Arc;
use tracing::{info, warn};

/// Build the shared cache store selected by configuration.
///
/// An unreachable Redis at startup does not stop the gateway: the cache is an
/// optimisation, so we fall back to a process-local store.
pub async fn create_cache_store(
    cache: &CacheConfig,
    redis: &RedisConfig,
) -> Arc<dyn CacheStore> {
    match cache.backend {
        CacheBackend::Memory => {
            info!("Using in-memory response cache");
            Arc::new(MemoryCacheStore::new())
        }
        CacheBackend::Redis => match RedisCacheStore::connect(redis).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, falling back to in-memory response cache");
                Arc::new(MemoryCacheStore::new())
            }
        },
    }
}
