// src/cache/redis.rs
use super::store::{CacheError, CacheStore};
use crate::config::RedisConfig;
use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info};

/// Redis-backed cache store shared by every gateway worker.
///
/// The connection is opened by `connect` and released by `shutdown`. Every
/// command is bounded by the configured command timeout so a stalled Redis
/// can only ever degrade requests into cache misses.
pub struct RedisCacheStore {
    conn: RwLock<Option<ConnectionManager>>,
    command_timeout: Duration,
    address: String,
}

impl RedisCacheStore {
    pub async fn connect(config: &RedisConfig) -> Result<Self, CacheError> {
        let address = format!("{}:{}", config.host, config.port);
        info!(%address, db = config.db, "Connecting to Redis");

        let client = redis::Client::open(config.url())
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        let manager = timeout(config.connect_timeout(), ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Timeout(config.connect_timeout()))?
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        Ok(Self {
            conn: RwLock::new(Some(manager)),
            command_timeout: config.command_timeout(),
            address,
        })
    }

    async fn run<T, F, Fut>(&self, op: F) -> Result<T, CacheError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        // ConnectionManager is a cheap handle onto a multiplexed connection.
        let conn = self.conn.read().await.clone().ok_or(CacheError::Closed)?;

        match timeout(self.command_timeout, op(conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::Backend(e.to_string())),
            Err(_) => Err(CacheError::Timeout(self.command_timeout)),
        }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let value = self
            .run(|mut conn| async move { conn.get::<_, Option<Vec<u8>>>(key).await })
            .await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let ttl_ms = ttl.as_millis().max(1) as u64;
        self.run(|mut conn| async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value.as_ref()).arg("PX").arg(ttl_ms);
            cmd.query_async::<_, ()>(&mut conn).await
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.run(|mut conn| async move { conn.del::<_, ()>(key).await })
            .await
    }

    async fn shutdown(&self) {
        if self.conn.write().await.take().is_some() {
            debug!(address = %self.address, "Closed Redis connection");
        }
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::create_cache_store;
    use crate::config::{CacheBackend, CacheConfig};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::Instant;

    /// Local RESP peer that acknowledges every command with `+OK` except
    /// `GET`, which it never answers.
    async fn stalling_redis() -> RedisConfig {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    loop {
                        let n = match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        buf.extend_from_slice(&chunk[..n]);
                        while let Some((name, used)) = next_command(&buf) {
                            buf.drain(..used);
                            if name.eq_ignore_ascii_case("GET") {
                                continue;
                            }
                            if socket.write_all(b"+OK\r\n").await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });

        RedisConfig {
            host: "127.0.0.1".to_string(),
            port,
            command_timeout_ms: 100,
            ..RedisConfig::default()
        }
    }

    /// Name and encoded length of the first complete RESP array in `buf`.
    fn next_command(buf: &[u8]) -> Option<(String, usize)> {
        let mut pos = 0;
        let count: usize = read_line(buf, &mut pos)?.strip_prefix('*')?.parse().ok()?;
        let mut name = String::new();
        for i in 0..count {
            let len: usize = read_line(buf, &mut pos)?.strip_prefix('$')?.parse().ok()?;
            if buf.len() < pos + len + 2 {
                return None;
            }
            if i == 0 {
                name = String::from_utf8_lossy(&buf[pos..pos + len]).into_owned();
            }
            pos += len + 2;
        }
        Some((name, pos))
    }

    fn read_line<'a>(buf: &'a [u8], pos: &mut usize) -> Option<&'a str> {
        let rest = &buf[*pos..];
        let end = rest.windows(2).position(|w| w == b"\r\n")?;
        let line = std::str::from_utf8(&rest[..end]).ok()?;
        *pos += end + 2;
        Some(line)
    }

    fn unreachable_redis() -> RedisConfig {
        RedisConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout_ms: 200,
            ..RedisConfig::default()
        }
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_redis_fails() {
        assert!(RedisCacheStore::connect(&unreachable_redis()).await.is_err());
    }

    #[tokio::test]
    async fn test_factory_falls_back_to_memory() {
        let cache = CacheConfig {
            backend: CacheBackend::Redis,
            ..CacheConfig::default()
        };
        let store = create_cache_store(&cache, &unreachable_redis()).await;
        assert_eq!(store.name(), "memory");
    }

    #[tokio::test]
    async fn test_stalled_command_times_out() {
        let config = stalling_redis().await;
        let store = RedisCacheStore::connect(&config).await.unwrap();

        let started = Instant::now();
        let result = store.get("user_service:users/1").await;

        assert!(matches!(result, Err(CacheError::Timeout(t)) if t == Duration::from_millis(100)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_commands_after_shutdown_are_closed() {
        let config = stalling_redis().await;
        let store = RedisCacheStore::connect(&config).await.unwrap();

        store.shutdown().await;

        assert!(matches!(store.get("k").await, Err(CacheError::Closed)));
        assert!(matches!(store.delete("k").await, Err(CacheError::Closed)));
    }
}
