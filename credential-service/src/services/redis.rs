//! Key-value store with per-key TTL and atomic counters.
//!
//! Backs the revocation denylist, revocation watermarks and rate-limit
//! counters.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use redis::{aio::ConnectionManager, Client};
use tokio::time::{Duration, Instant};

/// Counter state after an atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub count: u64,
    /// Seconds until the counter window resets.
    pub ttl_seconds: u64,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64)
    -> Result<(), anyhow::Error>;
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    async fn exists(&self, key: &str) -> Result<bool, anyhow::Error>;
    async fn delete(&self, key: &str) -> Result<(), anyhow::Error>;
    /// Increment `key`, starting its expiry window on the first hit. The
    /// increment and expiry are applied atomically.
    async fn incr_with_expiry(&self, key: &str, window_seconds: u64)
    -> Result<Counter, anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisService {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisService {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to get Redis connection manager");
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisService {
    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set {}: {}", key, e))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get {}: {}", key, e))
    }

    async fn exists(&self, key: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to check {}: {}", key, e))
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete {}: {}", key, e))
    }

    async fn incr_with_expiry(
        &self,
        key: &str,
        window_seconds: u64,
    ) -> Result<Counter, anyhow::Error> {
        let mut conn = self.manager.clone();
        // EXPIRE NX only sets the window on the first increment.
        let (count, ttl): (u64, i64) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(window_seconds)
            .arg("NX")
            .ignore()
            .cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to increment {}: {}", key, e))?;

        Ok(Counter {
            count,
            ttl_seconds: ttl.max(0) as u64,
        })
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Every this many writes the whole map is swept for expired keys.
const SWEEP_EVERY: u64 = 256;

/// In-process `KeyValueStore`. Expired keys are evicted when read and by a
/// periodic sweep on writes, so keys nobody reads again still go away.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: DashMap<String, Entry>,
    writes: AtomicU64,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Must not be called while holding a guard into `entries`.
    fn after_write(&self, now: Instant) {
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.entries.retain(|_, e| e.is_live(now));
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let now = Instant::now();
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + Duration::from_secs(ttl_seconds.max(1)),
            },
        );
        self.after_write(now);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone());
        if value.is_none() {
            self.entries.remove_if(key, |_, e| !e.is_live(now));
        }
        Ok(value)
    }

    async fn exists(&self, key: &str) -> Result<bool, anyhow::Error> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        self.entries.remove(key);
        Ok(())
    }

    async fn incr_with_expiry(
        &self,
        key: &str,
        window_seconds: u64,
    ) -> Result<Counter, anyhow::Error> {
        let now = Instant::now();
        let window = Duration::from_secs(window_seconds.max(1));

        // The shard lock held by `entry` makes read-increment-write atomic.
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: now + window,
        });
        if !entry.is_live(now) {
            entry.value = "0".to_string();
            entry.expires_at = now + window;
        }
        let count = entry.value.parse::<u64>().unwrap_or(0) + 1;
        entry.value = count.to_string();
        let ttl_seconds = entry.expires_at.saturating_duration_since(now).as_secs();
        drop(entry);

        self.after_write(now);
        Ok(Counter { count, ttl_seconds })
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryKeyValueStore::new();
        store.set_with_ttl("k", "v", 60).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.exists("k").await.unwrap());

        store.delete("k").await.unwrap();
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store = MemoryKeyValueStore::new();
        store.set_with_ttl("k", "v", 5).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unread_expired_keys_are_swept() {
        let store = MemoryKeyValueStore::new();
        for i in 0..10 {
            store
                .set_with_ttl(&format!("revoked:jti:{}", i), "1", 5)
                .await
                .unwrap();
        }

        tokio::time::advance(Duration::from_secs(6)).await;
        for _ in 0..SWEEP_EVERY {
            store.incr_with_expiry("ratelimit:login:ip", 60).await.unwrap();
        }

        assert_eq!(store.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.incr_with_expiry("ratelimit:test", 60).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let last = store.incr_with_expiry("ratelimit:test", 60).await.unwrap();
        assert_eq!(last.count, 51);
        assert!(last.ttl_seconds <= 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_window_resets() {
        let store = MemoryKeyValueStore::new();
        store.incr_with_expiry("c", 10).await.unwrap();
        store.incr_with_expiry("c", 10).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        let counter = store.incr_with_expiry("c", 10).await.unwrap();
        assert_eq!(counter.count, 1);
    }
}
