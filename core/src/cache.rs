//! Cache layer (C12): an optional key-value store with TTL, fronting
//! user preferences, guild role lists, and poll embed render inputs.
//! Every call site tolerates `cache_unavailable` and falls through to
//! the persistence layer — the cache is an accelerator, never a
//! source of truth. The in-memory fallback uses a plain
//! `Arc<Mutex<HashMap>>`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
    async fn delete(&self, key: &str);
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Fallback used whenever Redis is unreachable or not configured.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries.get(key).filter(|e| e.expires_at > Instant::now()).map(|e| e.value.clone())
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        self.entries.write().await.insert(key.to_string(), Entry { value, expires_at: Instant::now() + ttl });
    }

    async fn delete(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

pub struct RedisCache {
    manager: redis::aio::ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.manager.clone();
        match redis::AsyncCommands::get::<_, Option<String>>(&mut conn, key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(%e, key, "redis get failed, treating as cache miss");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let mut conn = self.manager.clone();
        let secs = ttl.as_secs().max(1);
        if let Err(e) = redis::AsyncCommands::set_ex::<_, _, ()>(&mut conn, key, value, secs).await {
            warn!(%e, key, "redis set failed, entry not cached");
        }
    }

    async fn delete(&self, key: &str) {
        let mut conn = self.manager.clone();
        if let Err(e) = redis::AsyncCommands::del::<_, ()>(&mut conn, key).await {
            warn!(%e, key, "redis delete failed");
        }
    }
}

/// Degrades to a no-op cache (every get misses) when neither Redis nor
/// the in-memory fallback is desired — used by tests that want cache
/// calls to be inert.
pub struct NullCache;

#[async_trait]
impl CacheBackend for NullCache {
    async fn get(&self, _key: &str) -> Option<String> {
        None
    }
    async fn set(&self, _key: &str, _value: String, _ttl: Duration) {}
    async fn delete(&self, _key: &str) {}
}

pub type SharedCache = Arc<dyn CacheBackend>;

pub mod keys {
    pub fn user_preference(user_id: &str) -> String {
        format!("user_pref:{user_id}")
    }

    pub fn guild_roles(guild_id: &str) -> String {
        format!("guild_roles:{guild_id}")
    }

    pub fn poll_render_inputs(poll_id: i64) -> String {
        format!("poll_render:{poll_id}")
    }
}
