//! Screenshot token service (C14): cryptographically strong, single-
//! use tokens bound to (poll_id, creator_id, expires_at), letting an
//! external screenshot renderer load an authenticated dashboard page
//! without replaying OAuth. Stored in the cache layer with TTL;
//! validation is atomic — a successful validation marks the token used
//! and schedules its deletion after a grace period for audit logging.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheBackend, SharedCache};
use crate::error::{PollyError, Result};

const TOKEN_BYTES: usize = 32; // 256 bits of entropy
const DEFAULT_TTL: Duration = Duration::from_secs(300);
const AUDIT_GRACE_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenRecord {
    poll_id: i64,
    creator_id: String,
    expires_at: DateTime<Utc>,
    used: bool,
}

pub struct TokenService {
    cache: SharedCache,
}

impl TokenService {
    pub fn new(cache: SharedCache) -> Self {
        Self { cache }
    }

    pub async fn issue(&self, poll_id: i64, creator_id: &str) -> Result<String> {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);

        let record = TokenRecord {
            poll_id,
            creator_id: creator_id.to_string(),
            expires_at: Utc::now() + ChronoDuration::from_std(DEFAULT_TTL).unwrap(),
            used: false,
        };
        let serialized = serde_json::to_string(&record)?;
        self.cache.set(&key(&token), serialized, DEFAULT_TTL).await;
        Ok(token)
    }

    /// Atomically validates and consumes `token`. A token may be
    /// validated exactly once; a second call returns `Unexpected`
    /// (treated by callers as "expired or already used").
    pub async fn validate(&self, token: &str, poll_id: i64) -> Result<String> {
        let cache_key = key(token);
        let raw = self.cache.get(&cache_key).await.ok_or_else(|| {
            PollyError::unexpected("screenshot token not found or expired")
        })?;
        let mut record: TokenRecord = serde_json::from_str(&raw)?;

        if record.used {
            return Err(PollyError::unexpected("screenshot token already used"));
        }
        if record.expires_at < Utc::now() {
            return Err(PollyError::unexpected("screenshot token expired"));
        }
        if record.poll_id != poll_id {
            return Err(PollyError::permission("screenshot token for a different poll"));
        }

        record.used = true;
        let serialized = serde_json::to_string(&record)?;
        self.cache.set(&cache_key, serialized, AUDIT_GRACE_PERIOD).await;

        Ok(record.creator_id)
    }
}

fn key(token: &str) -> String {
    format!("screenshot_token:{token}")
}

pub fn in_memory_for_tests() -> TokenService {
    TokenService::new(Arc::new(crate::cache::InMemoryCache::new()) as SharedCache)
}
