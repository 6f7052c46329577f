// src/translate/cache.rs
//! TTL cache for translated titles.
//!
//! Entries are derived state: dropping any of them only costs a provider
//! call on the next read. Callers pass the clock explicitly so expiry is
//! deterministic in tests.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const DEFAULT_SHARDS: usize = 16;

/// (permalink, publish timestamp, target language). A new timestamp or a
/// different language is a different key, so stale entries are never hit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub permalink: String,
    pub published_ms: i64,
    pub lang: String,
}

impl CacheKey {
    pub fn new(permalink: &str, published_at: DateTime<Utc>, lang: &str) -> Self {
        Self {
            permalink: permalink.to_string(),
            published_ms: published_at.timestamp_millis(),
            lang: lang.to_string(),
        }
    }
}

pub trait TranslationCache: Send + Sync {
    /// Value for `key` if it has not expired at `now`.
    fn get(&self, key: &CacheKey, now: Instant) -> Option<String>;
    fn put(&self, key: CacheKey, value: String, expires_at: Instant);
    /// Drop everything expired at `now`; returns how many entries went.
    fn evict_expired(&self, now: Instant) -> usize;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn clear(&self);
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// In-process cache split into independently locked shards.
#[derive(Debug)]
pub struct ShardedTtlCache {
    shards: Vec<RwLock<HashMap<CacheKey, CacheEntry>>>,
}

impl Default for ShardedTtlCache {
    fn default() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }
}

impl ShardedTtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shards(n: usize) -> Self {
        let n = n.max(1);
        Self {
            shards: (0..n).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &CacheKey) -> &RwLock<HashMap<CacheKey, CacheEntry>> {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        &self.shards[(h.finish() as usize) % self.shards.len()]
    }
}

impl TranslationCache for ShardedTtlCache {
    fn get(&self, key: &CacheKey, now: Instant) -> Option<String> {
        let shard = self.shard(key).read();
        shard
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone())
    }

    fn put(&self, key: CacheKey, value: String, expires_at: Instant) {
        self.shard(&key)
            .write()
            .insert(key, CacheEntry { value, expires_at });
    }

    fn evict_expired(&self, now: Instant) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut guard = shard.write();
            let before = guard.len();
            guard.retain(|_, e| e.expires_at > now);
            removed += before - guard.len();
        }
        removed
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }
}

/// Periodically sweep expired entries so the map does not grow without bound.
pub fn spawn_evictor(cache: Arc<dyn TranslationCache>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let removed = cache.evict_expired(Instant::now());
            if removed > 0 {
                tracing::debug!(target: "translate", removed, remaining = cache.len(), "evicted expired translations");
            }
        }
    })
}
