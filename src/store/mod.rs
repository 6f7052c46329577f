// src/store/mod.rs
//! Storage contract consumed by the ingestion and read paths.
//!
//! The durable engine lives outside this crate; everything here talks to it
//! through [`NewsStore`] and [`LiveEventStore`]. The in-memory backends in
//! [`memory`] implement the same contract for the binary and for tests.

pub mod memory;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::ingest::types::NormalizedItem;
use crate::live::LiveEvent;

pub use memory::{MemoryLiveEventStore, MemoryNewsStore};

/// Hard cap on page size for news queries.
pub const MAX_PAGE_SIZE: u32 = 50;
/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: u32 = 20;
/// Upper bound on the number of events reported as live at once.
pub const MAX_LIVE_EVENTS: usize = 20;

/// A persisted news entry. Identity is `url` (the permalink).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    pub id: String,
    pub url: String,
    pub title: String,
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub summary: Option<String>,
    pub tags: BTreeSet<String>,
    pub lang: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewsItem {
    /// Fresh record for a permalink seen for the first time. Tags start empty.
    pub fn create(item: &NormalizedItem, now: DateTime<Utc>) -> Self {
        Self {
            id: item_id(&item.url),
            url: item.url.clone(),
            title: item.title.clone(),
            source: item.source.clone(),
            published_at: item.published_at,
            summary: item.summary.clone(),
            tags: BTreeSet::new(),
            lang: item.lang.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite the mutable fields from a re-ingested entry.
    /// `id`, `tags` and `created_at` are kept.
    pub fn apply_update(&mut self, item: &NormalizedItem, now: DateTime<Utc>) {
        self.title = item.title.clone();
        self.source = item.source.clone();
        self.published_at = item.published_at;
        self.summary = item.summary.clone();
        self.lang = item.lang.clone();
        self.updated_at = now;
    }
}

/// Stable short id derived from the permalink (first 8 bytes of SHA-256, hex).
pub fn item_id(url: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(url.as_bytes());
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Paginated query over news items, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsQuery {
    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
    pub source: Option<String>,
}

impl NewsQuery {
    /// Build a query from loosely validated inputs: `page` below 1 becomes 1,
    /// `limit` is clamped to `1..=MAX_PAGE_SIZE`, blank `source` is ignored.
    pub fn new(page: Option<i64>, limit: Option<i64>, source: Option<String>) -> Self {
        let page = page.unwrap_or(1).clamp(1, u32::MAX as i64) as u32;
        let limit = limit
            .unwrap_or(DEFAULT_PAGE_SIZE as i64)
            .clamp(1, MAX_PAGE_SIZE as i64) as u32;
        let source = source
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Self {
            page,
            limit,
            source,
        }
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1).saturating_mul(self.limit as usize)
    }
}

impl Default for NewsQuery {
    fn default() -> Self {
        Self::new(None, None, None)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewsPage {
    pub items: Vec<NewsItem>,
    /// Total matching the filter, ignoring pagination.
    pub total: usize,
}

#[async_trait::async_trait]
pub trait NewsStore: Send + Sync {
    /// Insert or update by permalink. Never creates a duplicate.
    async fn upsert(&self, item: &NormalizedItem) -> Result<UpsertOutcome>;
    async fn query(&self, query: &NewsQuery) -> Result<NewsPage>;
    /// Distinct source labels, sorted.
    async fn sources(&self) -> Result<Vec<String>>;
    async fn get(&self, url: &str) -> Result<Option<NewsItem>>;
}

/// Lifecycle of an event as tracked by storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventStatus {
    Scheduled,
    Live,
    Finished,
}

#[async_trait::async_trait]
pub trait LiveEventStore: Send + Sync {
    /// Current live set, newest start first, at most [`MAX_LIVE_EVENTS`].
    async fn live_events(&self) -> Result<Vec<LiveEvent>>;
}
