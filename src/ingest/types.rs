// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};

/// One parsed feed document, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFeed {
    pub title: Option<String>,
    pub entries: Vec<RawEntry>,
}

/// One feed entry as found in the document. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: Option<String>,     // already resolved permalink candidate
    pub published: Option<DateTime<Utc>>,
    pub summary: Option<String>, // raw, may contain HTML
}

/// Canonical item ready for the upsert writer.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct NormalizedItem {
    pub url: String,
    pub title: String,
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub summary: Option<String>,
    pub lang: String, // heuristic, see `detect_lang`
}

#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<RawFeed>;
    /// Configured endpoint; also the fallback display name.
    fn endpoint(&self) -> &str;
}
