// src/store/memory.rs
use anyhow::Result;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

use super::{
    EventStatus, LiveEventStore, NewsItem, NewsPage, NewsQuery, NewsStore, UpsertOutcome,
    MAX_LIVE_EVENTS,
};
use crate::ingest::types::NormalizedItem;
use crate::live::LiveEvent;

/// News items keyed by permalink.
#[derive(Debug, Default)]
pub struct MemoryNewsStore {
    items: RwLock<HashMap<String, NewsItem>>,
}

impl MemoryNewsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Attach a tag to an existing item. Returns false for unknown permalinks.
    pub fn tag(&self, url: &str, tag: &str) -> bool {
        match self.items.write().get_mut(url) {
            Some(item) => {
                item.tags.insert(tag.to_string());
                true
            }
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl NewsStore for MemoryNewsStore {
    async fn upsert(&self, item: &NormalizedItem) -> Result<UpsertOutcome> {
        let now = Utc::now();
        let mut guard = self.items.write();
        match guard.get_mut(&item.url) {
            Some(existing) => {
                existing.apply_update(item, now);
                Ok(UpsertOutcome::Updated)
            }
            None => {
                guard.insert(item.url.clone(), NewsItem::create(item, now));
                Ok(UpsertOutcome::Created)
            }
        }
    }

    async fn query(&self, query: &NewsQuery) -> Result<NewsPage> {
        let guard = self.items.read();
        let mut matching: Vec<&NewsItem> = guard
            .values()
            .filter(|it| match &query.source {
                Some(s) => &it.source == s,
                None => true,
            })
            .collect();
        matching.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then_with(|| a.url.cmp(&b.url))
        });

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(query.offset())
            .take(query.limit as usize)
            .cloned()
            .collect();
        Ok(NewsPage { items, total })
    }

    async fn sources(&self) -> Result<Vec<String>> {
        let guard = self.items.read();
        let set: BTreeSet<String> = guard
            .values()
            .map(|it| it.source.clone())
            .filter(|s| !s.is_empty())
            .collect();
        Ok(set.into_iter().collect())
    }

    async fn get(&self, url: &str) -> Result<Option<NewsItem>> {
        Ok(self.items.read().get(url).cloned())
    }
}

#[derive(Debug, Clone)]
struct TrackedEvent {
    event: LiveEvent,
    status: EventStatus,
}

/// Events with their status; the live set is derived on read.
#[derive(Debug, Default)]
pub struct MemoryLiveEventStore {
    events: RwLock<HashMap<String, TrackedEvent>>,
}

impl MemoryLiveEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_event(&self, event: LiveEvent, status: EventStatus) {
        self.events
            .write()
            .insert(event.id.clone(), TrackedEvent { event, status });
    }

    /// Returns false when the id is unknown.
    pub fn set_status(&self, id: &str, status: EventStatus) -> bool {
        match self.events.write().get_mut(id) {
            Some(t) => {
                t.status = status;
                true
            }
            None => false,
        }
    }

    /// Drop a cancelled event entirely. Returns false when the id is unknown.
    pub fn remove(&self, id: &str) -> bool {
        self.events.write().remove(id).is_some()
    }
}

#[async_trait::async_trait]
impl LiveEventStore for MemoryLiveEventStore {
    async fn live_events(&self) -> Result<Vec<LiveEvent>> {
        let guard = self.events.read();
        let mut live: Vec<LiveEvent> = guard
            .values()
            .filter(|t| t.status == EventStatus::Live)
            .map(|t| t.event.clone())
            .collect();
        live.sort_by(|a, b| b.start_at.cmp(&a.start_at).then_with(|| a.id.cmp(&b.id)));
        live.truncate(MAX_LIVE_EVENTS);
        Ok(live)
    }
}
