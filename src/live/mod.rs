// src/live/mod.rs
//! Live event status delivery.
//!
//! [`LivePublisher`] owns the authoritative `{version, events}` snapshot. The
//! SSE endpoint in [`sse`] pushes it to browsers; [`client`] consumes either
//! the stream or the polling endpoint, driven by the state machine in
//! [`machine`].

pub mod client;
pub mod machine;
pub mod sse;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::store::LiveEventStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveEvent {
    pub id: String,
    pub name: String,
    pub start_at: DateTime<Utc>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

/// Version 0 means nothing has been loaded yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveSnapshot {
    pub version: u64,
    pub events: Arc<Vec<LiveEvent>>,
}

impl LiveSnapshot {
    pub fn is_loaded(&self) -> bool {
        self.version > 0
    }
}

/// Body of `GET /api/events/live` and of the `update` stream event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivePayload {
    pub data: Vec<LiveEvent>,
    pub version: u64,
}

impl From<&LiveSnapshot> for LivePayload {
    fn from(s: &LiveSnapshot) -> Self {
        Self {
            data: s.events.as_ref().clone(),
            version: s.version,
        }
    }
}

pub struct LivePublisher {
    store: Arc<dyn LiveEventStore>,
    tx: watch::Sender<LiveSnapshot>,
}

impl LivePublisher {
    pub fn new(store: Arc<dyn LiveEventStore>) -> Self {
        let (tx, _rx) = watch::channel(LiveSnapshot::default());
        Self { store, tx }
    }

    /// Re-read the live set. Returns whether the snapshot changed; the
    /// version moves only then.
    pub async fn refresh(&self) -> Result<bool> {
        let events = self
            .store
            .live_events()
            .await
            .context("loading live events")?;
        let changed = self.tx.send_if_modified(|snap| {
            if snap.is_loaded() && *snap.events == events {
                return false;
            }
            snap.version += 1;
            snap.events = Arc::new(events);
            true
        });
        if changed {
            let snap = self.tx.borrow();
            gauge!("live_events").set(snap.events.len() as f64);
            counter!("live_versions_total").increment(1);
            tracing::info!(target: "live", version = snap.version, events = snap.events.len(), "live set changed");
        }
        Ok(changed)
    }

    /// Latest published snapshot, possibly not loaded yet.
    pub fn snapshot(&self) -> LiveSnapshot {
        self.tx.borrow().clone()
    }

    /// Latest snapshot, loading it first if nothing has been published.
    pub async fn current(&self) -> Result<LiveSnapshot> {
        let snap = self.snapshot();
        if snap.is_loaded() {
            return Ok(snap);
        }
        self.refresh().await?;
        Ok(self.snapshot())
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveSnapshot> {
        self.tx.subscribe()
    }

    pub fn spawn_refresh(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh().await {
                    tracing::warn!(target: "live", error = ?e, "live refresh failed; keeping last snapshot");
                }
            }
        })
    }
}
