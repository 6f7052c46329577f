// src/ingest/scheduler.rs
use anyhow::{Context, Result};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ingest::providers::rss::{RssFeedSource, USER_AGENT};
use crate::ingest::types::FeedSource;
use crate::ingest::{run_once, IngestReport};
use crate::store::NewsStore;

#[derive(Clone, Copy, Debug)]
pub struct IngestSchedulerCfg {
    pub interval: Duration,
}

impl IngestSchedulerCfg {
    pub fn from_millis(ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(ms.max(1)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Ran(IngestReport),
    /// Another tick was still running.
    Skipped,
}

/// Owns the configured sources and the store they feed. At most one tick
/// runs at a time, whoever triggers it.
pub struct Ingestor {
    sources: Vec<Box<dyn FeedSource>>,
    store: Arc<dyn NewsStore>,
    running: Mutex<()>,
}

impl Ingestor {
    pub fn new(sources: Vec<Box<dyn FeedSource>>, store: Arc<dyn NewsStore>) -> Self {
        Self {
            sources,
            store,
            running: Mutex::new(()),
        }
    }

    /// HTTP sources sharing one client with a bounded timeout.
    pub fn from_endpoints(
        endpoints: &[String],
        fetch_timeout: Duration,
        store: Arc<dyn NewsStore>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(fetch_timeout.min(Duration::from_secs(5)))
            .timeout(fetch_timeout)
            .build()
            .context("building feed http client")?;
        let sources = endpoints
            .iter()
            .map(|url| Box::new(RssFeedSource::with_client(url, client.clone())) as Box<dyn FeedSource>)
            .collect();
        Ok(Self::new(sources, store))
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub async fn tick(&self) -> TickOutcome {
        let Ok(_guard) = self.running.try_lock() else {
            counter!("ingest_ticks_skipped_total").increment(1);
            tracing::debug!(target: "ingest", "tick skipped: previous tick still running");
            return TickOutcome::Skipped;
        };
        TickOutcome::Ran(run_once(&self.sources, self.store.as_ref()).await)
    }
}

/// Run a tick right away, then every `cfg.interval`. Late ticks are skipped,
/// never bunched up.
pub fn spawn_scheduler(ingestor: Arc<Ingestor>, cfg: IngestSchedulerCfg) -> JoinHandle<()> {
    tracing::info!(
        target: "ingest",
        sources = ingestor.source_count(),
        interval_ms = cfg.interval.as_millis() as u64,
        "ingest scheduler started"
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cfg.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match ingestor.tick().await {
                TickOutcome::Ran(report) => {
                    counter!("ingest_runs_total").increment(1);
                    tracing::info!(
                        target: "ingest",
                        sources_ok = report.sources_ok,
                        sources_failed = report.sources_failed,
                        created = report.writes.created,
                        updated = report.writes.updated,
                        failed = report.writes.failed,
                        discarded = report.discarded,
                        "ingest tick"
                    );
                }
                TickOutcome::Skipped => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::RawFeed;
    use crate::store::MemoryNewsStore;
    use tokio::sync::Notify;

    /// Blocks inside `fetch` until released.
    struct GateSource {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait::async_trait]
    impl FeedSource for GateSource {
        async fn fetch(&self) -> Result<RawFeed> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(RawFeed::default())
        }
        fn endpoint(&self) -> &str {
            "gate"
        }
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let ingestor = Arc::new(Ingestor::new(
            vec![Box::new(GateSource {
                entered: entered.clone(),
                release: release.clone(),
            })],
            Arc::new(MemoryNewsStore::new()),
        ));

        let first = {
            let ing = ingestor.clone();
            tokio::spawn(async move { ing.tick().await })
        };
        entered.notified().await;

        assert_eq!(ingestor.tick().await, TickOutcome::Skipped);

        release.notify_one();
        match first.await.unwrap() {
            TickOutcome::Ran(report) => assert_eq!(report.sources_ok, 1),
            TickOutcome::Skipped => panic!("first tick must run"),
        }
    }
}
