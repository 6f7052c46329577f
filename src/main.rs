//! MMA newswire service: binary entrypoint.
//! Loads configuration, starts the background jobs (ingest, cache eviction,
//! live refresh) and serves the HTTP API.

use std::sync::Arc;
use std::time::Duration;

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mma_newswire::config::AppConfig;
use mma_newswire::ingest::providers::rss::RssFeedSource;
use mma_newswire::ingest::scheduler::{spawn_scheduler, IngestSchedulerCfg, Ingestor};
use mma_newswire::ingest::types::FeedSource;
use mma_newswire::live::LivePublisher;
use mma_newswire::metrics::Metrics;
use mma_newswire::store::{MemoryLiveEventStore, MemoryNewsStore, NewsStore};
use mma_newswire::translate::cache::spawn_evictor;
use mma_newswire::translate::{ShardedTtlCache, TranslationCache, TranslationService};
use mma_newswire::{router, AppState};

const SAMPLE_FEED: &str = include_str!("../fixtures/sample_rss.xml");
const EVICT_EVERY: Duration = Duration::from_secs(5 * 60);

/// Compact logs by default, one JSON object per line with `LOG_FORMAT=json`.
/// A subscriber installed by the hosting runtime wins.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ingest=info,translate=info,live=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::from_env()?;

    // The recorder goes in before anything records or describes a series.
    let sources = cfg.ingest.sources.len().max(1);
    let metrics = Metrics::init(cfg.translate.cache_ttl.as_secs(), sources)
        .inspect_err(|e| tracing::warn!(error = ?e, "metrics disabled"))
        .ok();

    let news: Arc<dyn NewsStore> = Arc::new(MemoryNewsStore::new());
    let live_store = Arc::new(MemoryLiveEventStore::new());

    // --- Ingest ---
    let ingestor = if cfg.ingest.sources.is_empty() {
        tracing::warn!(target: "ingest", "no feed sources configured; serving the bundled sample feed");
        let sample: Box<dyn FeedSource> =
            Box::new(RssFeedSource::from_fixture("fixture://sample", SAMPLE_FEED));
        Ingestor::new(vec![sample], news.clone())
    } else {
        Ingestor::from_endpoints(&cfg.ingest.sources, cfg.ingest.fetch_timeout, news.clone())?
    };
    spawn_scheduler(
        Arc::new(ingestor),
        IngestSchedulerCfg::from_millis(cfg.ingest.interval_ms),
    );

    // --- Translation ---
    let cache: Arc<dyn TranslationCache> = Arc::new(ShardedTtlCache::new());
    spawn_evictor(cache.clone(), EVICT_EVERY);
    let translator = Arc::new(TranslationService::from_config(&cfg.translate, cache)?);

    // --- Live ---
    let live = Arc::new(LivePublisher::new(live_store));
    live.clone().spawn_refresh(cfg.live.refresh);

    let state = AppState {
        news,
        translator,
        live,
        default_lang: cfg.translate.target_lang.clone(),
        heartbeat: cfg.live.heartbeat,
    };
    let mut app = router(state);
    if let Some(metrics) = &metrics {
        app = app.merge(metrics.router());
    }

    Ok(app.into())
}
