// tests/ingest_pipeline.rs
//
// End-to-end ingest: fixture/HTTP sources → normalize → upsert into the
// in-memory store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{http::StatusCode, routing::get, Router};
use chrono::{TimeZone, Utc};
use rand::seq::SliceRandom;

use mma_newswire::config::TranslatorConfig;
use mma_newswire::ingest::providers::rss::RssFeedSource;
use mma_newswire::ingest::types::{FeedSource, NormalizedItem, RawFeed};
use mma_newswire::ingest::writer::write_batch;
use mma_newswire::ingest::run_once;
use mma_newswire::store::{
    MemoryNewsStore, NewsPage, NewsQuery, NewsStore, UpsertOutcome,
};
use mma_newswire::translate::{Origin, ShardedTtlCache, TranslationService};

fn feed(title_a: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Test Feed</title>
  <item>
    <title>{title_a}</title>
    <link>https://x/a</link>
    <pubDate>Fri, 10 Jan 2025 09:00:00 +0000</pubDate>
  </item>
  <item>
    <title>No link here</title>
  </item>
</channel></rss>"#
    )
}

fn fixture(endpoint: &str, xml: &str) -> Box<dyn FeedSource> {
    Box::new(RssFeedSource::from_fixture(endpoint, xml))
}

struct Broken;

#[async_trait::async_trait]
impl FeedSource for Broken {
    async fn fetch(&self) -> Result<RawFeed> {
        anyhow::bail!("connection reset")
    }
    fn endpoint(&self) -> &str {
        "https://broken.example/rss"
    }
}

#[tokio::test]
async fn ingest_twice_updates_in_place_then_reads_untranslated() {
    let store = MemoryNewsStore::new();

    let report = run_once(&[fixture("https://x/rss", &feed("Test Win"))], &store).await;
    assert_eq!(report.writes.created, 1);
    assert_eq!(report.discarded, 1);
    assert_eq!(store.len(), 1);
    let first = store.get("https://x/a").await.unwrap().unwrap();

    let report = run_once(&[fixture("https://x/rss", &feed("Test Win II"))], &store).await;
    assert_eq!(report.writes.created, 0);
    assert_eq!(report.writes.updated, 1);
    assert_eq!(store.len(), 1, "no duplicate for the same permalink");

    let item = store.get("https://x/a").await.unwrap().unwrap();
    assert_eq!(item.title, "Test Win II");
    assert_eq!(item.id, first.id);
    assert_eq!(item.created_at, first.created_at);
    assert_eq!(
        item.published_at,
        Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap()
    );
    assert_eq!(item.source, "Test Feed");

    // No provider configured: the read hands back the stored title.
    let svc = TranslationService::from_config(
        &TranslatorConfig::default(),
        Arc::new(ShardedTtlCache::new()),
    )
    .unwrap();
    let out = svc.localize_item(&item, "sr-Latn").await;
    assert_eq!(out.text, "Test Win II");
    assert_eq!(out.origin, Origin::Original);
}

#[tokio::test]
async fn replaying_a_batch_is_idempotent() {
    let store = MemoryNewsStore::new();
    let sources = vec![fixture("https://x/rss", &feed("Test Win"))];
    for _ in 0..5 {
        run_once(&sources, &store).await;
    }
    assert_eq!(store.len(), 1);
    let page = store.query(&NewsQuery::default()).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].title, "Test Win");
}

fn batch(n: usize) -> Vec<NormalizedItem> {
    (0..n)
        .map(|i| NormalizedItem {
            url: format!("https://x/{i}"),
            title: format!("Story {i}"),
            source: if i % 2 == 0 { "Even" } else { "Odd" }.into(),
            published_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::minutes(i as i64),
            summary: None,
            lang: "en".into(),
        })
        .collect()
}

fn snapshot(page: &NewsPage) -> Vec<(String, String, String)> {
    page.items
        .iter()
        .map(|i| (i.url.clone(), i.title.clone(), i.source.clone()))
        .collect()
}

#[tokio::test]
async fn final_state_does_not_depend_on_order() {
    let items = batch(30);
    let ordered = MemoryNewsStore::new();
    write_batch(&ordered, &items).await;

    let mut shuffled_items = items.clone();
    shuffled_items.shuffle(&mut rand::rng());
    let shuffled = MemoryNewsStore::new();
    let report = write_batch(&shuffled, &shuffled_items).await;
    assert_eq!(report.created, 30);

    let q = NewsQuery::new(Some(1), Some(50), None);
    assert_eq!(
        snapshot(&ordered.query(&q).await.unwrap()),
        snapshot(&shuffled.query(&q).await.unwrap())
    );
}

#[tokio::test]
async fn failing_source_does_not_block_the_next() {
    let store = MemoryNewsStore::new();
    let sources: Vec<Box<dyn FeedSource>> = vec![
        Box::new(Broken),
        fixture("https://x/rss", &feed("Test Win")),
        fixture("https://x/garbage", "<html><body>not a feed</body></html>"),
    ];
    let report = run_once(&sources, &store).await;
    assert_eq!(report.sources_ok, 1);
    assert_eq!(report.sources_failed, 2);
    assert_eq!(store.len(), 1);
}

/// Rejects one permalink, delegates the rest.
struct PoisonedStore {
    inner: MemoryNewsStore,
    poison: &'static str,
}

#[async_trait::async_trait]
impl NewsStore for PoisonedStore {
    async fn upsert(&self, item: &NormalizedItem) -> Result<UpsertOutcome> {
        if item.url == self.poison {
            anyhow::bail!("constraint violation");
        }
        self.inner.upsert(item).await
    }
    async fn query(&self, query: &NewsQuery) -> Result<NewsPage> {
        self.inner.query(query).await
    }
    async fn sources(&self) -> Result<Vec<String>> {
        self.inner.sources().await
    }
    async fn get(&self, url: &str) -> Result<Option<mma_newswire::store::NewsItem>> {
        self.inner.get(url).await
    }
}

#[tokio::test]
async fn failing_item_does_not_block_the_rest() {
    let store = PoisonedStore {
        inner: MemoryNewsStore::new(),
        poison: "https://x/3",
    };
    let report = write_batch(&store, &batch(6)).await;
    assert_eq!(report.created, 5);
    assert_eq!(report.failed, 1);
    assert!(store.get("https://x/3").await.unwrap().is_none());
    assert!(store.get("https://x/5").await.unwrap().is_some());
}

#[tokio::test]
async fn bundled_sample_feed_ingests() {
    let xml = std::fs::read_to_string("fixtures/sample_rss.xml").unwrap();
    let store = MemoryNewsStore::new();
    let report = run_once(&[fixture("fixture://sample", &xml)], &store).await;
    assert_eq!(report.writes.created, 3);
    assert_eq!(report.discarded, 1);

    let sr = store
        .get("https://example.com/mma/djordjevic-povratak")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sr.lang, "sr");
    assert_eq!(sr.source, "MMA Newswire Sample");

    let champ = store
        .get("https://example.com/mma/champion-retains-title")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(champ.lang, "en");
    assert!(champ.summary.unwrap().starts_with("The champion survived"));
    assert!(store
        .get("https://example.com/mma/prospect-signs")
        .await
        .unwrap()
        .is_some());
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn http_sources_fetch_and_fail_independently() {
    let body = feed("Over HTTP");
    let app = Router::new()
        .route(
            "/ok.xml",
            get(move || {
                let body = body.clone();
                async move { body }
            }),
        )
        .route(
            "/down.xml",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
        )
        .route(
            "/slow.xml",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "late"
            }),
        );
    let base = serve(app).await;

    let timeout = Duration::from_millis(500);
    let sources: Vec<Box<dyn FeedSource>> = vec![
        Box::new(RssFeedSource::from_url(&format!("{base}/down.xml"), timeout).unwrap()),
        Box::new(RssFeedSource::from_url(&format!("{base}/slow.xml"), timeout).unwrap()),
        Box::new(RssFeedSource::from_url(&format!("{base}/ok.xml"), timeout).unwrap()),
    ];
    let store = MemoryNewsStore::new();
    let report = run_once(&sources, &store).await;

    assert_eq!(report.sources_failed, 2);
    assert_eq!(report.sources_ok, 1);
    let item = store.get("https://x/a").await.unwrap().unwrap();
    assert_eq!(item.title, "Over HTTP");
}
