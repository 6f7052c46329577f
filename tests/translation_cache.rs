// tests/translation_cache.rs
//
// Cache + provider chain behavior as seen by readers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

use mma_newswire::config::{AzureConfig, LibreConfig, TranslatorConfig};
use mma_newswire::translate::azure::AzureTranslator;
use mma_newswire::translate::cache::spawn_evictor;
use mma_newswire::translate::libre::LibreTranslator;
use mma_newswire::translate::{
    CacheKey, Origin, ShardedTtlCache, TranslateError, TranslationCache, TranslationService,
    Translator,
};

const TTL: Duration = Duration::from_secs(12 * 60 * 60);

struct Counting {
    calls: AtomicUsize,
    delay: Duration,
}

impl Counting {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Translator for Counting {
    async fn translate(&self, text: &str, _to: &str) -> Result<String, TranslateError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(format!("{text} (prevod {n})"))
    }
    fn name(&self) -> &'static str {
        "counting"
    }
}

fn key() -> CacheKey {
    CacheKey::new(
        "https://x/a",
        Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap(),
        "sr-Latn",
    )
}

fn service(provider: Arc<Counting>, cache: Arc<dyn TranslationCache>) -> TranslationService {
    TranslationService::new(
        cache,
        vec![provider as Arc<dyn Translator>],
        TTL,
        Duration::from_secs(8),
    )
}

#[tokio::test(start_paused = true)]
async fn sequential_reads_within_ttl_call_once_then_expire() {
    let provider = Counting::new(Duration::ZERO);
    let svc = service(provider.clone(), Arc::new(ShardedTtlCache::new()));

    let first = svc.localize(&key(), "Test Win", Some("en")).await;
    assert_eq!(first.origin, Origin::Provider("counting"));
    for _ in 0..5 {
        let again = svc.localize(&key(), "Test Win", Some("en")).await;
        assert_eq!(again.origin, Origin::Cache);
        assert_eq!(again.text, first.text);
    }
    assert_eq!(provider.calls(), 1);

    tokio::time::advance(TTL - Duration::from_secs(1)).await;
    svc.localize(&key(), "Test Win", Some("en")).await;
    assert_eq!(provider.calls(), 1, "still inside the TTL");

    tokio::time::advance(Duration::from_secs(2)).await;
    let refreshed = svc.localize(&key(), "Test Win", Some("en")).await;
    assert_eq!(provider.calls(), 2, "expired entry goes back to the chain");
    assert_eq!(refreshed.text, "Test Win (prevod 2)");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_call_at_most_once_each() {
    const READERS: usize = 16;
    let provider = Counting::new(Duration::from_millis(50));
    let svc = Arc::new(service(provider.clone(), Arc::new(ShardedTtlCache::new())));

    let handles: Vec<_> = (0..READERS)
        .map(|_| {
            let svc = svc.clone();
            tokio::spawn(async move { svc.localize(&key(), "Test Win", Some("en")).await })
        })
        .collect();
    for h in handles {
        let out = h.await.unwrap();
        assert!(out.text.starts_with("Test Win (prevod"));
    }

    let calls = provider.calls();
    assert!((1..=READERS).contains(&calls), "calls = {calls}");

    let after = svc.localize(&key(), "Test Win", Some("en")).await;
    assert_eq!(after.origin, Origin::Cache);
    assert_eq!(provider.calls(), calls);
}

#[tokio::test]
async fn unconfigured_and_unreachable_chains_fall_back() {
    let none = TranslationService::from_config(
        &TranslatorConfig::default(),
        Arc::new(ShardedTtlCache::new()),
    )
    .unwrap();
    assert!(none.provider_names().is_empty());
    let out = none.localize(&key(), "Test Win II", None).await;
    assert_eq!(out.text, "Test Win II");
    assert_eq!(out.origin, Origin::Original);

    // Nothing listens on port 9 locally: the request fails fast.
    let cfg = TranslatorConfig {
        libre: Some(LibreConfig {
            url: "http://127.0.0.1:9/translate".into(),
            api_key: None,
        }),
        timeout: Duration::from_secs(2),
        ..TranslatorConfig::default()
    };
    let unreachable =
        TranslationService::from_config(&cfg, Arc::new(ShardedTtlCache::new())).unwrap();
    assert_eq!(unreachable.provider_names(), vec!["libretranslate"]);
    let out = unreachable.localize(&key(), "Test Win II", Some("en")).await;
    assert_eq!(out.text, "Test Win II");
    assert!(unreachable.cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn evictor_sweeps_expired_entries() {
    let cache: Arc<dyn TranslationCache> = Arc::new(ShardedTtlCache::new());
    let now = tokio::time::Instant::now();
    cache.put(key(), "kratko".into(), now + Duration::from_secs(10));
    let mut long = key();
    long.lang = "de".into();
    cache.put(long, "lang".into(), now + Duration::from_secs(3600));

    let task = spawn_evictor(cache.clone(), Duration::from_secs(60));
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(cache.len(), 1);
    task.abort();
}

// ---- HTTP providers against a local server ----

#[derive(Debug, Clone)]
struct Received {
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Value,
}

#[derive(Default)]
struct Recorder {
    azure: Mutex<Vec<Received>>,
    libre: Mutex<Vec<Received>>,
}

type Rec = State<Arc<Recorder>>;

async fn azure_ok(
    State(rec): Rec,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    rec.azure.lock().push(Received { query, headers, body });
    Json(json!([{ "translations": [{ "text": "Pobeda na testu", "to": "sr-Latn" }] }]))
}

async fn azure_down(
    State(rec): Rec,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, &'static str) {
    rec.azure.lock().push(Received { query, headers, body });
    (StatusCode::SERVICE_UNAVAILABLE, "quota exceeded")
}

async fn libre_ok(State(rec): Rec, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    rec.libre.lock().push(Received {
        query: HashMap::new(),
        headers,
        body,
    });
    Json(json!({ "translatedText": "Pobeda na testu" }))
}

async fn serve_providers() -> (String, Arc<Recorder>) {
    let rec = Arc::new(Recorder::default());
    let app = Router::new()
        .route("/ok/translate", post(azure_ok))
        .route("/down/translate", post(azure_down))
        .route("/libre/translate", post(libre_ok))
        .with_state(rec.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), rec)
}

fn azure_cfg(base: &str, path: &str) -> AzureConfig {
    AzureConfig {
        key: "sub-key".into(),
        region: "westeurope".into(),
        endpoint: format!("{base}/{path}/"),
    }
}

#[tokio::test]
async fn azure_request_carries_version_target_and_credentials() {
    let (base, rec) = serve_providers().await;
    let azure = AzureTranslator::new(azure_cfg(&base, "ok"), Duration::from_secs(2)).unwrap();

    let out = azure.translate("Test Win", "sr-Latn").await.unwrap();
    assert_eq!(out, "Pobeda na testu");

    let seen = rec.azure.lock().clone();
    assert_eq!(seen.len(), 1);
    let req = &seen[0];
    assert_eq!(req.query.get("api-version").map(String::as_str), Some("3.0"));
    assert_eq!(req.query.get("to").map(String::as_str), Some("sr-Latn"));
    assert_eq!(req.headers["ocp-apim-subscription-key"], "sub-key");
    assert_eq!(req.headers["ocp-apim-subscription-region"], "westeurope");
    assert!(req.headers["user-agent"]
        .to_str()
        .unwrap()
        .starts_with("mma-newswire/"));
    assert_eq!(req.body, json!([{ "Text": "Test Win" }]));
}

#[tokio::test]
async fn libre_request_uses_base_code_and_optional_key() {
    let (base, rec) = serve_providers().await;
    let url = format!("{base}/libre/translate");

    let keyed = LibreTranslator::new(
        LibreConfig {
            url: url.clone(),
            api_key: Some("secret".into()),
        },
        Duration::from_secs(2),
    )
    .unwrap();
    assert_eq!(keyed.translate("Test Win", "sr-Latn").await.unwrap(), "Pobeda na testu");

    let open = LibreTranslator::new(LibreConfig { url, api_key: None }, Duration::from_secs(2)).unwrap();
    open.translate("Test Win", "de").await.unwrap();

    let seen = rec.libre.lock().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(
        seen[0].body,
        json!({ "q": "Test Win", "source": "auto", "target": "sr", "format": "text", "api_key": "secret" })
    );
    assert_eq!(seen[1].body["target"], "de");
    assert!(seen[1].body.get("api_key").is_none());
}

#[tokio::test]
async fn failing_azure_hands_over_to_libre() {
    let (base, rec) = serve_providers().await;
    let cfg = TranslatorConfig {
        azure: Some(azure_cfg(&base, "down")),
        libre: Some(LibreConfig {
            url: format!("{base}/libre/translate"),
            api_key: None,
        }),
        timeout: Duration::from_secs(2),
        ..TranslatorConfig::default()
    };
    let svc = TranslationService::from_config(&cfg, Arc::new(ShardedTtlCache::new())).unwrap();
    assert_eq!(svc.provider_names(), vec!["azure", "libretranslate"]);

    let first = svc.localize(&key(), "Test Win", Some("en")).await;
    assert_eq!(first.text, "Pobeda na testu");
    assert_eq!(first.origin, Origin::Provider("libretranslate"));

    let second = svc.localize(&key(), "Test Win", Some("en")).await;
    assert_eq!(second.origin, Origin::Cache);
    assert_eq!(rec.azure.lock().len(), 1);
    assert_eq!(rec.libre.lock().len(), 1);
}
