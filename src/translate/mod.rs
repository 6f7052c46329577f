// src/translate/mod.rs
//! Best-effort title localization for the read path.
//!
//! A read first looks in the [`TranslationCache`]; on a miss it walks the
//! provider chain in order and caches the first non-empty answer. When
//! nothing is configured or everything fails, the original text comes back.
//! Callers never see an error from here.

pub mod azure;
pub mod cache;
pub mod libre;

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::TranslatorConfig;
use crate::store::NewsItem;
pub use cache::{CacheKey, ShardedTtlCache, TranslationCache};

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("translation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("translation provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed translation response: {0}")]
    Malformed(String),

    #[error("translation timed out after {0:?}")]
    Timeout(Duration),
}

/// One external translation service.
#[async_trait::async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, to: &str) -> Result<String, TranslateError>;
    fn name(&self) -> &'static str;
}

/// Where a localized value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Cache,
    Provider(&'static str),
    /// No usable translation; the input is returned as is.
    Original,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Localized {
    pub text: String,
    pub origin: Origin,
}

impl Localized {
    fn original(text: &str) -> Self {
        Self {
            text: text.to_string(),
            origin: Origin::Original,
        }
    }
}

/// Describe every series this module emits. Called again once the
/// recorder is installed, since descriptions sent earlier are lost.
pub(crate) fn describe_metrics() {
    describe_counter!("translate_cache_hits_total", "Translation cache hits.");
    describe_counter!("translate_cache_misses_total", "Translation cache misses.");
    describe_counter!(
        "translate_provider_errors_total",
        "Failed or empty provider responses."
    );
    describe_counter!(
        "translate_fallback_total",
        "Reads answered with the original text."
    );
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(describe_metrics);
}

/// `sr` is an alias for the Latin-script variant; blank means `default`.
pub fn normalize_target_lang(raw: Option<&str>, default: &str) -> String {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => default.to_string(),
        Some(s) if s.eq_ignore_ascii_case("sr") => "sr-Latn".to_string(),
        Some(s) => s.to_string(),
    }
}

/// `sr-Latn` → `sr`.
pub fn base_lang(tag: &str) -> &str {
    tag.split(['-', '_']).next().unwrap_or(tag)
}

/// Upper bound on how long a translation stays cached.
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

pub struct TranslationService {
    cache: Arc<dyn TranslationCache>,
    chain: Vec<Arc<dyn Translator>>,
    ttl: Duration,
    call_timeout: Duration,
}

impl TranslationService {
    pub fn new(
        cache: Arc<dyn TranslationCache>,
        chain: Vec<Arc<dyn Translator>>,
        ttl: Duration,
        call_timeout: Duration,
    ) -> Self {
        ensure_metrics_described();
        if ttl > MAX_CACHE_TTL {
            tracing::warn!(
                target: "translate",
                ttl_secs = ttl.as_secs(),
                max_secs = MAX_CACHE_TTL.as_secs(),
                "cache ttl clamped"
            );
        }
        Self {
            cache,
            chain,
            ttl: ttl.min(MAX_CACHE_TTL),
            call_timeout,
        }
    }

    /// Chain order: Azure (if key + region), then LibreTranslate (if URL).
    pub fn from_config(cfg: &TranslatorConfig, cache: Arc<dyn TranslationCache>) -> anyhow::Result<Self> {
        let mut chain: Vec<Arc<dyn Translator>> = Vec::new();
        if let Some(az) = &cfg.azure {
            chain.push(Arc::new(azure::AzureTranslator::new(az.clone(), cfg.timeout)?));
        }
        if let Some(lt) = &cfg.libre {
            chain.push(Arc::new(libre::LibreTranslator::new(lt.clone(), cfg.timeout)?));
        }
        tracing::info!(
            target: "translate",
            providers = ?cfg.provider_names(),
            ttl_secs = cfg.cache_ttl.as_secs(),
            "translation chain ready"
        );
        Ok(Self::new(cache, chain, cfg.cache_ttl, cfg.timeout))
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.chain.iter().map(|p| p.name()).collect()
    }

    pub fn cache(&self) -> &Arc<dyn TranslationCache> {
        &self.cache
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Localize a stored item's title into `target`.
    pub async fn localize_item(&self, item: &NewsItem, target: &str) -> Localized {
        let key = CacheKey::new(&item.url, item.published_at, target);
        self.localize(&key, &item.title, Some(&item.lang)).await
    }

    /// Never fails: cache hit, first successful provider, or the input itself.
    ///
    /// Concurrent misses on the same key may each reach the providers.
    pub async fn localize(&self, key: &CacheKey, text: &str, source_lang: Option<&str>) -> Localized {
        if text.trim().is_empty() {
            return Localized::original(text);
        }
        if source_lang.is_some_and(|l| base_lang(l).eq_ignore_ascii_case(base_lang(&key.lang))) {
            return Localized::original(text);
        }

        if let Some(hit) = self.cache.get(key, Instant::now()) {
            counter!("translate_cache_hits_total").increment(1);
            return Localized {
                text: hit,
                origin: Origin::Cache,
            };
        }
        counter!("translate_cache_misses_total").increment(1);

        for provider in &self.chain {
            let outcome = tokio::time::timeout(self.call_timeout, provider.translate(text, &key.lang))
                .await
                .unwrap_or(Err(TranslateError::Timeout(self.call_timeout)));
            match outcome {
                Ok(out) if !out.trim().is_empty() => {
                    match Instant::now().checked_add(self.ttl) {
                        Some(expires) => self.cache.put(key.clone(), out.clone(), expires),
                        None => tracing::debug!(target: "translate", "ttl past the clock range, not cached"),
                    }
                    return Localized {
                        text: out,
                        origin: Origin::Provider(provider.name()),
                    };
                }
                Ok(_) => {
                    counter!("translate_provider_errors_total", "provider" => provider.name())
                        .increment(1);
                    tracing::debug!(target: "translate", provider = provider.name(), "empty translation");
                }
                Err(e) => {
                    counter!("translate_provider_errors_total", "provider" => provider.name())
                        .increment(1);
                    tracing::warn!(target: "translate", provider = provider.name(), error = %e, "translation failed");
                }
            }
        }

        counter!("translate_fallback_total").increment(1);
        Localized::original(text)
    }
}
