// src/ingest/mod.rs
pub mod config;
pub mod providers;
pub mod scheduler;
pub mod types;
pub mod writer;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::ingest::types::{FeedSource, NormalizedItem, RawEntry, RawFeed};
use crate::ingest::writer::{write_batch, WriteReport};
use crate::store::NewsStore;

/// Title used when an entry carries none.
pub const UNTITLED: &str = "Untitled";
/// Summaries longer than this are cut and end with an ellipsis.
pub const SUMMARY_MAX_CHARS: usize = 400;

/// Describe every series this module emits. Called again once the
/// recorder is installed, since descriptions sent earlier are lost.
pub(crate) fn describe_metrics() {
    describe_counter!("ingest_entries_total", "Entries parsed from feeds.");
    describe_counter!(
        "ingest_discarded_total",
        "Entries dropped for lack of a permalink."
    );
    describe_counter!("ingest_created_total", "New news items stored.");
    describe_counter!("ingest_updated_total", "Existing news items updated in place.");
    describe_counter!(
        "ingest_source_errors_total",
        "Feed fetch/parse errors (per source)."
    );
    describe_counter!(
        "ingest_upsert_errors_total",
        "Per-item persistence failures."
    );
    describe_counter!("ingest_ticks_skipped_total", "Ticks skipped while one was running.");
    describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
    describe_gauge!(
        "ingest_pipeline_last_run_ts",
        "Unix ts when the ingest pipeline last ran."
    );
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(describe_metrics);
}

fn re_tags() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"))
}

fn re_ws() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"))
}

fn re_localized() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"[čćšđžČĆŠĐŽ]").expect("diacritics regex"))
}

fn re_leading_separator() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"^\s*[|\-–—]\s*").expect("separator regex"))
}

/// Collapse whitespace and trim.
pub fn collapse_ws(s: &str) -> String {
    re_ws().replace_all(s, " ").trim().to_string()
}

/// Normalize markup-ish text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let decoded = html_escape::decode_html_entities(s).to_string();
    // 2) Strip HTML tags (leave a space so words do not glue together)
    let stripped = re_tags().replace_all(&decoded, " ");
    // 3) Collapse whitespace
    collapse_ws(&stripped)
}

/// Cut to [`SUMMARY_MAX_CHARS`] with a trailing `…`; empty input yields `None`.
pub fn truncate_summary(s: &str) -> Option<String> {
    if s.is_empty() {
        return None;
    }
    if s.chars().count() > SUMMARY_MAX_CHARS {
        let mut out: String = s.chars().take(SUMMARY_MAX_CHARS - 3).collect();
        out.push('…');
        Some(out)
    } else {
        Some(s.to_string())
    }
}

/// Coarse language guess: Serbian/Balkan diacritics ⇒ `"sr"`, otherwise `"en"`.
///
/// Short or diacritic-free Serbian text is reported as `"en"`, and foreign
/// text with an incidental diacritic as `"sr"`.
pub fn detect_lang(text: &str) -> &'static str {
    if re_localized().is_match(text) {
        "sr"
    } else {
        "en"
    }
}

/// Display name for a source: the feed's own title without leading
/// separators, or the endpoint when the feed has no usable title.
pub fn derive_source_label(feed_title: Option<&str>, endpoint: &str) -> String {
    let raw = feed_title.unwrap_or(endpoint);
    let label = re_leading_separator().replace(raw, "").trim().to_string();
    if label.is_empty() {
        endpoint.trim().to_string()
    } else {
        label
    }
}

/// Turn one raw entry into a canonical item. Entries with no permalink are dropped.
pub fn normalize_entry(entry: &RawEntry, source: &str, now: DateTime<Utc>) -> Option<NormalizedItem> {
    let url = entry
        .link
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())?
        .to_string();

    let title = entry
        .title
        .as_deref()
        .map(collapse_ws)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());

    let summary = entry
        .summary
        .as_deref()
        .map(normalize_text)
        .and_then(|s| truncate_summary(&s));

    let lang = detect_lang(&format!("{} {}", title, summary.as_deref().unwrap_or_default()));

    Some(NormalizedItem {
        url,
        title,
        source: source.to_string(),
        published_at: entry.published.unwrap_or(now),
        summary,
        lang: lang.to_string(),
    })
}

/// Normalize a whole feed. Returns (items, discarded_count).
pub fn normalize_feed(endpoint: &str, feed: &RawFeed, now: DateTime<Utc>) -> (Vec<NormalizedItem>, usize) {
    let source = derive_source_label(feed.title.as_deref(), endpoint);
    let mut discarded = 0usize;
    let mut out = Vec::with_capacity(feed.entries.len());
    for entry in &feed.entries {
        match normalize_entry(entry, &source, now) {
            Some(item) => out.push(item),
            None => discarded += 1,
        }
    }
    (out, discarded)
}

/// Outcome of one pass over all sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub discarded: usize,
    pub writes: WriteReport,
}

/// Fetch, normalize and persist every source once, in order.
///
/// A failing source is logged and skipped; the remaining sources still run.
pub async fn run_once(sources: &[Box<dyn FeedSource>], store: &dyn NewsStore) -> IngestReport {
    ensure_metrics_described();

    let mut report = IngestReport::default();
    if sources.is_empty() {
        tracing::warn!(target: "ingest", "no feed sources configured");
        return report;
    }

    for src in sources {
        let feed = match src.fetch().await {
            Ok(feed) => feed,
            Err(e) => {
                tracing::warn!(target: "ingest", error = ?e, source = src.endpoint(), "feed fetch failed");
                counter!("ingest_source_errors_total").increment(1);
                report.sources_failed += 1;
                continue;
            }
        };

        let now = Utc::now();
        let (items, discarded) = normalize_feed(src.endpoint(), &feed, now);
        counter!("ingest_discarded_total").increment(discarded as u64);
        report.discarded += discarded;

        let writes = write_batch(store, &items).await;
        tracing::debug!(
            target: "ingest",
            source = src.endpoint(),
            created = writes.created,
            updated = writes.updated,
            failed = writes.failed,
            discarded,
            "source ingested"
        );
        report.writes.merge(&writes);
        report.sources_ok += 1;
    }

    gauge!("ingest_pipeline_last_run_ts").set(Utc::now().timestamp().max(0) as f64);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn normalize_text_strips_tags_and_collapses_ws() {
        let s = "  <p>Hello,&nbsp;&nbsp;\n world</p>  ";
        assert_eq!(normalize_text(s), "Hello, world");
    }

    #[test]
    fn summary_is_truncated_with_ellipsis() {
        let long = "a".repeat(SUMMARY_MAX_CHARS + 10);
        let out = truncate_summary(&long).unwrap();
        assert_eq!(out.chars().count(), SUMMARY_MAX_CHARS - 2);
        assert!(out.ends_with('…'));

        let exact = "b".repeat(SUMMARY_MAX_CHARS);
        assert_eq!(truncate_summary(&exact).unwrap(), exact);
        assert_eq!(truncate_summary(""), None);
    }

    #[test]
    fn source_label_trims_leading_separators() {
        assert_eq!(derive_source_label(Some(" | MMA Fighting"), "https://f"), "MMA Fighting");
        assert_eq!(derive_source_label(Some("— Sherdog "), "https://f"), "Sherdog");
        assert_eq!(derive_source_label(None, "https://f/rss"), "https://f/rss");
        assert_eq!(derive_source_label(Some(" - "), "https://f/rss"), "https://f/rss");
    }

    #[test]
    fn detect_lang_uses_diacritics() {
        assert_eq!(detect_lang("Nokaut u prvoj rundi, Dušan slavi"), "sr");
        assert_eq!(detect_lang("Knockout in round one"), "en");
        // known limitation: diacritic-free Serbian looks foreign
        assert_eq!(detect_lang("Pobeda na poene"), "en");
    }

    #[test]
    fn entry_defaults_and_discard() {
        let e = RawEntry {
            title: Some("   ".into()),
            link: Some(" https://x/a ".into()),
            published: None,
            summary: Some("   ".into()),
        };
        let item = normalize_entry(&e, "Feed", now()).unwrap();
        assert_eq!(item.url, "https://x/a");
        assert_eq!(item.title, UNTITLED);
        assert_eq!(item.published_at, now());
        assert_eq!(item.summary, None);

        let no_link = RawEntry {
            title: Some("t".into()),
            ..Default::default()
        };
        assert!(normalize_entry(&no_link, "Feed", now()).is_none());
    }

    #[test]
    fn normalize_feed_counts_discards() {
        let feed = RawFeed {
            title: Some("| Feed".into()),
            entries: vec![
                RawEntry {
                    title: Some("Test Win".into()),
                    link: Some("https://x/a".into()),
                    ..Default::default()
                },
                RawEntry {
                    title: Some("orphan".into()),
                    ..Default::default()
                },
            ],
        };
        let (items, discarded) = normalize_feed("https://f", &feed, now());
        assert_eq!(items.len(), 1);
        assert_eq!(discarded, 1);
        assert_eq!(items[0].source, "Feed");
    }
}
