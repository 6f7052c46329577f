// src/ingest/providers/rss.rs
//! RSS 2.0 / Atom feed source with two modes: a static fixture document and
//! a live HTTP endpoint. Both go through the same parser.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use once_cell::sync::OnceCell;
use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::time::Duration;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::ingest::types::{FeedSource, RawEntry, RawFeed};

pub const USER_AGENT: &str = concat!("mma-newswire/", env!("CARGO_PKG_VERSION"));

// ---- RSS 2.0 ----

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    title: Option<String>,
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Guid>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "@isPermaLink")]
    is_permalink: Option<String>,
    #[serde(rename = "$text", default)]
    value: String,
}

// ---- Atom ----

#[derive(Debug, Deserialize)]
struct AtomFeed {
    title: Option<TextNode>,
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<TextNode>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    id: Option<String>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<TextNode>,
    content: Option<TextNode>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedKind {
    Rss,
    Atom,
}

pub struct RssFeedSource {
    endpoint: String,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { client: reqwest::Client },
}

impl RssFeedSource {
    /// Serve a fixed XML document under the given endpoint name.
    pub fn from_fixture(endpoint: &str, xml: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    /// Fetch over HTTP with a bounded total timeout.
    pub fn from_url(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .timeout(timeout)
            .build()
            .context("building feed http client")?;
        Ok(Self::with_client(url, client))
    }

    /// Share one client across sources. The client must carry its own timeout.
    pub fn with_client(url: &str, client: reqwest::Client) -> Self {
        Self {
            endpoint: url.to_string(),
            mode: Mode::Http { client },
        }
    }
}

#[async_trait]
impl FeedSource for RssFeedSource {
    async fn fetch(&self) -> Result<RawFeed> {
        match &self.mode {
            Mode::Fixture(xml) => parse_feed(xml),
            Mode::Http { client } => {
                let body = client
                    .get(&self.endpoint)
                    .send()
                    .await
                    .with_context(|| format!("feed http get {}", self.endpoint))?
                    .error_for_status()
                    .with_context(|| format!("feed http status {}", self.endpoint))?
                    .text()
                    .await
                    .context("feed http .text()")?;
                parse_feed(&body).with_context(|| format!("parsing feed {}", self.endpoint))
            }
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Parse an RSS 2.0 or Atom document into a [`RawFeed`].
pub fn parse_feed(xml: &str) -> Result<RawFeed> {
    let t0 = std::time::Instant::now();
    let xml_clean = scrub_html_entities_for_xml(xml);

    let feed = match sniff_kind(&xml_clean)? {
        FeedKind::Rss => {
            let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;
            from_rss(rss)
        }
        FeedKind::Atom => {
            let atom: AtomFeed = from_str(&xml_clean).context("parsing atom xml")?;
            from_atom(atom)
        }
    };

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("ingest_parse_ms").record(ms);
    counter!("ingest_entries_total").increment(feed.entries.len() as u64);
    Ok(feed)
}

fn sniff_kind(xml: &str) -> Result<FeedKind> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event().context("reading feed root")? {
            Event::Start(e) | Event::Empty(e) => {
                let local = e.local_name();
                return match local.as_ref() {
                    b"rss" => Ok(FeedKind::Rss),
                    b"feed" => Ok(FeedKind::Atom),
                    other => Err(anyhow!(
                        "unsupported feed root <{}>",
                        String::from_utf8_lossy(other)
                    )),
                };
            }
            Event::Eof => return Err(anyhow!("empty feed document")),
            _ => {}
        }
    }
}

fn from_rss(rss: Rss) -> RawFeed {
    let entries = rss
        .channel
        .items
        .into_iter()
        .map(|it| {
            let guid_link = it.guid.and_then(|g| {
                let permalink = !matches!(g.is_permalink.as_deref(), Some(v) if v.eq_ignore_ascii_case("false"));
                (permalink && is_http_url(&g.value)).then(|| g.value.trim().to_string())
            });
            RawEntry {
                title: it.title,
                link: non_blank(it.link).or(guid_link),
                published: it.pub_date.as_deref().and_then(parse_timestamp),
                summary: it.description,
            }
        })
        .collect();
    RawFeed {
        title: non_blank(rss.channel.title),
        entries,
    }
}

fn from_atom(atom: AtomFeed) -> RawFeed {
    let entries = atom
        .entries
        .into_iter()
        .map(|e| {
            let href = e
                .links
                .iter()
                .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
                .and_then(|l| l.href.clone());
            let id_link = e.id.filter(|id| is_http_url(id)).map(|id| id.trim().to_string());
            RawEntry {
                title: e.title.map(|t| t.value),
                link: non_blank(href).or(id_link),
                published: e
                    .published
                    .as_deref()
                    .and_then(parse_timestamp)
                    .or_else(|| e.updated.as_deref().and_then(parse_timestamp)),
                summary: e.summary.or(e.content).map(|t| t.value),
            }
        })
        .collect();
    RawFeed {
        title: non_blank(atom.title.map(|t| t.value)),
        entries,
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn is_http_url(s: &str) -> bool {
    let t = s.trim();
    t.starts_with("http://") || t.starts_with("https://")
}

/// RFC 2822 (RSS) or RFC 3339 (Atom). Unparseable values yield `None`.
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    let odt = OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .ok();
    if let Some(dt) = odt {
        return DateTime::from_timestamp(dt.unix_timestamp(), dt.nanosecond());
    }
    // chrono is more lenient with some obsolete RFC 2822 zone names
    DateTime::parse_from_rfc2822(ts)
        .or_else(|_| DateTime::parse_from_rfc3339(ts))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn re_named_entity() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"&([A-Za-z][A-Za-z0-9]{1,31});").expect("entity regex"))
}

/// quick-xml only knows the five XML entities. Everything else HTML defines is
/// rewritten to numeric references, and unknown names are escaped as text.
fn scrub_html_entities_for_xml(s: &str) -> String {
    let s = s
        .replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
        .replace("&laquo;", "\"")
        .replace("&raquo;", "\"");

    re_named_entity()
        .replace_all(&s, |caps: &Captures| {
            let whole = &caps[0];
            if matches!(&caps[1], "amp" | "lt" | "gt" | "quot" | "apos") {
                return whole.to_string();
            }
            let decoded = html_escape::decode_html_entities(whole);
            if decoded == whole {
                format!("&amp;{};", &caps[1])
            } else {
                decoded.chars().map(|c| format!("&#{};", c as u32)).collect()
            }
        })
        .into_owned()
}
