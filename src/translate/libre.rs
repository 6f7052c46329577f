// src/translate/libre.rs
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{base_lang, TranslateError, Translator};
use crate::config::LibreConfig;
use crate::ingest::providers::rss::USER_AGENT;

#[derive(Serialize)]
struct Req<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Deserialize)]
struct Resp {
    #[serde(rename = "translatedText")]
    translated_text: Option<String>,
}

/// LibreTranslate `/translate` endpoint.
pub struct LibreTranslator {
    http: reqwest::Client,
    cfg: LibreConfig,
}

impl LibreTranslator {
    pub fn new(cfg: LibreConfig, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout.min(Duration::from_secs(4)))
            .timeout(timeout)
            .build()
            .context("building libretranslate client")?;
        Ok(Self { http, cfg })
    }
}

pub(crate) fn parse_response(body: &str) -> Result<String, TranslateError> {
    let resp: Resp =
        serde_json::from_str(body).map_err(|e| TranslateError::Malformed(e.to_string()))?;
    resp.translated_text
        .ok_or_else(|| TranslateError::Malformed("missing translatedText".into()))
}

#[async_trait::async_trait]
impl Translator for LibreTranslator {
    async fn translate(&self, text: &str, to: &str) -> Result<String, TranslateError> {
        // LibreTranslate only knows bare language codes.
        let req = Req {
            q: text,
            source: "auto",
            target: base_lang(to),
            format: "text",
            api_key: self.cfg.api_key.as_deref(),
        };
        let resp = self.http.post(&self.cfg.url).json(&req).send().await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(TranslateError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        parse_response(&body)
    }

    fn name(&self) -> &'static str {
        "libretranslate"
    }
}
