// src/translate/azure.rs
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{TranslateError, Translator};
use crate::config::AzureConfig;
use crate::ingest::providers::rss::USER_AGENT;

const API_VERSION: &str = "3.0";

#[derive(Serialize)]
struct ReqItem<'a> {
    #[serde(rename = "Text")]
    text: &'a str,
}

#[derive(Deserialize)]
struct RespItem {
    #[serde(default)]
    translations: Vec<RespTranslation>,
}

#[derive(Deserialize)]
struct RespTranslation {
    text: String,
}

/// Azure AI Translator, v3 REST API.
pub struct AzureTranslator {
    http: reqwest::Client,
    cfg: AzureConfig,
}

impl AzureTranslator {
    pub fn new(cfg: AzureConfig, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout.min(Duration::from_secs(4)))
            .timeout(timeout)
            .build()
            .context("building azure translator client")?;
        Ok(Self { http, cfg })
    }

    fn url(&self) -> String {
        format!("{}/translate", self.cfg.endpoint.trim_end_matches('/'))
    }
}

/// First translation of the first item, `[{"translations":[{"text":..}]}]`.
pub(crate) fn parse_response(body: &str) -> Result<String, TranslateError> {
    let items: Vec<RespItem> =
        serde_json::from_str(body).map_err(|e| TranslateError::Malformed(e.to_string()))?;
    items
        .into_iter()
        .next()
        .and_then(|i| i.translations.into_iter().next())
        .map(|t| t.text)
        .ok_or_else(|| TranslateError::Malformed("no translations in response".into()))
}

#[async_trait::async_trait]
impl Translator for AzureTranslator {
    async fn translate(&self, text: &str, to: &str) -> Result<String, TranslateError> {
        let resp = self
            .http
            .post(self.url())
            .query(&[("api-version", API_VERSION), ("to", to)])
            .header("Ocp-Apim-Subscription-Key", &self.cfg.key)
            .header("Ocp-Apim-Subscription-Region", &self.cfg.region)
            .json(&[ReqItem { text }])
            .send()
            .await?;

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
        "azure"
    }
}
