// src/config/translate.rs
use std::env;
use std::time::Duration;

use super::{env_nonempty, env_u64};

pub const DEFAULT_TARGET_LANG: &str = "sr-Latn";
pub const DEFAULT_AZURE_ENDPOINT: &str = "https://api.cognitive.microsofttranslator.com";
/// 12h
pub const DEFAULT_CACHE_TTL_SECS: u64 = 12 * 60 * 60;
pub const DEFAULT_TRANSLATE_TIMEOUT_SECS: u64 = 8;

/// Hosted provider; enabled only when both key and region are set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureConfig {
    pub key: String,
    pub region: String,
    pub endpoint: String,
}

/// Self-hostable provider; enabled only when the URL is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibreConfig {
    /// Full translate URL, e.g. `http://localhost:5000/translate`.
    pub url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatorConfig {
    pub target_lang: String,
    pub cache_ttl: Duration,
    pub timeout: Duration,
    pub azure: Option<AzureConfig>,
    pub libre: Option<LibreConfig>,
}

impl Default for TranslatorConfig {
    /// No providers: every read returns the original text.
    fn default() -> Self {
        Self {
            target_lang: DEFAULT_TARGET_LANG.to_string(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            timeout: Duration::from_secs(DEFAULT_TRANSLATE_TIMEOUT_SECS),
            azure: None,
            libre: None,
        }
    }
}

impl TranslatorConfig {
    /// Missing credentials disable the matching provider; that is not an error.
    pub fn from_env() -> Self {
        let azure = match (
            env_nonempty("AZURE_TRANSLATOR_KEY"),
            env_nonempty("AZURE_TRANSLATOR_REGION"),
        ) {
            (Some(key), Some(region)) => Some(AzureConfig {
                key,
                region,
                endpoint: env_nonempty("AZURE_TRANSLATOR_ENDPOINT")
                    .unwrap_or_else(|| DEFAULT_AZURE_ENDPOINT.to_string()),
            }),
            _ => None,
        };

        let libre = env_nonempty("LIBRETRANSLATE_URL").map(|url| LibreConfig {
            url,
            api_key: env_nonempty("LIBRETRANSLATE_KEY"),
        });

        let target_lang = env::var("TRANSLATE_TO")
            .ok()
            .map(|v| crate::translate::normalize_target_lang(Some(&v), DEFAULT_TARGET_LANG))
            .unwrap_or_else(|| DEFAULT_TARGET_LANG.to_string());

        Self {
            target_lang,
            cache_ttl: Duration::from_secs(env_u64(
                "TRANSLATION_CACHE_TTL_SECS",
                DEFAULT_CACHE_TTL_SECS,
            ))
            .min(crate::translate::MAX_CACHE_TTL),
            timeout: Duration::from_secs(env_u64(
                "TRANSLATE_TIMEOUT_SECS",
                DEFAULT_TRANSLATE_TIMEOUT_SECS,
            )),
            azure,
            libre,
        }
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.azure.is_some() {
            out.push("azure");
        }
        if self.libre.is_some() {
            out.push("libretranslate");
        }
        out
    }
}
