// src/config/mod.rs
//! Process configuration, read from the environment (plus the optional
//! sources file, see [`crate::ingest::config`]).

pub mod translate;

use anyhow::Result;
use std::env;
use std::time::Duration;

pub use translate::{AzureConfig, LibreConfig, TranslatorConfig};

/// 15 min
pub const DEFAULT_FETCH_INTERVAL_MS: u64 = 15 * 60 * 1000;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_HEARTBEAT_SECS: u64 = 15;
pub const DEFAULT_LIVE_REFRESH_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub sources: Vec<String>,
    pub interval_ms: u64,
    pub fetch_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveConfig {
    pub heartbeat: Duration,
    /// How often the publisher re-reads the live set from storage.
    pub refresh: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            refresh: Duration::from_secs(DEFAULT_LIVE_REFRESH_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ingest: IngestConfig,
    pub translate: TranslatorConfig,
    pub live: LiveConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let sources = crate::ingest::config::load_sources_default()?;
        Ok(Self {
            ingest: IngestConfig {
                sources,
                interval_ms: env_u64("FETCH_INTERVAL_MS", DEFAULT_FETCH_INTERVAL_MS).max(1_000),
                fetch_timeout: Duration::from_secs(
                    env_u64("FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS).max(1),
                ),
            },
            translate: TranslatorConfig::from_env(),
            live: LiveConfig {
                heartbeat: Duration::from_secs(
                    env_u64("LIVE_HEARTBEAT_SECS", DEFAULT_HEARTBEAT_SECS).max(1),
                ),
                refresh: Duration::from_secs(
                    env_u64("LIVE_REFRESH_SECS", DEFAULT_LIVE_REFRESH_SECS).max(1),
                ),
            },
        })
    }
}

/// `SHUTTLE_ENV` of `local`, `development` or `dev`. When unset, debug builds
/// count as development.
pub fn is_dev_env() -> bool {
    match env::var("SHUTTLE_ENV")
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
        .as_str()
    {
        "" => cfg!(debug_assertions),
        "local" | "development" | "dev" => true,
        _ => false,
    }
}

/// Set and not blank.
pub(crate) fn env_nonempty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Unsigned env value; unparseable input falls back to `default` with a warning.
pub(crate) fn env_u64(name: &str, default: u64) -> u64 {
    match env_nonempty(name) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, default, "invalid number, using default");
            default
        }),
    }
}
