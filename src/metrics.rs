// src/metrics.rs
use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and publish the static gauges.
    /// Fails if a recorder is already installed in this process.
    pub fn init(cache_ttl_secs: u64, sources: usize) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        crate::ingest::describe_metrics();
        crate::translate::describe_metrics();

        describe_gauge!("translate_cache_ttl_seconds", "Configured translation cache TTL.");
        describe_gauge!("ingest_sources_configured", "Feed endpoints in the ingest set.");
        describe_gauge!("live_events", "Events in the current live set.");
        describe_counter!("live_versions_total", "Live set version bumps.");
        describe_counter!(
            "live_client_transitions_total",
            "Live client transport state changes."
        );

        gauge!("translate_cache_ttl_seconds").set(cache_ttl_secs as f64);
        gauge!("ingest_sources_configured").set(sources as f64);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
