// src/live/client.rs
//! Live-set consumer that prefers the push stream and falls back to polling.
//!
//! Everything the client owns (timers, the HTTP body, channels) lives inside
//! one spawned task. [`LiveClientHandle::close`] aborts that task, so once it
//! returns no further request leaves the client.

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use metrics::counter;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::machine::{Input, Machine, MachineConfig, State};
use super::sse::{ServerMessage, SseDecoder};
use super::{LiveEvent, LivePayload};
use crate::ingest::providers::rss::USER_AGENT;

pub const HEALTH_PATH: &str = "/health";
pub const SNAPSHOT_PATH: &str = "/api/events/live";
pub const STREAM_PATH: &str = "/api/events/live/stream";
/// Direct backend stream URL, tried after the primary in development only.
pub const ENV_DIRECT_STREAM: &str = "LIVE_DIRECT_STREAM_URL";

/// Where to probe, poll, and stream from. Stream candidates are ranked; a
/// failing one hands over to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: String,
    streams: Vec<String>,
}

impl Endpoints {
    /// One stream candidate, under the same base as health and snapshot.
    pub fn new(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        let streams = vec![format!("{base}{STREAM_PATH}")];
        Self { base, streams }
    }

    /// Production keeps the single primary candidate. In development the
    /// direct stream from `LIVE_DIRECT_STREAM_URL` is appended when set.
    pub fn from_env(base: &str) -> Self {
        let endpoints = Self::new(base);
        if !crate::config::is_dev_env() {
            return endpoints;
        }
        match crate::config::env_nonempty(ENV_DIRECT_STREAM) {
            Some(direct) if !endpoints.streams.contains(&direct) => endpoints.with_candidate(direct),
            _ => endpoints,
        }
    }

    /// Append a lower-ranked stream URL (e.g. the backend's direct address
    /// in development).
    pub fn with_candidate(mut self, stream_url: impl Into<String>) -> Self {
        self.streams.push(stream_url.into());
        self
    }

    /// Replace the candidate list entirely.
    pub fn with_candidates(mut self, streams: Vec<String>) -> Self {
        self.streams = streams;
        self
    }

    pub fn health_url(&self) -> String {
        format!("{}{HEALTH_PATH}", self.base)
    }

    pub fn snapshot_url(&self) -> String {
        format!("{}{SNAPSHOT_PATH}", self.base)
    }

    pub fn stream_url(&self, candidate: usize) -> Option<&str> {
        self.streams.get(candidate).map(String::as_str)
    }

    pub fn candidates(&self) -> usize {
        self.streams.len()
    }
}

#[derive(Debug, Clone)]
pub struct LiveClientConfig {
    pub probe_timeout: Duration,
    /// Per snapshot request.
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    /// Silence on the stream for this long counts as a failure.
    pub heartbeat_timeout: Duration,
    pub push_allowed: bool,
    pub poll_failure_threshold: u32,
    pub max_reconnects: u32,
    /// Multiplied by the attempt number.
    pub reconnect_backoff: Duration,
}

impl Default for LiveClientConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(45),
            push_allowed: true,
            poll_failure_threshold: 3,
            max_reconnects: 3,
            reconnect_backoff: Duration::from_secs(5),
        }
    }
}

impl LiveClientConfig {
    /// Tolerate two missed heartbeats.
    pub fn for_heartbeat(heartbeat: Duration) -> Self {
        Self {
            heartbeat_timeout: heartbeat * 3,
            ..Self::default()
        }
    }
}

/// What the client currently shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveView {
    pub version: u64,
    pub events: Vec<LiveEvent>,
}

pub struct LiveClientHandle {
    task: JoinHandle<()>,
    view: watch::Receiver<LiveView>,
    state: Arc<watch::Sender<State>>,
}

impl LiveClientHandle {
    pub fn view(&self) -> LiveView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveView> {
        self.view.clone()
    }

    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    /// Stop the client. Idempotent.
    pub fn close(&self) {
        self.task.abort();
        self.state.send_if_modified(|s| {
            if *s == State::Closed {
                return false;
            }
            *s = State::Closed;
            true
        });
    }
}

impl Drop for LiveClientHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Start a client on the current tokio runtime.
pub fn spawn(endpoints: Endpoints, cfg: LiveClientConfig) -> Result<LiveClientHandle> {
    // No overall timeout: the stream body stays open indefinitely.
    let http = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(cfg.probe_timeout)
        .build()
        .context("building live client")?;

    let (view_tx, view_rx) = watch::channel(LiveView::default());
    let state = Arc::new(watch::channel(State::Probing).0);

    let driver = Driver {
        http,
        endpoints,
        cfg,
        view: view_tx,
        state: state.clone(),
    };
    let task = tokio::spawn(driver.run());

    Ok(LiveClientHandle {
        task,
        view: view_rx,
        state,
    })
}

struct Driver {
    http: reqwest::Client,
    endpoints: Endpoints,
    cfg: LiveClientConfig,
    view: watch::Sender<LiveView>,
    state: Arc<watch::Sender<State>>,
}

impl Driver {
    async fn run(self) {
        let mut machine = Machine::new(MachineConfig {
            candidates: self.endpoints.candidates(),
            push_allowed: self.cfg.push_allowed,
            poll_failure_threshold: self.cfg.poll_failure_threshold,
            max_reconnects: self.cfg.max_reconnects,
        });

        loop {
            let current = machine.state();
            let input = match current {
                State::Closed => break,
                State::Probing => self.probe().await,
                State::Reconnecting { attempt } => {
                    tokio::time::sleep(self.cfg.reconnect_backoff * attempt).await;
                    self.probe().await
                }
                State::Streaming { candidate } => self.stream(candidate).await,
                State::Polling => self.poll().await,
            };

            match machine.apply(input) {
                Some(next) => {
                    // close() may run on another worker before the abort lands.
                    let mut closed = false;
                    self.state.send_if_modified(|s| {
                        if *s == State::Closed {
                            closed = true;
                            return false;
                        }
                        *s = next;
                        true
                    });
                    if closed {
                        break;
                    }
                    counter!("live_client_transitions_total", "to" => next.name()).increment(1);
                    tracing::info!(target: "live", from = current.name(), to = next.name(), ?input, "live transport transition");
                }
                None if current == State::Polling => {
                    tokio::time::sleep(self.cfg.poll_interval).await;
                }
                None => {}
            }
        }
    }

    async fn probe(&self) -> Input {
        let res = self
            .http
            .get(self.endpoints.health_url())
            .timeout(self.cfg.probe_timeout)
            .send()
            .await;
        match res {
            Ok(resp) if resp.status().is_success() => Input::ProbeOk,
            Ok(resp) => {
                tracing::debug!(target: "live", status = resp.status().as_u16(), "health probe rejected");
                Input::ProbeFailed
            }
            Err(e) => {
                tracing::debug!(target: "live", error = %e, "health probe failed");
                Input::ProbeFailed
            }
        }
    }

    async fn fetch_snapshot(&self) -> Result<LivePayload> {
        let payload = self
            .http
            .get(self.endpoints.snapshot_url())
            .timeout(self.cfg.request_timeout)
            .send()
            .await
            .context("requesting live snapshot")?
            .error_for_status()?
            .json::<LivePayload>()
            .await
            .context("decoding live snapshot")?;
        Ok(payload)
    }

    async fn poll(&self) -> Input {
        match self.fetch_snapshot().await {
            Ok(payload) => {
                self.publish(payload);
                Input::PollOk
            }
            Err(e) => {
                tracing::warn!(target: "live", error = ?e, "live poll failed");
                Input::PollFailed
            }
        }
    }

    /// Read the stream until it fails; it never ends successfully.
    async fn stream(&self, candidate: usize) -> Input {
        if let Err(e) = self.read_stream(candidate).await {
            tracing::warn!(target: "live", candidate, error = ?e, "live stream failed");
        }
        Input::StreamFailed
    }

    async fn read_stream(&self, candidate: usize) -> Result<()> {
        let url = self
            .endpoints
            .stream_url(candidate)
            .context("no such stream candidate")?;

        let resp = tokio::time::timeout(
            self.cfg.probe_timeout,
            self.http.get(url).header(ACCEPT, "text/event-stream").send(),
        )
        .await
        .context("stream handshake timed out")?
        .context("stream request failed")?
        .error_for_status()?;

        let is_sse = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        if !is_sse {
            bail!("{url} did not answer with text/event-stream");
        }
        tracing::info!(target: "live", candidate, url, "live stream connected");

        let mut body = Box::pin(resp.bytes_stream());
        let mut decoder = SseDecoder::new();
        loop {
            let chunk = match tokio::time::timeout(self.cfg.heartbeat_timeout, body.next()).await {
                Err(_) => bail!("no heartbeat within {:?}", self.cfg.heartbeat_timeout),
                Ok(None) => bail!("stream closed by server"),
                Ok(Some(chunk)) => chunk.context("reading stream")?,
            };
            for frame in decoder.push(&chunk) {
                match ServerMessage::from_frame(&frame) {
                    Some(ServerMessage::Hello(payload) | ServerMessage::Update(payload)) => {
                        self.publish(payload)
                    }
                    Some(ServerMessage::Tick(tick)) => {
                        let ours = self.view.borrow().version;
                        if tick.version != ours {
                            tracing::debug!(target: "live", ours, theirs = tick.version, "missed update; fetching snapshot");
                            self.repair().await;
                        }
                    }
                    Some(ServerMessage::Error(message)) => {
                        tracing::warn!(target: "live", %message, "server could not load the live set");
                        self.repair().await;
                    }
                    None => {}
                }
            }
        }
    }

    async fn repair(&self) {
        match self.fetch_snapshot().await {
            Ok(payload) => self.publish(payload),
            Err(e) => tracing::warn!(target: "live", error = ?e, "snapshot repair failed"),
        }
    }

    fn publish(&self, payload: LivePayload) {
        self.view.send_if_modified(|view| {
            if view.version == payload.version && view.events == payload.data {
                return false;
            }
            view.version = payload.version;
            view.events = payload.data;
            true
        });
    }
}
