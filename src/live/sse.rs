// src/live/sse.rs
//! Server-sent events for the live set: the server stream behind
//! `/api/events/live/stream` and the frame decoder the client reads it with.
//!
//! Wire events:
//! - `hello`  `{"status":"ok","data":[..],"version":n}` once on connect
//! - `error`  `{"status":"error","message":".."}` instead of `hello` when no snapshot could be loaded
//! - `tick`   `{"t":<unix ms>,"version":n}` every heartbeat
//! - `update` `{"data":[..],"version":n}` whenever the version moves

use axum::response::sse::Event;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

use super::{LiveEvent, LivePayload, LivePublisher};

pub const EVENT_HELLO: &str = "hello";
pub const EVENT_TICK: &str = "tick";
pub const EVENT_UPDATE: &str = "update";
pub const EVENT_ERROR: &str = "error";

#[derive(Serialize)]
struct Hello<'a> {
    status: &'static str,
    data: &'a [LiveEvent],
    version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    pub t: i64,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamError {
    pub status: String,
    pub message: String,
}

fn json_event<T: Serialize>(name: &str, body: &T) -> Event {
    let data = serde_json::to_string(body).unwrap_or_else(|e| {
        tracing::error!(target: "live", error = %e, event = name, "serializing sse payload");
        "{}".to_string()
    });
    Event::default().event(name).data(data)
}

enum Wake {
    Tick,
    Changed,
    PublisherGone,
}

/// One subscriber's stream. Ends only when the publisher is dropped or the
/// client disconnects.
pub fn live_stream(
    publisher: Arc<LivePublisher>,
    heartbeat: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    async_stream::stream! {
        let mut rx = publisher.subscribe();
        match publisher.current().await {
            Ok(_) => {
                let snap = rx.borrow_and_update().clone();
                yield Ok(json_event(EVENT_HELLO, &Hello {
                    status: "ok",
                    data: &snap.events,
                    version: snap.version,
                }));
            }
            Err(e) => {
                tracing::warn!(target: "live", error = ?e, "live snapshot unavailable for new subscriber");
                let _ = rx.borrow_and_update();
                yield Ok(json_event(EVENT_ERROR, &StreamError {
                    status: "error".into(),
                    message: "live snapshot unavailable".into(),
                }));
            }
        }

        let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let wake = tokio::select! {
                _ = ticker.tick() => Wake::Tick,
                changed = rx.changed() => match changed {
                    Ok(()) => Wake::Changed,
                    Err(_) => Wake::PublisherGone,
                },
            };
            match wake {
                Wake::Tick => {
                    let version = rx.borrow().version;
                    yield Ok(json_event(EVENT_TICK, &Tick {
                        t: chrono::Utc::now().timestamp_millis(),
                        version,
                    }));
                }
                Wake::Changed => {
                    let snap = rx.borrow_and_update().clone();
                    yield Ok(json_event(EVENT_UPDATE, &LivePayload::from(&snap)));
                }
                Wake::PublisherGone => break,
            }
        }
    }
}

/// One dispatched SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser. Chunks may split lines (and
/// UTF-8 sequences) anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    out.push(frame);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line.as_ref(), ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        out
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Hello(LivePayload),
    Update(LivePayload),
    Tick(Tick),
    Error(String),
}

impl ServerMessage {
    /// `None` for unknown event names or bodies that do not parse.
    pub fn from_frame(frame: &SseFrame) -> Option<Self> {
        let msg = match frame.event.as_str() {
            EVENT_HELLO => ServerMessage::Hello(serde_json::from_str(&frame.data).ok()?),
            EVENT_UPDATE => ServerMessage::Update(serde_json::from_str(&frame.data).ok()?),
            EVENT_TICK => ServerMessage::Tick(serde_json::from_str(&frame.data).ok()?),
            EVENT_ERROR => ServerMessage::Error(
                serde_json::from_str::<StreamError>(&frame.data)
                    .map(|e| e.message)
                    .unwrap_or_else(|_| frame.data.clone()),
            ),
            _ => return None,
        };
        Some(msg)
    }
}
