// src/api.rs
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::live::sse::live_stream;
use crate::live::{LivePayload, LivePublisher};
use crate::store::{NewsQuery, NewsStore};
use crate::translate::{normalize_target_lang, TranslationService};

#[derive(Clone)]
pub struct AppState {
    pub news: Arc<dyn NewsStore>,
    pub translator: Arc<TranslationService>,
    pub live: Arc<LivePublisher>,
    /// Used when `?lang=` is absent.
    pub default_lang: String,
    pub heartbeat: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/news", get(news))
        .route("/api/news/meta", get(news_meta))
        .route("/api/events/live", get(live_snapshot))
        .route("/api/events/live/stream", get(live_events_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Handler failure: logged, answered with 500 and a JSON body.
pub struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = ?self.0, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "message": "internal error" })),
        )
            .into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "ts": chrono::Utc::now().to_rfc3339() }))
}

/// Everything arrives as text so junk falls back to defaults instead of a 400.
#[derive(Debug, Default, Deserialize)]
struct NewsParams {
    lang: Option<String>,
    page: Option<String>,
    limit: Option<String>,
    source: Option<String>,
}

fn int_param(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|s| s.trim().parse().ok())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewsItemView {
    id: String,
    url: String,
    source: String,
    published_at: chrono::DateTime<chrono::Utc>,
    title: String,
    title_original: String,
    summary: Option<String>,
}

#[derive(Debug, Serialize)]
struct NewsResponse {
    items: Vec<NewsItemView>,
    total: usize,
    page: u32,
    limit: u32,
    pages: usize,
    source: Option<String>,
}

async fn news(
    State(state): State<AppState>,
    Query(params): Query<NewsParams>,
) -> Result<Json<NewsResponse>, ApiError> {
    let lang = normalize_target_lang(params.lang.as_deref(), &state.default_lang);
    let query = NewsQuery::new(
        int_param(params.page.as_deref()),
        int_param(params.limit.as_deref()),
        params.source,
    );
    let page = state.news.query(&query).await?;

    let translator = &state.translator;
    let lang_ref = lang.as_str();
    let items = futures::future::join_all(page.items.into_iter().map(|item| async move {
        let localized = translator.localize_item(&item, lang_ref).await;
        NewsItemView {
            id: item.id,
            url: item.url,
            source: item.source,
            published_at: item.published_at,
            title: localized.text,
            title_original: item.title,
            summary: item.summary,
        }
    }))
    .await;

    Ok(Json(NewsResponse {
        items,
        total: page.total,
        page: query.page,
        limit: query.limit,
        pages: page.total.div_ceil(query.limit as usize),
        source: query.source,
    }))
}

async fn news_meta(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let sources = state.news.sources().await?;
    Ok(Json(json!({ "sources": sources })))
}

async fn live_snapshot(State(state): State<AppState>) -> Result<Json<LivePayload>, ApiError> {
    let snap = state.live.current().await?;
    Ok(Json(LivePayload::from(&snap)))
}

async fn live_events_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(live_stream(state.live.clone(), state.heartbeat))
}
