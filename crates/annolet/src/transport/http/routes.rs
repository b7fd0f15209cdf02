//! HTTP route handlers.
//!
//! The stats actor wire protocol lives at `/stats`; `/metrics` is the
//! merged surface that overlays live queue depths; `/uploads` is the
//! storage-provider notification hook expressed as an endpoint.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use chrono::Utc;

use crate::intake::UploadEvent;
use crate::pipeline::Pipeline;
use crate::stats::{StatsDelta, StatsError};

pub fn routes(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/stats", get(get_stats).post(post_stats))
        .route("/metrics", get(get_metrics))
        .route("/uploads", post(post_upload))
        .with_state(pipeline)
}

async fn health_check() -> &'static str {
    "OK"
}

fn stats_unavailable(e: StatsError) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({ "error": e.to_string() })),
    )
}

async fn get_stats(State(pipeline): State<Arc<Pipeline>>) -> Response {
    match pipeline.stats().query().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => stats_unavailable(e).into_response(),
    }
}

/// Apply a partial delta; responds with the post-update snapshot.
async fn post_stats(
    State(pipeline): State<Arc<Pipeline>>,
    Json(delta): Json<StatsDelta>,
) -> Response {
    match pipeline.stats().update(delta).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => stats_unavailable(e).into_response(),
    }
}

/// Snapshot with queue depths overwritten by live lengths.
async fn get_metrics(State(pipeline): State<Arc<Pipeline>>) -> Response {
    match pipeline.stats().query().await {
        Ok(mut snapshot) => {
            snapshot.queue_depths = pipeline.queue_depths();
            snapshot.last_updated = Utc::now();
            Json(snapshot).into_response()
        }
        Err(e) => stats_unavailable(e).into_response(),
    }
}

async fn post_upload(
    State(pipeline): State<Arc<Pipeline>>,
    Json(event): Json<UploadEvent>,
) -> (StatusCode, Json<serde_json::Value>) {
    let queued = pipeline.notify_upload(&event);
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "queued": queued })),
    )
}
