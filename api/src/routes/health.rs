//! Liveness and cache introspection

use axum::{Json, Router, extract::State, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::AppState;
use crate::constants::{SERVICE_NAME, VERSION};
use crate::services::cache::CacheStats;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/cache/stats", get(cache_stats))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    timestamp: DateTime<Utc>,
    uptime_seconds: u64,
    cache_connected: bool,
    version: &'static str,
}

/// GET /health
///
/// Always healthy while the process serves requests; a lost cache only
/// degrades to recomputing every verdict.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let cache_connected = state.coordinator.cache().ping().await;

    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        timestamp: Utc::now(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        cache_connected,
        version: VERSION,
    })
}

/// GET /cache/stats
async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    Json(state.coordinator.cache().stats().await)
}

/// GET /
async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": VERSION,
        "endpoints": {
            "moderate": "/moderate",
            "upload": "/moderate/upload",
            "detect": "/content/detect",
            "health": "/health",
            "content_health": "/content/health",
            "cache_stats": "/cache/stats",
        },
    }))
}
