//! Moderation endpoints
//!
//! - `POST /moderate` - base64 image in a JSON body
//! - `POST /moderate/upload` - multipart form with an `image` file field
//! - `DELETE /moderate/cache/{key}` - drop one cached verdict

use axum::{
    Json, Router,
    extract::{
        Multipart, Path, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::StatusCode,
    routing::{delete, post},
};
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::AppState;
use crate::domain::moderation::{CacheKey, ModerationRequest, OperationSet, Sensitivity, Verdict};
use crate::error::ModerationError;
use crate::services::coordinator::Resolution;
use crate::services::error::LogErr;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/moderate", post(moderate))
        .route("/moderate/upload", post(moderate_upload))
        .route("/moderate/cache/{key}", delete(invalidate))
}

#[derive(Debug, Deserialize)]
struct ModerateRequest {
    /// Base64 image, optionally as a `data:<mime>;base64,` URL
    image_data: String,
    #[serde(default)]
    operations: Option<Vec<String>>,
    #[serde(default)]
    sensitivity: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ModerateResponse {
    request_id: Option<String>,
    cache_key: CacheKey,
    cached: bool,
    verdict: Verdict,
    processing_time_ms: f64,
}

impl ModerateResponse {
    fn new(request: &ModerationRequest, resolution: Resolution, started: Instant) -> Self {
        Self {
            request_id: request.request_id().map(str::to_string),
            cache_key: resolution.key,
            cached: resolution.cached,
            verdict: resolution.verdict,
            processing_time_ms: elapsed_ms(started),
        }
    }
}

pub(super) fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Decode a base64 payload, tolerating a data URL prefix and surrounding whitespace
pub(super) fn decode_image_data(raw: &str) -> Result<Vec<u8>, ModerationError> {
    let raw = raw.trim();
    let payload = match raw.strip_prefix("data:") {
        Some(url) => url
            .split_once(";base64,")
            .map(|(_, data)| data)
            .ok_or_else(|| ModerationError::BadRequest("data URL is not base64 encoded".into()))?,
        None => raw,
    };

    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| ModerationError::BadRequest(format!("image_data is not valid base64: {}", e)))
}

pub(super) fn parse_sensitivity(raw: Option<&str>) -> Result<Sensitivity, ModerationError> {
    raw.map(str::parse::<Sensitivity>).transpose().map(Option::unwrap_or_default)
}

/// Resolve under the per-request deadline.
///
/// Hitting the deadline only abandons this caller's wait; the computation
/// keeps running and still publishes to the cache.
pub(super) async fn resolve_within(
    state: &AppState,
    request: &ModerationRequest,
) -> Result<Resolution, ModerationError> {
    let deadline = state.config.request_timeout;
    tokio::time::timeout(deadline, state.coordinator.resolve(request))
        .await
        .map_err(|_| {
            tracing::warn!(
                request_id = request.request_id().unwrap_or("-"),
                "[moderate] request deadline of {:?} exceeded",
                deadline
            );
            ModerationError::InferenceTimeout(deadline)
        })?
}

async fn respond(
    state: &AppState,
    request: ModerationRequest,
    started: Instant,
) -> Result<Json<ModerateResponse>, ModerationError> {
    let resolution = resolve_within(state, &request).await?;

    tracing::debug!(
        request_id = request.request_id().unwrap_or("-"),
        cached = resolution.cached,
        flagged = resolution.verdict.flagged,
        size_kb = request.image_size_kb(),
        "[moderate] {}",
        resolution.verdict.describe()
    );

    Ok(Json(ModerateResponse::new(&request, resolution, started)))
}

/// POST /moderate
async fn moderate(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ModerateRequest>, JsonRejection>,
) -> Result<Json<ModerateResponse>, ModerationError> {
    let started = Instant::now();
    let Json(body) = body.map_err(|e| ModerationError::BadRequest(e.body_text()))?;

    let image = decode_image_data(&body.image_data)?;
    let operations = match &body.operations {
        Some(names) => OperationSet::parse(names)?,
        None => OperationSet::default(),
    };
    let request = ModerationRequest::new(image, operations)
        .with_sensitivity(parse_sensitivity(body.sensitivity.as_deref())?)
        .with_request_id(body.request_id);

    respond(&state, request, started).await
}

fn malformed_form(e: MultipartError) -> ModerationError {
    ModerationError::BadRequest(format!("malformed form data: {}", e))
}

/// POST /moderate/upload
///
/// Fields: `image` (file, required), `operations` (comma separated),
/// `sensitivity`, `request_id`. Unknown fields are ignored.
async fn moderate_upload(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ModerateResponse>, ModerationError> {
    let started = Instant::now();
    let mut multipart = multipart.map_err(|e| ModerationError::BadRequest(e.body_text()))?;

    let mut image: Option<Bytes> = None;
    let mut operations: Option<String> = None;
    let mut sensitivity: Option<String> = None;
    let mut request_id: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(malformed_form)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => image = Some(field.bytes().await.map_err(malformed_form)?),
            "operations" => operations = Some(field.text().await.map_err(malformed_form)?),
            "sensitivity" => sensitivity = Some(field.text().await.map_err(malformed_form)?),
            "request_id" => request_id = Some(field.text().await.map_err(malformed_form)?),
            other => tracing::debug!("[moderate] ignoring form field '{}'", other),
        }
    }

    let image = image.ok_or_else(|| ModerationError::BadRequest("missing 'image' field".into()))?;
    let operations = match operations.as_deref() {
        Some(csv) => OperationSet::parse_csv(csv)?,
        None => OperationSet::default(),
    };
    let request = ModerationRequest::new(image, operations)
        .with_sensitivity(parse_sensitivity(sensitivity.as_deref())?)
        .with_request_id(request_id);

    respond(&state, request, started).await
}

/// DELETE /moderate/cache/{key}
async fn invalidate(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let key = CacheKey::parse(&raw).ok_or(StatusCode::BAD_REQUEST)?;

    let removed = state
        .coordinator
        .invalidate(&key)
        .await
        .log_status("[moderate] cache invalidation failed", StatusCode::SERVICE_UNAVAILABLE)?;

    tracing::info!(key = %key, removed, "[moderate] cache entry invalidated");
    Ok(StatusCode::NO_CONTENT)
}
