//! Compatibility endpoints under `/content`
//!
//! `/content/detect` keeps the response shape older clients consume: one
//! boolean and one confidence over nudity and face analysis together.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use super::moderate::{decode_image_data, elapsed_ms, parse_sensitivity, resolve_within};
use crate::AppState;
use crate::constants::SERVICE_NAME;
use crate::domain::moderation::{ModerationRequest, Operation, OperationSet, Verdict};
use crate::error::ModerationError;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/content/detect", post(detect))
        .route("/content/health", get(content_health))
}

#[derive(Debug, Deserialize)]
struct DetectRequest {
    image_data: String,
    #[serde(default)]
    sensitivity: Option<String>,
}

#[derive(Debug, Serialize)]
struct DetectResponse {
    nudity_detected: bool,
    confidence_score: f32,
    detection_details: String,
    processing_time_ms: f64,
    image_size_kb: f64,
    sensitivity_used: String,
}

/// Single confidence for the flat response: certain when the face check
/// flagged the image, the nudity score otherwise
fn legacy_confidence(verdict: &Verdict) -> f32 {
    match verdict.result(Operation::Face) {
        Some(face) if face.flagged => 1.0,
        _ => verdict
            .result(Operation::Nudity)
            .map(|nudity| nudity.score)
            .unwrap_or_default(),
    }
}

/// POST /content/detect
async fn detect(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DetectRequest>, JsonRejection>,
) -> Result<Json<DetectResponse>, ModerationError> {
    let started = Instant::now();
    let Json(body) = body.map_err(|e| ModerationError::BadRequest(e.body_text()))?;

    let image = decode_image_data(&body.image_data)?;
    let sensitivity = parse_sensitivity(body.sensitivity.as_deref())?;
    let request = ModerationRequest::new(image, OperationSet::new(Operation::ALL)?)
        .with_sensitivity(sensitivity);

    let resolution = resolve_within(&state, &request).await?;
    let verdict = resolution.verdict;

    let response = DetectResponse {
        nudity_detected: verdict.flagged,
        confidence_score: legacy_confidence(&verdict),
        detection_details: verdict.describe(),
        processing_time_ms: elapsed_ms(started),
        image_size_kb: request.image_size_kb(),
        sensitivity_used: sensitivity.to_string(),
    };

    tracing::info!(
        cached = resolution.cached,
        "[content] {} [{}] - {:.1}ms, {:.1}KB, confidence {:.2}",
        if response.nudity_detected { "BLOCKED" } else { "SAFE" },
        response.sensitivity_used,
        response.processing_time_ms,
        response.image_size_kb,
        response.confidence_score
    );

    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct ContentHealthResponse {
    status: &'static str,
    service: &'static str,
    models: BTreeMap<Operation, &'static str>,
    inference_workers: usize,
    in_flight: usize,
}

/// GET /content/health
async fn content_health(State(state): State<Arc<AppState>>) -> Json<ContentHealthResponse> {
    let models = state
        .coordinator
        .adapters()
        .adapters()
        .map(|adapter| {
            let status = if adapter.is_loaded() { "loaded" } else { "unloaded" };
            (adapter.operation(), status)
        })
        .collect();

    Json(ContentHealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        models,
        inference_workers: state.coordinator.inference_workers(),
        in_flight: state.coordinator.in_flight(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_filter::testing::{FakeAdapter, png};
    use crate::routes::testing::{json_post, send, state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use base64::Engine;
    use serde_json::json;

    fn encoded_sample() -> String {
        base64::engine::general_purpose::STANDARD.encode(png(40, 30, [30, 60, 90]))
    }

    #[tokio::test]
    async fn test_detect_keeps_flat_response_shape() {
        let nudity = Arc::new(FakeAdapter::new(Operation::Nudity, 0.7));
        let face = Arc::new(FakeAdapter::new(Operation::Face, 0.2));
        let app = crate::app(state(&[nudity.clone(), face.clone()]));

        let (status, body) = send(
            app,
            json_post(
                "/content/detect",
                json!({ "image_data": encoded_sample(), "sensitivity": "low" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        // 0.7 is under the low-sensitivity threshold of 0.75
        assert_eq!(body["nudity_detected"], false);
        assert_eq!(body["sensitivity_used"], "low");
        assert!((body["confidence_score"].as_f64().unwrap() - 0.7).abs() < 1e-6);
        assert!(body["image_size_kb"].as_f64().unwrap() > 0.0);
        assert!(body["detection_details"].as_str().unwrap().contains("nudity"));
        assert_eq!((nudity.calls(), face.calls()), (1, 1));
    }

    #[tokio::test]
    async fn test_detect_confidence_ignores_unflagged_face_score() {
        let app = crate::app(state(&[
            Arc::new(FakeAdapter::new(Operation::Nudity, 0.3)),
            Arc::new(FakeAdapter::new(Operation::Face, 0.5)),
        ]));

        let (status, body) = send(
            app,
            json_post("/content/detect", json!({ "image_data": encoded_sample() })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nudity_detected"], false);
        assert!((body["confidence_score"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_detect_underage_reports_full_confidence() {
        // the fake face adapter flags above the normal threshold of 0.6
        let app = crate::app(state(&[
            Arc::new(FakeAdapter::new(Operation::Nudity, 0.3)),
            Arc::new(FakeAdapter::new(Operation::Face, 0.9)),
        ]));

        let (status, body) = send(
            app,
            json_post("/content/detect", json!({ "image_data": encoded_sample() })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nudity_detected"], true);
        assert_eq!(body["confidence_score"], 1.0);
    }

    #[tokio::test]
    async fn test_detect_flags_at_default_sensitivity() {
        let app = crate::app(state(&[
            Arc::new(FakeAdapter::new(Operation::Nudity, 0.7)),
            Arc::new(FakeAdapter::new(Operation::Face, 0.0)),
        ]));

        let (status, body) = send(
            app,
            json_post("/content/detect", json!({ "image_data": encoded_sample() })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nudity_detected"], true);
        assert_eq!(body["sensitivity_used"], "normal");
    }

    #[tokio::test]
    async fn test_detect_failure_is_an_error_not_a_safe_answer() {
        let app = crate::app(state(&[Arc::new(FakeAdapter::new(Operation::Nudity, 0.1))]));

        let (status, body) = send(
            app,
            json_post("/content/detect", json!({ "image_data": encoded_sample() })),
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.get("nudity_detected").is_none());
        assert_eq!(body["error"]["kind"], "model_unavailable");
    }

    #[tokio::test]
    async fn test_content_health_lists_models() {
        let app = crate::app(state(&[
            Arc::new(FakeAdapter::new(Operation::Nudity, 0.1)),
            Arc::new(FakeAdapter::new(Operation::Face, 0.1)),
        ]));

        let request = Request::get("/content/health").body(Body::empty()).unwrap();
        let (status, body) = send(app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["models"]["nudity"], "loaded");
        assert_eq!(body["models"]["face"], "loaded");
        assert_eq!(body["inference_workers"], 4);
        assert_eq!(body["in_flight"], 0);
    }
}
