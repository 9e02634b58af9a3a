//! HTTP surface: prediction and history endpoints

use crate::error::ServiceError;
use crate::metrics::ServiceMetrics;
use crate::models::inference::InferenceEngine;
use crate::preprocess::ImagePreprocessor;
use crate::store::PredictionRecorder;
use crate::types::label::WasteClass;
use crate::types::prediction::{HistoryEntry, PredictionSummary};
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const PREDICT_MESSAGE: &str = "Model is predicted successfully";

/// Services shared by every request handler
pub struct AppState {
    pub preprocessor: ImagePreprocessor,
    pub engine: InferenceEngine,
    pub recorder: PredictionRecorder,
    pub metrics: Arc<ServiceMetrics>,
    /// Collapse processing failures to 500
    pub legacy_status_codes: bool,
    /// History size when the request gives no limit; `None` returns everything
    pub default_history_limit: Option<usize>,
}

/// Build the service router
pub fn router(state: Arc<AppState>, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/predict", post(predict_handler))
        .route("/predict-history", get(history_handler))
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .with_state(state)
}

/// Success envelope
#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    data: T,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            status: "success",
            message: None,
            data,
        }
    }
}

/// Error envelope `{"status":"error","message":...}`
#[derive(Debug)]
pub struct ErrorResponse {
    status: StatusCode,
    message: String,
}

impl ErrorResponse {
    fn new(err: &ServiceError, legacy: bool) -> Self {
        Self {
            status: err.status_code(legacy),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let body = Json(json!({ "status": "error", "message": self.message }));
        (self.status, body).into_response()
    }
}

impl AppState {
    /// Log and count a failed request, producing its response
    fn fail(&self, endpoint: &str, err: ServiceError) -> ErrorResponse {
        self.metrics.record_failure(err.kind());
        if err.is_client_error() {
            info!(endpoint = endpoint, error = %err, "Rejected request");
        } else {
            warn!(endpoint = endpoint, kind = err.kind(), error = %err, "Request failed");
        }
        ErrorResponse::new(&err, self.legacy_status_codes)
    }

    /// Decode, classify and persist one upload
    async fn classify(
        &self,
        bytes: Vec<u8>,
    ) -> Result<(PredictionSummary, Duration), ServiceError> {
        let preprocessor = self.preprocessor;
        let engine = self.engine.clone();

        let (prediction, inference_time) = tokio::task::spawn_blocking(move || {
            let input = preprocessor.process(&bytes)?;
            let started = Instant::now();
            let prediction = engine.predict(&input)?;
            Ok::<_, ServiceError>((prediction, started.elapsed()))
        })
        .await
        .map_err(|e| ServiceError::Inference(e.to_string()))??;

        let record = self.recorder.record(prediction.label).await?;
        Ok((record.summary(), inference_time))
    }
}

/// Oversized bodies keep their 413, anything else is a malformed upload
fn multipart_error(err: MultipartError) -> ServiceError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::TooLarge(err.body_text())
    } else {
        ServiceError::Input(err.body_text())
    }
}

/// Read the `file` part of the upload.
///
/// A part without a filename is a form value, not a file, and is skipped.
async fn read_file_part(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Vec<u8>, ServiceError> {
    let no_file = || ServiceError::Input("No file part".to_string());

    let mut multipart = multipart.map_err(|_| no_file())?;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let Some(filename) = field.file_name() else {
            continue;
        };
        if filename.is_empty() {
            return Err(ServiceError::Input("No selected file".to_string()));
        }

        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok(bytes.to_vec());
    }

    Err(no_file())
}

async fn predict_handler(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ApiResponse<PredictionSummary>>, ErrorResponse> {
    let started = Instant::now();

    let bytes = read_file_part(multipart)
        .await
        .map_err(|e| state.fail("predict", e))?;

    let (summary, inference_time) = state
        .classify(bytes)
        .await
        .map_err(|e| state.fail("predict", e))?;

    let elapsed = started.elapsed();
    state
        .metrics
        .record_prediction(summary.result, elapsed, inference_time);

    info!(
        prediction_id = %summary.id,
        result = %summary.result,
        latency_us = elapsed.as_micros() as u64,
        "Prediction served"
    );

    Ok(Json(ApiResponse {
        status: "success",
        message: Some(PREDICT_MESSAGE),
        data: summary,
    }))
}

/// Query string of `GET /predict-history`
#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<String>,
}

impl HistoryParams {
    fn limit(&self, default: Option<usize>) -> Result<Option<usize>, ServiceError> {
        match self.limit.as_deref() {
            None | Some("") => Ok(default),
            Some(raw) => raw
                .parse::<usize>()
                .map(|l| (l > 0).then_some(l))
                .map_err(|_| ServiceError::Input(format!("Invalid limit: {}", raw))),
        }
    }
}

async fn history_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<HistoryEntry>>>, ErrorResponse> {
    let limit = query
        .map_err(|e| ServiceError::Input(e.body_text()))
        .and_then(|Query(params)| params.limit(state.default_history_limit))
        .map_err(|e| state.fail("predict-history", e))?;

    let entries = state
        .recorder
        .history(limit)
        .await
        .map_err(|e| state.fail("predict-history", e))?;

    state.metrics.record_history();
    info!(count = entries.len(), limit = ?limit, "History served");

    Ok(Json(ApiResponse::success(entries)))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "OK",
        "model": state.engine.model_name(),
        "labels": WasteClass::COUNT,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::models::inference::tests::FixedScores;
    use crate::models::inference::Classifier;
    use crate::preprocess::tests::red_jpeg;
    use crate::preprocess::ImageTensor;
    use crate::store::{MemoryStore, PredictionStore};
    use crate::types::prediction::PredictionRecord;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{DateTime, Utc};
    use serde_json::Value;
    use tower::ServiceExt;

    const BOUNDARY: &str = "----wasteclassifierboundary";

    struct Harness {
        state: Arc<AppState>,
        store: Arc<MemoryStore>,
    }

    impl Harness {
        fn new(model: impl Classifier + 'static) -> Self {
            Self::with_store(model, Arc::new(MemoryStore::new()), false)
        }

        fn with_store(
            model: impl Classifier + 'static,
            store: Arc<MemoryStore>,
            legacy_status_codes: bool,
        ) -> Self {
            let state = Arc::new(AppState {
                preprocessor: ImagePreprocessor::default(),
                engine: InferenceEngine::new(Arc::new(model)).unwrap(),
                recorder: PredictionRecorder::new(store.clone()),
                metrics: Arc::new(ServiceMetrics::new()),
                legacy_status_codes,
                default_history_limit: None,
            });
            Self { state, store }
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = router(self.state.clone(), 10 * 1024 * 1024)
                .oneshot(request)
                .await
                .unwrap();
            let status = response.status();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            (status, serde_json::from_slice(&body).unwrap())
        }
    }

    /// Multipart body with a single part
    fn multipart_request(name: &str, filename: Option<&str>, content: &[u8]) -> Request<Body> {
        let disposition = match filename {
            Some(f) => format!("form-data; name=\"{}\"; filename=\"{}\"", name, f),
            None => format!("form-data; name=\"{}\"", name),
        };
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(format!("Content-Disposition: {}\r\n", disposition).as_bytes());
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/predict")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_predict_red_jpeg() {
        let harness = Harness::new(FixedScores::favouring(WasteClass::Battery));

        let (status, body) = harness
            .send(multipart_request("file", Some("red.jpg"), &red_jpeg()))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["message"], "Model is predicted successfully");
        assert_eq!(body["data"]["result"], "battery");

        let id = body["data"]["id"].as_str().unwrap();
        assert_eq!(uuid::Uuid::parse_str(id).unwrap().get_version_num(), 4);
        let created_at = body["data"]["createdAt"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(created_at).is_ok());

        let stored = harness.store.get(id).unwrap();
        assert_eq!(stored.result, WasteClass::Battery);
        assert_eq!(stored.created_at, created_at);
        assert!(stored.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_missing_file_part_is_rejected_without_side_effects() {
        let harness = Harness::new(FixedScores::favouring(WasteClass::Paper));

        let (status, body) = harness
            .send(multipart_request("image", Some("red.jpg"), &red_jpeg()))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "status": "error", "message": "No file part" }));
        assert!(harness.store.is_empty());
    }

    #[tokio::test]
    async fn test_non_multipart_request_is_no_file_part() {
        let harness = Harness::new(FixedScores::favouring(WasteClass::Paper));
        let request = Request::builder()
            .method("POST")
            .uri("/predict")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let (status, body) = harness.send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No file part");
        assert!(harness.store.is_empty());
    }

    #[tokio::test]
    async fn test_file_field_without_filename_is_not_a_file() {
        let harness = Harness::new(FixedScores::favouring(WasteClass::Paper));
        let (status, body) = harness
            .send(multipart_request("file", None, b"plain form value"))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No file part");
    }

    #[tokio::test]
    async fn test_empty_filename_is_rejected() {
        let harness = Harness::new(FixedScores::favouring(WasteClass::Paper));

        let (status, body) = harness
            .send(multipart_request("file", Some(""), &red_jpeg()))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "status": "error", "message": "No selected file" }));
        assert!(harness.store.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_upload_creates_no_record() {
        let harness = Harness::new(FixedScores::favouring(WasteClass::Paper));

        let (status, body) = harness
            .send(multipart_request("file", Some("notes.txt"), b"not an image at all"))
            .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], "error");
        assert!(!body["message"].as_str().unwrap().is_empty());
        assert!(harness.store.is_empty());
        assert_eq!(harness.state.metrics.get_failures_by_kind().get("decode"), Some(&1));
    }

    #[tokio::test]
    async fn test_legacy_status_codes_report_server_error() {
        let harness = Harness::with_store(
            FixedScores::favouring(WasteClass::Paper),
            Arc::new(MemoryStore::new()),
            true,
        );

        let (status, _) = harness
            .send(multipart_request("file", Some("notes.txt"), b"not an image"))
            .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(harness.store.is_empty());
    }

    struct FailingModel;

    impl Classifier for FailingModel {
        fn name(&self) -> &str {
            "failing"
        }

        fn scores(&self, _input: &ImageTensor) -> Result<Vec<f32>, ServiceError> {
            Err(ServiceError::Inference("session crashed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_inference_failure_passes_message_through() {
        let harness = Harness::new(FailingModel);

        let (status, body) = harness
            .send(multipart_request("file", Some("red.jpg"), &red_jpeg()))
            .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "status": "error", "message": "session crashed" }));
        assert!(harness.store.is_empty());
    }

    struct ReadOnlyStore;

    #[async_trait]
    impl PredictionStore for ReadOnlyStore {
        fn backend(&self) -> &'static str {
            "read-only"
        }

        async fn insert(&self, _record: &PredictionRecord) -> Result<DateTime<Utc>, ServiceError> {
            Err(ServiceError::Storage("quota exceeded".to_string()))
        }

        async fn list(&self, _limit: Option<usize>) -> Result<Vec<HistoryEntry>, ServiceError> {
            Err(ServiceError::Storage("permission denied".to_string()))
        }
    }

    fn read_only_state() -> Arc<AppState> {
        Arc::new(AppState {
            preprocessor: ImagePreprocessor::default(),
            engine: InferenceEngine::new(Arc::new(FixedScores::favouring(WasteClass::Clothes)))
                .unwrap(),
            recorder: PredictionRecorder::new(Arc::new(ReadOnlyStore)),
            metrics: Arc::new(ServiceMetrics::new()),
            legacy_status_codes: false,
            default_history_limit: None,
        })
    }

    #[tokio::test]
    async fn test_failed_write_reports_failure_without_id() {
        let response = router(read_only_state(), 1024 * 1024)
            .oneshot(multipart_request("file", Some("red.jpg"), &red_jpeg()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({ "status": "error", "message": "quota exceeded" }));
    }

    #[tokio::test]
    async fn test_history_read_failure() {
        let response = router(read_only_state(), 1024)
            .oneshot(get("/predict-history"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_history_returns_every_prediction() {
        let harness = Harness::new(FixedScores::favouring(WasteClass::GreenGlass));

        let mut ids = Vec::new();
        for _ in 0..3 {
            let (_, body) = harness
                .send(multipart_request("file", Some("red.jpg"), &red_jpeg()))
                .await;
            ids.push(body["data"]["id"].as_str().unwrap().to_string());
        }

        let (status, body) = harness.send(get("/predict-history")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert!(body.get("message").is_none());

        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 3);
        for entry in data {
            assert_eq!(entry["result"], "green-glass");
            assert!(entry["createdAt"].is_string());
            assert!(ids.contains(&entry["id"].as_str().unwrap().to_string()));
        }
    }

    #[tokio::test]
    async fn test_history_limit_parameter() {
        let harness = Harness::new(FixedScores::favouring(WasteClass::Metal));
        for _ in 0..4 {
            harness.store.insert(&PredictionRecord::new(WasteClass::Metal)).await.unwrap();
        }

        let (_, body) = harness.send(get("/predict-history?limit=2")).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let (_, body) = harness.send(get("/predict-history?limit=0")).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 4);

        let (status, body) = harness.send(get("/predict-history?limit=lots")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid limit: lots");
    }

    #[tokio::test]
    async fn test_repeated_limit_gets_error_envelope() {
        let harness = Harness::new(FixedScores::favouring(WasteClass::Metal));
        let (status, body) = harness.send(get("/predict-history?limit=1&limit=2")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("limit"));
    }

    #[tokio::test]
    async fn test_oversized_upload_is_payload_too_large() {
        let harness = Harness::new(FixedScores::favouring(WasteClass::Paper));
        let response = router(harness.state.clone(), 1024)
            .oneshot(multipart_request("file", Some("big.jpg"), &vec![0u8; 16 * 1024]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "error");
        assert!(harness.store.is_empty());
        assert_eq!(
            harness.state.metrics.get_failures_by_kind().get("too_large"),
            Some(&1)
        );
    }

    #[tokio::test]
    async fn test_empty_history() {
        let harness = Harness::new(FixedScores::favouring(WasteClass::Metal));
        let (status, body) = harness.send(get("/predict-history")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "success", "data": [] }));
    }

    #[tokio::test]
    async fn test_health() {
        let harness = Harness::new(FixedScores::favouring(WasteClass::Metal));
        let (status, body) = harness.send(get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["model"], "fixed");
        assert_eq!(body["labels"], 12);
    }
}
