use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cropscan_rs::client::{DetectionApi, DetectionClient};
use cropscan_rs::config::ClientConfig;
use cropscan_rs::error::{ApiErrorKind, MALFORMED_RESPONSE, NETWORK_ERROR};

/// # Detection Client Integration Tests
///
/// Every test starts an in-process mock of the inference service on an
/// ephemeral port and points a real `DetectionClient` at it:
/// ```bash
/// cargo test --test client_integration_test
/// ```

#[derive(Debug, Clone, Default)]
struct ReceivedUpload {
    query: HashMap<String, String>,
    field_name: Option<String>,
    file_name: Option<String>,
    content_type: Option<String>,
    size: usize,
}

type Received = Arc<Mutex<Option<ReceivedUpload>>>;

async fn record_upload(received: &Received, query: HashMap<String, String>, mut multipart: Multipart) {
    let mut upload = ReceivedUpload {
        query,
        ..Default::default()
    };

    while let Some(field) = multipart.next_field().await.unwrap() {
        upload.field_name = field.name().map(str::to_string);
        upload.file_name = field.file_name().map(str::to_string);
        upload.content_type = field.content_type().map(str::to_string);
        upload.size = field.bytes().await.unwrap().len();
    }

    *received.lock().unwrap() = Some(upload);
}

async fn predict(
    State(received): State<Received>,
    Query(query): Query<HashMap<String, String>>,
    multipart: Multipart,
) -> Json<Value> {
    record_upload(&received, query, multipart).await;
    Json(json!({
        "success": true,
        "disease_name": "Northern Leaf Blight",
        "confidence": 0.91,
        "severity": "high",
        "description": "Long grey-green lesions on leaves",
        "recommendations": ["Apply fungicide", "Rotate crops"],
        "detections": [
            {"class": "damage", "confidence": 0.91, "bbox": [12.0, 40.5, 120.0, 200.0]},
            {"class": "healthy", "confidence": 0.66, "bbox": [0.0, 0.0, 50.0, 50.0]}
        ],
        "total_detections": 2,
        "annotated_url": "http://192.168.1.100:8000/static/annotated/leaf.jpg"
    }))
}

async fn detect_video(
    State(received): State<Received>,
    Query(query): Query<HashMap<String, String>>,
    multipart: Multipart,
) -> Json<Value> {
    record_upload(&received, query, multipart).await;
    Json(json!({
        "success": true,
        "total_frames": 90,
        "frames_processed": 30,
        "total_detections": 1,
        "frame_results": [
            {"frame": 0, "detections": [{"class": "healthy", "confidence": 0.8, "bbox": [1.0, 2.0, 3.0, 4.0]}], "count": 1}
        ],
        "annotated_url": "/static/annotated/field.mp4"
    }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "model": "crop-yolov8n",
        "classes": {"0": "damage", "1": "healthy"}
    }))
}

fn inference_service(received: Received) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/detect/video", post(detect_video))
        .route("/health", get(health))
        .with_state(received)
}

/// Serves `app` on an ephemeral local port and returns its base URL
async fn spawn_service(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client_for(base_url: &str) -> DetectionClient {
    DetectionClient::new(ClientConfig::new(base_url).unwrap()).unwrap()
}

fn write_media(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"\xff\xd8\xff\xe0 fake media bytes").unwrap();
    path
}

#[tokio::test]
async fn test_detect_image_sends_file_and_confidence() {
    let received = Received::default();
    let base_url = spawn_service(inference_service(received.clone())).await;
    let client = client_for(&base_url);

    let dir = tempfile::tempdir().unwrap();
    let path = write_media(dir.path(), "leaf.png");
    let uri = url::Url::from_file_path(&path).unwrap().to_string();

    let result = client.detect_image(&uri, 0.4).await.unwrap();

    assert!(result.success);
    assert_eq!(result.disease_name, "Northern Leaf Blight");
    assert_eq!(result.detections.len(), 2);
    assert_eq!(result.detections[0].class_name, "damage");
    assert_eq!(result.total_detections, 2);
    // image URLs are already absolute and are left alone
    assert_eq!(
        result.annotated_url,
        "http://192.168.1.100:8000/static/annotated/leaf.jpg"
    );

    let upload = received.lock().unwrap().clone().unwrap();
    assert_eq!(upload.query.get("confidence").map(String::as_str), Some("0.4"));
    assert_eq!(upload.field_name.as_deref(), Some("file"));
    assert_eq!(upload.file_name.as_deref(), Some("leaf.png"));
    assert_eq!(upload.content_type.as_deref(), Some("image/png"));
    assert!(upload.size > 0);
}

#[tokio::test]
async fn test_detect_video_rewrites_annotated_url() {
    let received = Received::default();
    let base_url = spawn_service(inference_service(received.clone())).await;
    let client = client_for(&format!("{}/", base_url));

    let dir = tempfile::tempdir().unwrap();
    let path = write_media(dir.path(), "field.MOV");

    let result = client
        .detect_video(path.to_str().unwrap(), 0.3, 5)
        .await
        .unwrap();

    assert_eq!(
        result.annotated_url,
        format!("{}/static/annotated/field.mp4", base_url)
    );
    assert_eq!(result.frames_processed, 30);
    assert_eq!(result.all_detections().len(), 1);

    let upload = received.lock().unwrap().clone().unwrap();
    assert_eq!(upload.query.get("confidence").map(String::as_str), Some("0.3"));
    assert_eq!(upload.query.get("frame_skip").map(String::as_str), Some("5"));
    assert_eq!(upload.file_name.as_deref(), Some("field.MOV"));
    assert_eq!(upload.content_type.as_deref(), Some("video/quicktime"));
}

#[tokio::test]
async fn test_check_health() {
    let base_url = spawn_service(inference_service(Received::default())).await;

    let health = DetectionApi::check_health(&client_for(&base_url)).await.unwrap();

    assert!(health.is_online());
    assert_eq!(health.model, "crop-yolov8n");
    assert_eq!(health.classes.get("1").map(String::as_str), Some("healthy"));
}

#[tokio::test]
async fn test_error_detail_is_surfaced() {
    let app = Router::new().route(
        "/predict",
        post(|| async {
            (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                Json(json!({"detail": "bad file"})),
            )
        }),
    );
    let base_url = spawn_service(app).await;

    let dir = tempfile::tempdir().unwrap();
    let path = write_media(dir.path(), "leaf.gif");

    let err = client_for(&base_url)
        .detect_image(path.to_str().unwrap(), 0.25)
        .await
        .unwrap_err();

    assert_eq!(err.message, "bad file");
    assert_eq!(err.status, 415);
    assert_eq!(err.code, None);
    assert_eq!(err.kind(), ApiErrorKind::Server);
}

#[tokio::test]
async fn test_error_code_is_surfaced() {
    let app = Router::new().route(
        "/health",
        get(|| async {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"message": "model loading", "code": "MODEL_NOT_READY"})),
            )
        }),
    );
    let base_url = spawn_service(app).await;

    let err = client_for(&base_url).check_health().await.unwrap_err();

    assert_eq!(err.message, "model loading");
    assert_eq!(err.status, 503);
    assert_eq!(err.code.as_deref(), Some("MODEL_NOT_READY"));
}

#[tokio::test]
async fn test_non_json_error_body() {
    let app = Router::new().route(
        "/health",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error") }),
    );
    let base_url = spawn_service(app).await;

    let err = client_for(&base_url).check_health().await.unwrap_err();

    assert_eq!(err.message, "Request failed");
    assert_eq!(err.status, 500);
    assert_eq!(err.code, None);
}

#[tokio::test]
async fn test_malformed_success_body() {
    let app = Router::new().route(
        "/health",
        get(|| async { Json(json!({"uptime": 12})) }),
    );
    let base_url = spawn_service(app).await;

    let err = client_for(&base_url).check_health().await.unwrap_err();

    assert_eq!(err.code.as_deref(), Some(MALFORMED_RESPONSE));
    assert_eq!(err.status, 200);
    assert_eq!(err.kind(), ApiErrorKind::MalformedResponse);
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    // bind then drop to get a port nothing listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = client_for(&format!("http://127.0.0.1:{}", port));

    let err = client.check_health().await.unwrap_err();
    assert_eq!(err.status, 0);
    assert_eq!(err.code.as_deref(), Some(NETWORK_ERROR));
    assert!(err.is_network());

    let dir = tempfile::tempdir().unwrap();
    let path = write_media(dir.path(), "leaf.jpg");
    let err = client
        .detect_image(path.to_str().unwrap(), 0.25)
        .await
        .unwrap_err();
    assert_eq!(err.code.as_deref(), Some(NETWORK_ERROR));
}
