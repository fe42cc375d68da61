use super::*;
use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use shared::error::ErrorCode;
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Debug, Default)]
struct Recorded {
    query: HashMap<String, String>,
    field_name: Option<String>,
    file_name: Option<String>,
    file_len: usize,
    selected: Vec<String>,
}

#[derive(Clone, Default)]
struct Recorder {
    inner: Arc<Mutex<Recorded>>,
}

async fn record_ingest(
    State(recorder): State<Recorder>,
    Query(query): Query<HashMap<String, String>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let mut recorded = recorder.inner.lock().await;
    recorded.query = query;
    while let Some(field) = multipart.next_field().await.expect("field") {
        recorded.field_name = field.name().map(str::to_owned);
        recorded.file_name = field.file_name().map(str::to_owned);
        recorded.file_len = field.bytes().await.expect("bytes").len();
    }
    Json(json!({
        "success": true,
        "message": "Frames extracted",
        "frames_extracted": 12,
        "images_processed": 12,
        "output_folder": "/data/images"
    }))
}

async fn record_selection(
    State(recorder): State<Recorder>,
    Json(request): Json<SelectPhotosRequest>,
) -> impl IntoResponse {
    let remaining = request.selected_photos.len();
    recorder.inner.lock().await.selected = request.selected_photos;
    Json(json!({
        "success": true,
        "deleted_count": 8,
        "remaining_count": remaining
    }))
}

async fn spawn_backend(app: Router) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn video() -> UploadedArtifact {
    UploadedArtifact::new("turntable.mp4", vec![7u8; 4096])
}

#[tokio::test]
async fn extract_frames_sends_video_field_and_config_query() {
    let recorder = Recorder::default();
    let app = Router::new()
        .route("/extractframes", post(record_ingest))
        .with_state(recorder.clone());
    let gateway = HttpGateway::new(&spawn_backend(app).await).expect("gateway");

    let config = Config {
        frame_count: 90,
        reduction_percentage: 20,
        segment_objects: true,
    };
    let body = gateway
        .extract_frames(&video(), &config)
        .await
        .expect("extract");

    assert_eq!(body.images_processed, 12);
    let recorded = recorder.inner.lock().await;
    assert_eq!(recorded.field_name.as_deref(), Some("video"));
    assert_eq!(recorded.file_name.as_deref(), Some("turntable.mp4"));
    assert_eq!(recorded.file_len, 4096);
    assert_eq!(recorded.query.get("num_frames").map(String::as_str), Some("90"));
    assert_eq!(
        recorded.query.get("segment_objects").map(String::as_str),
        Some("true")
    );
    assert_eq!(
        recorded.query.get("reduction_percentage").map(String::as_str),
        Some("20")
    );
}

#[tokio::test]
async fn upload_photos_uses_archive_field_without_frame_count() {
    let recorder = Recorder::default();
    let app = Router::new()
        .route("/uploadphotos", post(record_ingest))
        .with_state(recorder.clone());
    let gateway = HttpGateway::new(&spawn_backend(app).await).expect("gateway");

    gateway
        .upload_photos(
            &UploadedArtifact::new("set.zip", vec![1, 2, 3]),
            &Config::default(),
        )
        .await
        .expect("upload");

    let recorded = recorder.inner.lock().await;
    assert_eq!(recorded.field_name.as_deref(), Some("photos_zip"));
    assert!(!recorded.query.contains_key("num_frames"));
    assert_eq!(
        recorded.query.get("segment_objects").map(String::as_str),
        Some("false")
    );
}

#[tokio::test]
async fn ingest_failure_carries_backend_detail() {
    let app = Router::new().route(
        "/uploadphotos",
        post(|| async {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"detail": "No valid images found in the ZIP"})),
            )
        }),
    );
    let gateway = HttpGateway::new(&spawn_backend(app).await).expect("gateway");

    let err = gateway
        .upload_photos(&UploadedArtifact::new("set.zip", vec![0]), &Config::default())
        .await
        .expect_err("must fail");

    assert_eq!(err.code, ErrorCode::Backend);
    assert_eq!(err.status, Some(400));
    assert_eq!(err.message, "No valid images found in the ZIP");
}

#[tokio::test]
async fn failure_without_json_body_uses_generic_reason() {
    let app = Router::new().route(
        "/extractframes",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let gateway = HttpGateway::new(&spawn_backend(app).await).expect("gateway");

    let err = gateway
        .extract_frames(&video(), &Config::default())
        .await
        .expect_err("must fail");

    assert_eq!(err.code, ErrorCode::Backend);
    assert_eq!(err.status, Some(500));
    assert_eq!(err.message, Operation::ExtractFrames.generic_failure());
}

#[tokio::test]
async fn list_photos_returns_photos_and_rejects_unsuccessful_listing() {
    let app = Router::new().route(
        "/photos",
        get(|| async {
            Json(json!({
                "success": true,
                "photos": [
                    {"filename": "a.jpg", "size": 2048, "url": "/photo/a.jpg"},
                    {"filename": "b.jpg", "size": 4096, "url": "/photo/b.jpg"}
                ],
                "total_count": 2
            }))
        }),
    );
    let gateway = HttpGateway::new(&spawn_backend(app).await).expect("gateway");
    let photos = gateway.list_photos().await.expect("photos");
    assert_eq!(photos.len(), 2);
    assert_eq!(photos[1].filename, "b.jpg");
    assert_eq!(
        gateway.photo_url(&photos[0]).expect("url").path(),
        "/photo/a.jpg"
    );

    let empty = Router::new().route(
        "/photos",
        get(|| async {
            Json(json!({"success": false, "message": "No photos available", "photos": []}))
        }),
    );
    let gateway = HttpGateway::new(&spawn_backend(empty).await).expect("gateway");
    let err = gateway.list_photos().await.expect_err("must fail");
    assert_eq!(err.code, ErrorCode::Backend);
    assert_eq!(err.message, "No photos available");
}

#[tokio::test]
async fn confirm_selection_posts_selected_filenames() {
    let recorder = Recorder::default();
    let app = Router::new()
        .route("/photos/select", post(record_selection))
        .with_state(recorder.clone());
    let gateway = HttpGateway::new(&spawn_backend(app).await).expect("gateway");

    let selected = vec!["a.jpg".to_string(), "b.jpg".to_string()];
    let confirmed = gateway
        .confirm_selection(&selected)
        .await
        .expect("confirm");

    assert_eq!(confirmed.remaining_count, 2);
    assert_eq!(confirmed.deleted_count, Some(8));
    assert!(confirmed.remaining_photos.is_none());
    assert_eq!(recorder.inner.lock().await.selected, selected);
}

#[tokio::test]
async fn reconstruction_failure_reason_comes_from_error_field() {
    let app = Router::new().route(
        "/photogrammetry",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": "insufficient overlap",
                    "message": "Pipeline failed during execution"
                })),
            )
        }),
    );
    let gateway = HttpGateway::new(&spawn_backend(app).await).expect("gateway");

    let err = gateway.run_reconstruction().await.expect_err("must fail");
    assert_eq!(err.code, ErrorCode::Backend);
    assert_eq!(err.message, "insufficient overlap");
}

#[tokio::test]
async fn reconstruction_success_false_on_ok_status_is_a_failure() {
    let app = Router::new().route(
        "/photogrammetry",
        post(|| async { Json(json!({"success": false})) }),
    );
    let gateway = HttpGateway::new(&spawn_backend(app).await).expect("gateway");

    let err = gateway.run_reconstruction().await.expect_err("must fail");
    assert_eq!(err.code, ErrorCode::Backend);
    assert_eq!(err.message, Operation::RunReconstruction.generic_failure());
}

#[tokio::test]
async fn reconstruction_result_and_artifact_download() {
    let app = Router::new()
        .route(
            "/photogrammetry",
            post(|| async {
                Json(json!({
                    "success": true,
                    "download_url": "/download/photogrammetry_result.zip",
                    "images_processed": 24,
                    "mesh_statistics": {
                        "vertices": 10, "faces": 12, "triangles": 12,
                        "texture_coordinates": 10, "vertex_normals": 0,
                        "file_size_mb": 0.01
                    }
                }))
            }),
        )
        .route(
            "/download/:filename",
            get(|| async { b"PK\x03\x04model".to_vec() }),
        );
    let gateway = HttpGateway::new(&spawn_backend(app).await).expect("gateway");

    let result = gateway.run_reconstruction().await.expect("reconstruction");
    assert_eq!(
        result.download_reference,
        "/download/photogrammetry_result.zip"
    );
    assert_eq!(result.images_processed, Some(24));
    assert_eq!(result.mesh_statistics.expect("mesh").faces, 12);
    assert!(result.texture_info.is_none());

    let bytes = gateway
        .download_artifact(&result.download_reference)
        .await
        .expect("download");
    assert_eq!(bytes, b"PK\x03\x04model");
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");

    let gateway = HttpGateway::new(&format!("http://{addr}")).expect("gateway");
    let err = gateway.list_photos().await.expect_err("must fail");
    assert_eq!(err.code, ErrorCode::Transport);
    assert!(
        err.message.contains("could not reach the backend"),
        "unexpected error: {err}"
    );
}

#[test]
fn resolves_locators_under_base_path() {
    let gateway = HttpGateway::new("http://example.test:8000/api").expect("gateway");
    assert_eq!(gateway.base_url().as_str(), "http://example.test:8000/api/");
    assert_eq!(
        gateway.resolve("/photos").expect("photos").as_str(),
        "http://example.test:8000/api/photos"
    );
    assert_eq!(
        gateway
            .resolve("/download/photogrammetry_result.zip")
            .expect("download")
            .as_str(),
        "http://example.test:8000/api/download/photogrammetry_result.zip"
    );
    assert_eq!(
        gateway
            .resolve("http://cdn.test/result.zip")
            .expect("absolute")
            .as_str(),
        "http://cdn.test/result.zip"
    );
}

#[test]
fn rejects_unusable_backend_urls() {
    assert_eq!(
        HttpGateway::new("not a url").err().map(|e| e.code),
        Some(ErrorCode::Validation)
    );
    assert!(HttpGateway::new("mailto:ops@example.test").is_err());
}

#[test]
fn unsuccessful_reconstruction_body_prefers_error_over_message() {
    let err = reconstruction_result(ReconstructionResponse {
        success: false,
        download_url: None,
        mesh_statistics: None,
        texture_info: None,
        images_processed: None,
        error: Some("bundle adjustment diverged".into()),
        message: Some("Pipeline failed".into()),
    })
    .expect_err("must fail");
    assert_eq!(err.message, "bundle adjustment diverged");

    let err = reconstruction_result(ReconstructionResponse {
        success: true,
        download_url: None,
        mesh_statistics: None,
        texture_info: None,
        images_processed: None,
        error: None,
        message: None,
    })
    .expect_err("missing download url");
    assert_eq!(err.code, ErrorCode::Decode);
}
