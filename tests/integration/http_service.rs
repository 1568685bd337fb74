#![allow(missing_docs)]

use std::io::Read;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use red_giant::config::ServerConfig;
use red_giant::http::{build_router, AppState, ServiceState};

fn test_app() -> (Router, AppState) {
    let state: AppState = Arc::new(ServiceState::new(ServerConfig::development()));
    (build_router(state.clone()), state)
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn upload_request(content_type: &str, name: &str, body: Vec<u8>) -> Request<Body> {
    Request::post("/upload")
        .header(header::CONTENT_TYPE, content_type)
        .header("x-peer-id", "peer-test")
        .header("x-file-name", name)
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn json_upload_reports_a_single_chunk() {
    let (app, _state) = test_app();
    let payload = format!("{{\"data\":\"{}\"}}", "x".repeat(16 * 1024 - 11)).into_bytes();
    assert_eq!(payload.len(), 16 * 1024);
    let response = app
        .oneshot(upload_request("application/json", "data.json", payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["process_mode"], 0);
    assert_eq!(json["optimal_chunk_size"], 65_536);
    assert_eq!(json["is_compressed"], false);
    assert_eq!(json["chunks_processed"], 1);
    assert_eq!(json["original_size"], 16 * 1024);
    let file_id = json["file_id"].as_str().unwrap();
    assert_eq!(file_id.len(), 16);
    assert!(file_id.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(json["throughput_mbps"].as_f64().unwrap() > 0.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn video_upload_streams_eight_chunks() {
    let (app, state) = test_app();
    let payload = vec![0xC3u8; 8 * 1024 * 1024];
    let response = app
        .oneshot(upload_request("video/mp4", "clip.mp4", payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["process_mode"], 3);
    assert_eq!(json["optimal_chunk_size"], 1_048_576);
    assert_eq!(json["is_compressed"], false);
    assert_eq!(json["chunks_processed"], 8);
    assert_eq!(state.metrics().snapshot().stream_requests, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn download_returns_the_stored_bytes() {
    let (app, _state) = test_app();
    let payload = b"plain text payload for the download roundtrip".to_vec();
    let response = app
        .clone()
        .oneshot(upload_request("text/plain", "notes.txt", payload.clone()))
        .await
        .unwrap();
    let json = json_body(response).await;
    let file_id = json["file_id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(
            Request::get(format!("/download/{file_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
        "text/plain"
    );
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap(),
        "attachment; filename=\"notes.txt\""
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], &payload[..]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn compressible_text_is_stored_gzipped() {
    let (app, _state) = test_app();
    let payload = b"the red flag is raised over the exposure surface ".repeat(4096);
    assert!(payload.len() >= 128 * 1024);
    let response = app
        .clone()
        .oneshot(upload_request("text/plain", "story.txt", payload.clone()))
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json["is_compressed"], true);
    let stored = json["bytes_processed"].as_u64().unwrap();
    assert!(stored < payload.len() as u64);
    assert_eq!(json["original_size"].as_u64().unwrap(), payload.len() as u64);

    // The stored bytes gunzip back to the original.
    let file_id = json["file_id"].as_str().unwrap().to_string();
    let response = app
        .oneshot(
            Request::get(format!("/download/{file_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(bytes.len() as u64, stored);
    let mut decoder = flate2::read::GzDecoder::new(&bytes[..]);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed).unwrap();
    assert_eq!(decompressed, payload);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn listing_and_search_cover_uploads() {
    let (app, _state) = test_app();
    for (name, body) in [("alpha.txt", "first file"), ("beta.txt", "second file")] {
        let response = app
            .clone()
            .oneshot(upload_request("text/plain", name, body.into()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(Request::get("/files").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json["count"], 2);
    assert_eq!(json["files"].as_array().unwrap().len(), 2);
    assert!(json["files"][0].get("bytes").is_none());

    let response = app
        .oneshot(Request::get("/search?q=alpha").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json["count"], 1);
    assert_eq!(json["query"], "alpha");
    assert_eq!(json["files"][0]["name"], "alpha.txt");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oversized_bodies_are_rejected_up_front() {
    let mut config = ServerConfig::development();
    config.max_body_bytes = 1024;
    let state: AppState = Arc::new(ServiceState::new(config));
    let app = build_router(state.clone());
    let response = app
        .oneshot(upload_request(
            "application/octet-stream",
            "big.bin",
            vec![0u8; 4096],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn metrics_accumulate_across_requests() {
    let (app, state) = test_app();
    let response = app
        .clone()
        .oneshot(upload_request(
            "application/json",
            "a.json",
            b"{\"k\":1}".to_vec(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .clone()
        .oneshot(Request::post("/upload").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json["total_requests"], 2);
    assert_eq!(json["errors"], 1);
    assert_eq!(json["json_requests"], 1);
    assert_eq!(json["total_chunks"], 1);
    let snapshot = state.metrics().snapshot();
    assert_eq!(snapshot.total_bytes, 7);
}
