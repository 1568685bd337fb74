//! Adaptive HTTP service: content-aware ingestion over the exposure core.
//!
//! Each upload is classified by the [`analyzer`], optionally compressed,
//! exposed through an [`Orchestrator`] sized by the classification, and
//! persisted in the [`store`] under a content-hash id.

pub mod analyzer;
pub mod metrics;
pub mod store;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::config::ServerConfig;
use crate::error::{Result, RgError};
use crate::orchestrator::{Orchestrator, OrchestratorOptions};
use analyzer::{analyze, should_compress};
use metrics::{MetricsSnapshot, ServiceMetrics};
use store::{FileStore, StoredFile};

/// Crate version reported by `/health`.
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared per-service state.
pub struct ServiceState {
    config: ServerConfig,
    store: FileStore,
    metrics: ServiceMetrics,
    last_reason: RwLock<String>,
}

/// State handle threaded through every handler.
pub type AppState = Arc<ServiceState>;

impl ServiceState {
    /// Fresh state for `config`.
    pub fn new(config: ServerConfig) -> Self {
        let store = FileStore::new(config.mirror_dir.clone());
        Self {
            config,
            store,
            metrics: ServiceMetrics::new(),
            last_reason: RwLock::new("Stable".to_string()),
        }
    }

    /// The file registry.
    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// The request counters.
    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    fn reject(&self, status: StatusCode, message: impl Into<String>) -> ApiError {
        self.metrics.record_error();
        ApiError {
            status,
            message: message.into(),
        }
    }

    fn fail(&self, err: RgError) -> ApiError {
        self.metrics.record_error();
        ApiError::from(err)
    }
}

/// Builds the service router.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_body_bytes;
    Router::new()
        .route("/upload", post(upload_handler))
        .route("/download/:id", get(download_handler))
        .route("/files", get(files_handler))
        .route("/search", get(search_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Binds the listener and serves until SIGINT or SIGTERM.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let addr = SocketAddr::from((config.host, config.port));
    let state: AppState = Arc::new(ServiceState::new(config));
    let app = build_router(state);
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, version = SERVICE_VERSION, "http.listening");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("http.shutdown_clean");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(?err, "failed to listen for ctrl-c");
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::error!(?err, "failed to listen for SIGTERM"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

/// Successful `POST /upload` report. `throughput_mbps` is in MiB/s.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Always `"success"` on the 200 path.
    pub status: &'static str,
    /// 16-hex-char content id (first 8 bytes of the SHA-256).
    pub file_id: String,
    /// Stored byte count (after compression, when applied).
    pub bytes_processed: u64,
    /// Raw upload size.
    pub original_size: u64,
    /// Chunks exposed on the surface.
    pub chunks_processed: u32,
    /// Wall time spent processing the request.
    pub processing_time_ms: f64,
    /// Exposure throughput in MiB/s.
    pub throughput_mbps: f64,
    /// Normalized content type.
    pub content_type: String,
    /// Process-mode wire code.
    pub process_mode: u8,
    /// Whether the stored bytes are gzip-compressed.
    pub is_compressed: bool,
    /// Chunk size the analyzer picked.
    pub optimal_chunk_size: u32,
    /// Human-readable summary.
    pub message: String,
}

async fn upload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Json<UploadResponse>, ApiError> {
    let began = Instant::now();
    if body.is_empty() {
        return Err(state.reject(StatusCode::BAD_REQUEST, "empty payload"));
    }
    if body.len() > state.config.max_body_bytes {
        return Err(state.reject(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload exceeds the transfer buffer",
        ));
    }

    let declared_type = header_str(&headers, header::CONTENT_TYPE.as_str());
    let peer_id = header_str(&headers, "x-peer-id")
        .unwrap_or("anonymous")
        .to_string();
    let client_name = header_str(&headers, "x-file-name").map(str::to_string);
    let stream_hint = header_str(&headers, "x-stream-mode")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let profile = analyze(
        declared_type,
        client_name.as_deref().unwrap_or(""),
        body.len() as u64,
        state.config.workers,
    );
    let streaming = profile.streaming || stream_hint;

    let original_size = body.len() as u64;
    let (stored_bytes, is_compressed) = if should_compress(&profile, &body) {
        match analyzer::gzip(&body) {
            Ok(compressed) if compressed.len() < body.len() => (Bytes::from(compressed), true),
            _ => (body.clone(), false),
        }
    } else {
        (body.clone(), false)
    };

    let file_id = content_id(&stored_bytes);
    let file_name = client_name.unwrap_or_else(|| format!("upload-{file_id}.bin"));

    let orchestrator = Orchestrator::with_options(
        stored_bytes.clone(),
        OrchestratorOptions {
            chunk_size: profile.chunk_size,
            adaptive: true,
            cadence: profile.cadence,
            workers: profile.worker_cap,
            surface_id: Some(file_id.clone()),
            notice_capacity: None,
        },
    )
    .map_err(|err| state.fail(err))?;
    orchestrator.begin_exposure();
    let exposed = tokio::time::timeout(state.config.request_timeout, async {
        while !orchestrator.is_complete() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    let stats = orchestrator.performance_stats();
    *state.last_reason.write() = orchestrator.current_params().reason.clone();
    orchestrator.shutdown().await;
    if exposed.is_err() {
        return Err(state.reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!(
                "exposure incomplete: {}/{} chunks",
                stats.exposed_chunks, stats.total_chunks
            ),
        ));
    }

    let mut metadata = FxHashMap::default();
    metadata.insert("streaming".to_string(), streaming.to_string());
    metadata.insert("workers".to_string(), profile.worker_cap.to_string());
    let stored = StoredFile::new(
        file_id.clone(),
        file_name,
        peer_id,
        profile.content_type.clone(),
        profile.mode.code(),
        is_compressed,
        metadata,
        stored_bytes.clone(),
    );
    state.store.insert(stored).map_err(|err| state.fail(err))?;

    let processing_time = began.elapsed();
    state.metrics.record_upload(
        profile.mode,
        streaming,
        original_size,
        stats.exposed_chunks as u64,
        processing_time,
        is_compressed.then_some(stored_bytes.len() as u64),
    );
    info!(
        file_id = %file_id,
        bytes = original_size,
        chunks = stats.exposed_chunks,
        mode = profile.mode.code(),
        streaming,
        is_compressed,
        "http.upload.completed"
    );

    Ok(Json(UploadResponse {
        status: "success",
        file_id,
        bytes_processed: stored_bytes.len() as u64,
        original_size,
        chunks_processed: stats.exposed_chunks,
        processing_time_ms: processing_time.as_secs_f64() * 1_000.0,
        throughput_mbps: stats.throughput_mibps,
        content_type: profile.content_type,
        process_mode: profile.mode.code(),
        is_compressed,
        optimal_chunk_size: profile.chunk_size,
        message: format!("exposed with {} workers", profile.worker_cap),
    }))
}

async fn download_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Response, ApiError> {
    let file = state
        .store
        .get(&id)
        .ok_or_else(|| state.reject(StatusCode::NOT_FOUND, format!("unknown file id: {id}")))?;
    let headers = [
        (header::CONTENT_TYPE, file.content_type.clone()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file.name),
        ),
    ];
    Ok((headers, file.bytes().clone()).into_response())
}

#[derive(Debug, Serialize)]
struct FileListResponse {
    files: Vec<StoredFile>,
    count: usize,
}

async fn files_handler(State(state): State<AppState>) -> Json<FileListResponse> {
    let files = state.store.list();
    let count = files.len();
    Json(FileListResponse { files, count })
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    files: Vec<StoredFile>,
    count: usize,
    query: String,
}

async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> std::result::Result<Json<SearchResponse>, ApiError> {
    let query = params
        .q
        .ok_or_else(|| state.reject(StatusCode::BAD_REQUEST, "missing query parameter: q"))?;
    let files = state.store.search(&query);
    let count = files.len();
    Ok(Json(SearchResponse {
        files,
        count,
        query,
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
    files_stored: usize,
    adaptive_reason: String,
    version: &'static str,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        uptime_seconds: state.metrics.snapshot().uptime_seconds,
        files_stored: state.store.len(),
        adaptive_reason: state.last_reason.read().clone(),
        version: SERVICE_VERSION,
    })
}

/// Error response carrying the mapped status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<RgError> for ApiError {
    fn from(err: RgError) -> Self {
        let status = match &err {
            RgError::InvalidManifest(_)
            | RgError::InvalidInput(_)
            | RgError::SizeExceedsChunk { .. }
            | RgError::TooSmall { .. } => StatusCode::BAD_REQUEST,
            RgError::OutOfRange(_) | RgError::Missing(_) => StatusCode::NOT_FOUND,
            RgError::ResourceExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            RgError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RgError::PullExhausted { .. } | RgError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorPayload {
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    message: String,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn content_id(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..8])
}
