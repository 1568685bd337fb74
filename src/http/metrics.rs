//! Request counters for the HTTP service.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::http::analyzer::ProcessMode;

/// Atomic counters updated by every request.
pub struct ServiceMetrics {
    started_at: Instant,
    requests: AtomicU64,
    bytes_total: AtomicU64,
    chunks_total: AtomicU64,
    latency_total_us: AtomicU64,
    errors: AtomicU64,
    json_requests: AtomicU64,
    binary_requests: AtomicU64,
    stream_requests: AtomicU64,
    compressed_bytes: AtomicU64,
    optimization_hits: AtomicU64,
}

/// Serialized counter snapshot for `GET /metrics`.
///
/// Throughput-style figures are derived by the caller; latency is the
/// mean over all uploads. Byte-rate units across the service are MiB/s.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Seconds since service start.
    pub uptime_seconds: u64,
    /// Uploads accepted plus failures.
    pub total_requests: u64,
    /// Bytes ingested across uploads.
    pub total_bytes: u64,
    /// Chunks exposed across uploads.
    pub total_chunks: u64,
    /// Mean upload latency in milliseconds.
    pub average_latency_ms: f64,
    /// Requests that ended in an error response.
    pub errors: u64,
    /// Uploads classified as JSON.
    pub json_requests: u64,
    /// Uploads classified as anything but JSON or streaming.
    pub binary_requests: u64,
    /// Uploads delivered with streaming preference.
    pub stream_requests: u64,
    /// Bytes stored in compressed form.
    pub compressed_bytes: u64,
    /// Uploads where compression was applied.
    pub optimization_hits: u64,
}

impl ServiceMetrics {
    /// Zeroed counters anchored at now.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            requests: AtomicU64::new(0),
            bytes_total: AtomicU64::new(0),
            chunks_total: AtomicU64::new(0),
            latency_total_us: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            json_requests: AtomicU64::new(0),
            binary_requests: AtomicU64::new(0),
            stream_requests: AtomicU64::new(0),
            compressed_bytes: AtomicU64::new(0),
            optimization_hits: AtomicU64::new(0),
        }
    }

    /// Records one successful upload.
    pub fn record_upload(
        &self,
        mode: ProcessMode,
        streaming: bool,
        bytes: u64,
        chunks: u64,
        latency: Duration,
        compressed_bytes: Option<u64>,
    ) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_total.fetch_add(bytes, Ordering::Relaxed);
        self.chunks_total.fetch_add(chunks, Ordering::Relaxed);
        self.latency_total_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        if streaming {
            self.stream_requests.fetch_add(1, Ordering::Relaxed);
        } else if mode == ProcessMode::Json {
            self.json_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.binary_requests.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(stored) = compressed_bytes {
            self.compressed_bytes.fetch_add(stored, Ordering::Relaxed);
            self.optimization_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a failed request.
    pub fn record_error(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let uploads = requests.saturating_sub(errors);
        let latency_total_us = self.latency_total_us.load(Ordering::Relaxed);
        let average_latency_ms = if uploads > 0 {
            latency_total_us as f64 / uploads as f64 / 1_000.0
        } else {
            0.0
        };
        MetricsSnapshot {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            total_requests: requests,
            total_bytes: self.bytes_total.load(Ordering::Relaxed),
            total_chunks: self.chunks_total.load(Ordering::Relaxed),
            average_latency_ms,
            errors,
            json_requests: self.json_requests.load(Ordering::Relaxed),
            binary_requests: self.binary_requests.load(Ordering::Relaxed),
            stream_requests: self.stream_requests.load(Ordering::Relaxed),
            compressed_bytes: self.compressed_bytes.load(Ordering::Relaxed),
            optimization_hits: self.optimization_hits.load(Ordering::Relaxed),
        }
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}
