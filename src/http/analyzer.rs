//! Content analysis: classify a payload and pick its transfer strategy.

use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

use crate::error::{Result, RgError};

/// Prefix length fed to the compression probe.
pub const COMPRESSION_SAMPLE: usize = 1024;
/// Minimum predicted reduction before compressing a payload.
pub const COMPRESSION_MIN_RATIO: f64 = 0.20;
/// Payloads below this size are never compressed.
pub const COMPRESSION_MIN_SIZE: usize = 64 * 1024;
/// Chunk size for unclassified binary payloads.
pub const BINARY_CHUNK_SIZE: u32 = 1024 * 1024;

/// Payload classification driving chunk size, compression, streaming and
/// worker caps. The wire encoding is the table order of the modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessMode {
    /// `application/json`.
    Json = 0,
    /// `text/*`.
    Text = 1,
    /// `image/*`.
    Image = 2,
    /// `video/*`; never recompressed.
    Video = 3,
    /// `audio/*`.
    Audio = 4,
    /// Already-compressed archives (`application/gzip`, `application/zip`).
    Compressed = 5,
    /// Everything else.
    Binary = 6,
}

impl ProcessMode {
    /// Integer wire code.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Per-payload transfer strategy.
#[derive(Debug, Clone)]
pub struct ContentProfile {
    /// Detected mode.
    pub mode: ProcessMode,
    /// Chunk size for the exposure surface.
    pub chunk_size: u32,
    /// Whether streaming delivery is preferred.
    pub streaming: bool,
    /// True when recompression would be wasted work.
    pub skip_compression: bool,
    /// Exposure worker cap for this payload.
    pub worker_cap: usize,
    /// Normalized content type.
    pub content_type: String,
    /// Suggested exposure cadence.
    pub cadence: Duration,
}

/// Classifies a payload from its declared type, falling back to a guess
/// from the file name.
pub fn analyze(
    declared_type: Option<&str>,
    file_name: &str,
    size: u64,
    max_workers: usize,
) -> ContentProfile {
    let content_type = declared_type
        .map(str::to_string)
        .filter(|t| !t.trim().is_empty())
        .or_else(|| {
            mime_guess::from_path(file_name)
                .first_raw()
                .map(str::to_string)
        })
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let (mode, chunk_size, streaming, skip_compression) = match essence.as_str() {
        "application/json" => (ProcessMode::Json, 64 * 1024, false, false),
        "application/gzip" | "application/zip" => (ProcessMode::Compressed, 1024 * 1024, false, true),
        t if t.starts_with("text/") => (ProcessMode::Text, 128 * 1024, false, false),
        t if t.starts_with("image/") => {
            (ProcessMode::Image, 512 * 1024, size > 1024 * 1024, false)
        }
        t if t.starts_with("video/") => (ProcessMode::Video, 1024 * 1024, true, true),
        t if t.starts_with("audio/") => (ProcessMode::Audio, 256 * 1024, size > 512 * 1024, false),
        _ => (ProcessMode::Binary, BINARY_CHUNK_SIZE, false, false),
    };

    // Streaming transfers hold back workers; tiny payloads don't benefit
    // from fan-out at all.
    let worker_cap = if size < 64 * 1024 {
        max_workers.min(2)
    } else if streaming {
        max_workers.min(4)
    } else {
        max_workers
    }
    .max(1);

    ContentProfile {
        mode,
        chunk_size,
        streaming,
        skip_compression,
        worker_cap,
        content_type: essence,
        cadence: Duration::from_millis(100),
    }
}

/// Gzip-compresses `bytes` at the default level.
pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .and_then(|_| encoder.finish())
        .map_err(RgError::Io)
}

/// True when gzip on a 1 KiB prefix predicts at least a 20% reduction.
pub fn predicts_compression(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(COMPRESSION_SAMPLE)];
    if sample.is_empty() {
        return false;
    }
    match gzip(sample) {
        Ok(compressed) => {
            compressed.len() as f64 <= sample.len() as f64 * (1.0 - COMPRESSION_MIN_RATIO)
        }
        Err(_) => false,
    }
}

/// Full compression decision for a payload with the given profile.
pub fn should_compress(profile: &ContentProfile, bytes: &[u8]) -> bool {
    !profile.skip_compression && bytes.len() >= COMPRESSION_MIN_SIZE && predicts_compression(bytes)
}
