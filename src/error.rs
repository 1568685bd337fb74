use std::io;
use std::time::Duration;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RgError>;

/// Error taxonomy for the Red Giant core.
///
/// Boundary errors (`InvalidManifest`, `InvalidInput`, `OutOfRange`,
/// `SizeExceedsChunk`, `TooSmall`) are returned to the caller and never
/// retried internally. `ResourceExhausted` is fatal for the resource that
/// raised it. `PullExhausted` and `Timeout` surface partial results; the
/// caller decides whether to keep them.
#[derive(Debug, Error)]
pub enum RgError {
    /// Manifest validation failed during surface creation.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    /// Malformed request input at an API boundary.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Chunk id outside `[0, total_chunks)`.
    #[error("chunk {0} out of range")]
    OutOfRange(u32),
    /// Payload does not fit the chunk slot.
    #[error("chunk {chunk_id}: {len} bytes exceeds chunk size {chunk_size}")]
    SizeExceedsChunk {
        /// Offending chunk id.
        chunk_id: u32,
        /// Payload length in bytes.
        len: usize,
        /// Fixed chunk slot size for the surface.
        chunk_size: u32,
    },
    /// Chunk has not been exposed yet.
    #[error("chunk {0} not exposed")]
    Missing(u32),
    /// Caller-supplied destination buffer is smaller than the chunk.
    #[error("destination holds {capacity} bytes, chunk {chunk_id} needs {len}")]
    TooSmall {
        /// Chunk id being pulled.
        chunk_id: u32,
        /// Exposed chunk length.
        len: usize,
        /// Destination capacity.
        capacity: usize,
    },
    /// An allocator or bounded queue refused the request.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    /// A transient pull kept failing past the retry budget.
    #[error("pull of chunk {chunk_id} gave up after {attempts} attempts")]
    PullExhausted {
        /// Chunk id that could not be pulled.
        chunk_id: u32,
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// An overall deadline elapsed; partial results may be available.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// I/O error from the storage mirror or the network listener.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RgError {
    /// True for errors a receiver may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, RgError::Missing(_))
    }
}
