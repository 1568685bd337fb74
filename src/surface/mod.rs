//! The exposure surface: a fixed-capacity, append-only-per-slot chunk
//! store with per-chunk atomic visibility.
//!
//! A surface is created once per transfer from a [`Manifest`]. The
//! [`Exposer`] is the single write handle (not clonable); [`Surface`] is
//! the read handle, freely clonable and shareable across receiver
//! workers. Every chunk goes through the one-way state machine
//! `Empty -> Writing -> Exposed`; readers that observe `Exposed` with
//! acquire ordering are guaranteed to see the chunk's bytes and length
//! fully written.

mod pool;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, trace};

use crate::error::{Result, RgError};
use crate::timebase;
use pool::ChunkPool;

/// Smallest accepted chunk size.
pub const MIN_CHUNK_SIZE: u32 = 1024;
/// Largest accepted chunk size.
pub const MAX_CHUNK_SIZE: u32 = 8 * 1024 * 1024;
/// Upper bound on chunks per surface.
pub const MAX_CONCURRENT_CHUNKS: u64 = 1 << 20;
/// Initial exposure cadence recorded in new manifests.
pub const DEFAULT_CADENCE: Duration = Duration::from_millis(100);

const STATE_EMPTY: u8 = 0;
const STATE_WRITING: u8 = 1;
const STATE_EXPOSED: u8 = 2;

/// Immutable description of a surface.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Opaque surface identifier.
    pub surface_id: String,
    /// Total payload size in bytes.
    pub total_size: u64,
    /// Fixed slot size; the last chunk may be shorter.
    pub chunk_size: u32,
    /// Derived chunk count, `ceil(total_size / chunk_size)`.
    pub total_chunks: u32,
    /// Manifest format version.
    pub version: u32,
    /// Free-form encoding tag.
    pub encoding: String,
    /// Initial exposure cadence.
    pub cadence: Duration,
}

impl Manifest {
    /// Builds and validates a manifest for a payload of `total_size`
    /// bytes split into `chunk_size`-byte chunks.
    pub fn new(surface_id: impl Into<String>, total_size: u64, chunk_size: u32) -> Result<Self> {
        if total_size == 0 {
            return Err(RgError::InvalidManifest("total_size must be > 0".into()));
        }
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(RgError::InvalidManifest(format!(
                "chunk_size {chunk_size} outside [{MIN_CHUNK_SIZE}, {MAX_CHUNK_SIZE}]"
            )));
        }
        let total_chunks = total_size.div_ceil(chunk_size as u64);
        if total_chunks > MAX_CONCURRENT_CHUNKS {
            return Err(RgError::InvalidManifest(format!(
                "{total_chunks} chunks exceeds limit {MAX_CONCURRENT_CHUNKS}"
            )));
        }
        Ok(Self {
            surface_id: surface_id.into(),
            total_size,
            chunk_size,
            total_chunks: total_chunks as u32,
            version: 1,
            encoding: "binary".into(),
            cadence: DEFAULT_CADENCE,
        })
    }

    /// Exact byte length of chunk `chunk_id`.
    pub fn chunk_len(&self, chunk_id: u32) -> u64 {
        let offset = chunk_id as u64 * self.chunk_size as u64;
        (self.total_size - offset).min(self.chunk_size as u64)
    }
}

struct ChunkSlot {
    offset: u64,
    length: AtomicU32,
    state: AtomicU8,
    exposed_at_ns: AtomicU64,
    pulls: AtomicU64,
}

struct SurfaceCore {
    manifest: Manifest,
    slots: Box<[ChunkSlot]>,
    pool: ChunkPool,
    exposed_count: AtomicU32,
    bytes_exposed: AtomicU64,
    complete: AtomicBool,
    created_at: Instant,
    created_at_ns: u64,
}

/// Read handle to a surface. Clonable; all operations are lock-free.
#[derive(Clone)]
pub struct Surface {
    core: Arc<SurfaceCore>,
}

/// The single write handle to a surface.
///
/// Not clonable: one exposer owns one surface. Shared references may be
/// handed to exposure workers; per-chunk claims keep concurrent calls on
/// disjoint chunks sound.
pub struct Exposer {
    core: Arc<SurfaceCore>,
}

/// Borrowed view of an exposed chunk.
#[derive(Debug, Clone, Copy)]
pub struct ChunkView<'a> {
    chunk_id: u32,
    bytes: &'a [u8],
}

impl<'a> ChunkView<'a> {
    /// Chunk index this view covers.
    pub fn chunk_id(&self) -> u32 {
        self.chunk_id
    }

    /// The exposed bytes.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Exposed length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when the view is empty (never the case for exposed chunks).
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Point-in-time performance snapshot of a surface.
#[derive(Debug, Clone, Serialize)]
pub struct SurfaceStats {
    /// Milliseconds since surface creation.
    pub elapsed_ms: f64,
    /// Exposure throughput in MiB/s (1024^2 bytes).
    pub throughput_mibps: f64,
    /// Chunks exposed so far.
    pub exposed_chunks: u32,
    /// Total chunks in the manifest.
    pub total_chunks: u32,
    /// Bytes exposed so far.
    pub bytes_exposed: u64,
}

impl Surface {
    /// Creates a surface, returning the write handle and a read handle.
    pub fn create(manifest: Manifest) -> Result<(Exposer, Surface)> {
        let pool = ChunkPool::alloc(manifest.total_chunks as usize, manifest.chunk_size as usize)?;
        let slots = (0..manifest.total_chunks)
            .map(|chunk_id| ChunkSlot {
                offset: chunk_id as u64 * manifest.chunk_size as u64,
                length: AtomicU32::new(0),
                state: AtomicU8::new(STATE_EMPTY),
                exposed_at_ns: AtomicU64::new(0),
                pulls: AtomicU64::new(0),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        info!(
            surface_id = %manifest.surface_id,
            total_size = manifest.total_size,
            chunk_size = manifest.chunk_size,
            total_chunks = manifest.total_chunks,
            "surface.created"
        );
        let core = Arc::new(SurfaceCore {
            manifest,
            slots,
            pool,
            exposed_count: AtomicU32::new(0),
            bytes_exposed: AtomicU64::new(0),
            complete: AtomicBool::new(false),
            created_at: Instant::now(),
            created_at_ns: timebase::now_ns(),
        });
        Ok((Exposer { core: core.clone() }, Surface { core }))
    }

    /// The surface's manifest.
    pub fn manifest(&self) -> &Manifest {
        &self.core.manifest
    }

    /// Lock-free visibility check plus view of an exposed chunk.
    pub fn peek(&self, chunk_id: u32) -> Result<ChunkView<'_>> {
        let slot = self.core.slot(chunk_id)?;
        if slot.state.load(Ordering::Acquire) != STATE_EXPOSED {
            return Err(RgError::Missing(chunk_id));
        }
        let len = slot.length.load(Ordering::Relaxed) as usize;
        // Acquire above pairs with the release publish in expose.
        let bytes = self.core.slot_bytes(slot, len);
        Ok(ChunkView { chunk_id, bytes })
    }

    /// Copies an exposed chunk into `dest`, returning the copied length.
    pub fn pull(&self, chunk_id: u32, dest: &mut [u8]) -> Result<usize> {
        let view = self.peek(chunk_id)?;
        if dest.len() < view.len() {
            return Err(RgError::TooSmall {
                chunk_id,
                len: view.len(),
                capacity: dest.len(),
            });
        }
        dest[..view.len()].copy_from_slice(view.bytes());
        self.core.slot(chunk_id)?.pulls.fetch_add(1, Ordering::Relaxed);
        Ok(view.len())
    }

    /// Vectorised pull; returns how many chunks were copied.
    pub fn pull_batch<'a, I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = (u32, &'a mut [u8])>,
    {
        let mut copied = 0;
        for (chunk_id, dest) in items {
            match self.pull(chunk_id, dest) {
                Ok(_) => copied += 1,
                Err(err) => {
                    debug!(chunk_id, %err, "surface.pull_batch.skip");
                }
            }
        }
        copied
    }

    /// True once the red flag is raised and every chunk is exposed.
    pub fn is_complete(&self) -> bool {
        self.core.is_complete()
    }

    /// Chunks exposed so far.
    pub fn exposed_count(&self) -> u32 {
        self.core.exposed_count.load(Ordering::Acquire)
    }

    /// Times a chunk has been pulled.
    pub fn pull_count(&self, chunk_id: u32) -> Result<u64> {
        Ok(self.core.slot(chunk_id)?.pulls.load(Ordering::Relaxed))
    }

    /// Exposure timestamp of a chunk in process nanoseconds.
    pub fn exposed_at_ns(&self, chunk_id: u32) -> Result<Option<u64>> {
        let slot = self.core.slot(chunk_id)?;
        if slot.state.load(Ordering::Acquire) != STATE_EXPOSED {
            return Ok(None);
        }
        Ok(Some(slot.exposed_at_ns.load(Ordering::Relaxed)))
    }

    /// Elapsed time and exposure throughput since creation.
    pub fn performance_stats(&self) -> SurfaceStats {
        let elapsed = self.core.created_at.elapsed();
        let bytes = self.core.bytes_exposed.load(Ordering::Relaxed);
        let secs = elapsed.as_secs_f64();
        let throughput_mibps = if secs > 0.0 {
            bytes as f64 / (1024.0 * 1024.0) / secs
        } else {
            0.0
        };
        SurfaceStats {
            elapsed_ms: secs * 1_000.0,
            throughput_mibps,
            exposed_chunks: self.core.exposed_count.load(Ordering::Acquire),
            total_chunks: self.core.manifest.total_chunks,
            bytes_exposed: bytes,
        }
    }

    /// Process-nanosecond timestamp of surface creation.
    pub fn created_at_ns(&self) -> u64 {
        self.core.created_at_ns
    }
}

impl Exposer {
    /// The surface's manifest.
    pub fn manifest(&self) -> &Manifest {
        &self.core.manifest
    }

    /// A fresh read handle for this surface.
    pub fn surface(&self) -> Surface {
        Surface {
            core: self.core.clone(),
        }
    }

    /// Publishes `bytes` as chunk `chunk_id`.
    ///
    /// Exposing an already-exposed chunk is a no-op returning `Ok`.
    pub fn expose(&self, chunk_id: u32, bytes: &[u8]) -> Result<()> {
        let slot = self.core.slot(chunk_id)?;
        if bytes.is_empty() {
            return Err(RgError::InvalidInput(format!("chunk {chunk_id}: empty payload")));
        }
        if bytes.len() > self.core.manifest.chunk_size as usize {
            return Err(RgError::SizeExceedsChunk {
                chunk_id,
                len: bytes.len(),
                chunk_size: self.core.manifest.chunk_size,
            });
        }
        if slot
            .state
            .compare_exchange(
                STATE_EMPTY,
                STATE_WRITING,
                Ordering::Acquire,
                Ordering::Acquire,
            )
            .is_err()
        {
            // Already exposed, or another caller is mid-copy. Idempotent
            // either way; the bytes are immutable once claimed.
            trace!(chunk_id, "surface.expose.duplicate");
            return Ok(());
        }
        // Claim held: this thread is the only writer for the slot and no
        // reader can observe it until the release store below.
        self.core.write_slot_claimed(slot, bytes);
        slot.length.store(bytes.len() as u32, Ordering::Relaxed);
        slot.exposed_at_ns.store(timebase::now_ns(), Ordering::Relaxed);
        slot.state.store(STATE_EXPOSED, Ordering::Release);
        self.core.exposed_count.fetch_add(1, Ordering::Release);
        self.core
            .bytes_exposed
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        trace!(chunk_id, len = bytes.len(), "surface.expose.ok");
        Ok(())
    }

    /// Vectorised expose; returns how many chunks were published.
    pub fn expose_batch<'a, I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = (u32, &'a [u8])>,
    {
        items
            .into_iter()
            .filter(|(chunk_id, bytes)| match self.expose(*chunk_id, bytes) {
                Ok(()) => true,
                Err(err) => {
                    debug!(chunk_id, %err, "surface.expose_batch.skip");
                    false
                }
            })
            .count()
    }

    /// Raises the red flag: no further chunks will be exposed. Idempotent.
    pub fn raise_completion(&self) {
        if !self.core.complete.swap(true, Ordering::Release) {
            info!(
                surface_id = %self.core.manifest.surface_id,
                exposed = self.core.exposed_count.load(Ordering::Acquire),
                total = self.core.manifest.total_chunks,
                "surface.completion_raised"
            );
        }
    }

    /// True once the red flag is raised and every chunk is exposed.
    pub fn is_complete(&self) -> bool {
        self.core.is_complete()
    }
}

impl SurfaceCore {
    fn slot(&self, chunk_id: u32) -> Result<&ChunkSlot> {
        self.slots
            .get(chunk_id as usize)
            .ok_or(RgError::OutOfRange(chunk_id))
    }

    fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
            && self.exposed_count.load(Ordering::Acquire) == self.manifest.total_chunks
    }

    #[allow(unsafe_code)]
    fn slot_bytes(&self, slot: &ChunkSlot, len: usize) -> &[u8] {
        // Caller observed STATE_EXPOSED with acquire ordering.
        unsafe { self.pool.bytes_at(slot.offset as usize, len) }
    }

    #[allow(unsafe_code)]
    fn write_slot_claimed(&self, slot: &ChunkSlot, bytes: &[u8]) {
        // Caller holds the STATE_WRITING claim for this chunk.
        unsafe { self.pool.write_at(slot.offset as usize, bytes) }
    }
}
