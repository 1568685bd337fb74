#![allow(unsafe_code)]

//! Cache-line-aligned allocation primitives.
//!
//! [`AlignedBuf`] is a raw 64-byte-aligned heap region; the surface's
//! backing pool and the staging arena are both built on it. The staging
//! arena ([`StagingArena`]) is a bump allocator for transient per-chunk
//! copies: the offset resets on exhaustion, so nothing long-lived may be
//! staged here. Chunk backing lives in a separate per-surface allocation
//! that is never reset.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::slice;

use crate::error::{Result, RgError};

/// Alignment for all pool and staging allocations.
pub const CACHE_LINE: usize = 64;

/// Default staging arena capacity.
pub const DEFAULT_STAGING_CAPACITY: usize = 256 * 1024 * 1024;

/// Requests above this size bypass the bump arena and go to the heap.
pub const STAGING_BUMP_LIMIT: usize = 1024 * 1024;

/// Owned, zero-initialized, cache-line-aligned heap region.
pub(crate) struct AlignedBuf {
    ptr: NonNull<u8>,
    len: usize,
}

// The region is uniquely owned; raw-pointer access is coordinated by the
// owning type (StagingArena uses &mut self, ChunkPool uses per-slot
// atomic flags).
unsafe impl Send for AlignedBuf {}

impl AlignedBuf {
    /// Allocates `len` zeroed bytes aligned to [`CACHE_LINE`].
    pub fn alloc(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(RgError::InvalidInput("zero-length allocation".into()));
        }
        let layout = Layout::from_size_align(len, CACHE_LINE)
            .map_err(|_| RgError::ResourceExhausted(format!("allocation of {len} bytes")))?;
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)
            .ok_or_else(|| RgError::ResourceExhausted(format!("allocation of {len} bytes")))?;
        Ok(Self { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        // Same len and alignment that alloc validated.
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.len, CACHE_LINE);
            dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

/// Bump arena for transient per-chunk staging copies.
///
/// Each [`stage`](StagingArena::stage) call copies the input into the next
/// aligned region and returns the staged slice. When the arena is
/// exhausted the offset wraps back to zero; staged slices are therefore
/// only valid until the next `stage` call, which the `&mut self` receiver
/// enforces. Requests above [`STAGING_BUMP_LIMIT`] fall back to a reusable
/// heap buffer.
pub struct StagingArena {
    buf: AlignedBuf,
    offset: usize,
    overflow: Vec<u8>,
}

impl StagingArena {
    /// Creates an arena with the default capacity.
    pub fn new() -> Result<Self> {
        Self::with_capacity(DEFAULT_STAGING_CAPACITY)
    }

    /// Creates an arena with an explicit capacity (at least one cache line).
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity < CACHE_LINE {
            return Err(RgError::InvalidInput(format!(
                "staging capacity {capacity} below {CACHE_LINE}"
            )));
        }
        Ok(Self {
            buf: AlignedBuf::alloc(capacity)?,
            offset: 0,
            overflow: Vec::new(),
        })
    }

    /// Copies `bytes` into the arena and returns the staged slice.
    pub fn stage(&mut self, bytes: &[u8]) -> Result<&[u8]> {
        if bytes.len() > STAGING_BUMP_LIMIT || bytes.len() > self.buf.len() {
            self.overflow.clear();
            self.overflow
                .try_reserve(bytes.len())
                .map_err(|_| RgError::ResourceExhausted(format!("staging {} bytes", bytes.len())))?;
            self.overflow.extend_from_slice(bytes);
            return Ok(&self.overflow);
        }
        let mut start = align_up(self.offset);
        if start + bytes.len() > self.buf.len() {
            // Exhausted: wrap. Staged data is transient, nothing outlives
            // the next stage call.
            start = 0;
        }
        let end = start + bytes.len();
        self.buf.as_mut_slice()[start..end].copy_from_slice(bytes);
        self.offset = end;
        Ok(&self.buf.as_slice()[start..end])
    }

    /// Rewinds the bump offset to zero.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Total bump capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes consumed since the last reset or wrap.
    pub fn used(&self) -> usize {
        self.offset
    }
}

fn align_up(offset: usize) -> usize {
    (offset + CACHE_LINE - 1) & !(CACHE_LINE - 1)
}
