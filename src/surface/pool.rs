#![allow(unsafe_code)]

//! Contiguous backing pool for a surface's chunk slots.
//!
//! One cache-line-aligned allocation holds every slot at
//! `offset = chunk_id * chunk_size`. Slots are never reused within a
//! surface's lifetime.

use crate::arena::AlignedBuf;
use crate::error::{Result, RgError};

/// Fixed-layout slot storage shared between one exposer and any number of
/// readers.
///
/// Access discipline: a slot is written at most once, while its chunk
/// state holds the writing claim and before any reader can observe it;
/// readers form shared slices only after an acquire load of the exposed
/// state. The surface enforces both, which is what makes the `Sync` impl
/// below hold.
pub(crate) struct ChunkPool {
    buf: AlignedBuf,
    chunk_size: usize,
}

unsafe impl Sync for ChunkPool {}

impl ChunkPool {
    /// Allocates `total_chunks * chunk_size` zeroed bytes in one aligned
    /// region.
    pub fn alloc(total_chunks: usize, chunk_size: usize) -> Result<Self> {
        let len = total_chunks.checked_mul(chunk_size).ok_or_else(|| {
            RgError::ResourceExhausted(format!("pool of {total_chunks} x {chunk_size} bytes"))
        })?;
        Ok(Self {
            buf: AlignedBuf::alloc(len)?,
            chunk_size,
        })
    }

    /// Copies `bytes` into the slot starting at byte `offset`.
    ///
    /// # Safety
    ///
    /// The caller must hold the slot's writing claim: no other writer for
    /// this slot, and no reader until the exposed state is published.
    pub unsafe fn write_at(&self, offset: usize, bytes: &[u8]) {
        debug_assert!(bytes.len() <= self.chunk_size);
        debug_assert!(offset % self.chunk_size == 0);
        debug_assert!(offset + self.chunk_size <= self.buf.len());
        let dst = self.buf.as_mut_ptr().add(offset);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
    }

    /// Returns `len` bytes of the slot starting at byte `offset`.
    ///
    /// # Safety
    ///
    /// The caller must have observed the slot's exposed state with acquire
    /// ordering, with `len` the published chunk length.
    pub unsafe fn bytes_at(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(len <= self.chunk_size);
        debug_assert!(offset + self.chunk_size <= self.buf.len());
        std::slice::from_raw_parts(self.buf.as_ptr().add(offset), len)
    }
}
