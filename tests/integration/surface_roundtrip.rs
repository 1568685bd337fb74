#![allow(missing_docs)]

use proptest::prelude::*;
use rand::prelude::*;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use red_giant::surface::{Manifest, Surface, MIN_CHUNK_SIZE};
use red_giant::RgError;

const SEED: u64 = 0x5eed_f1a6;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

#[test]
fn small_text_fits_one_chunk() -> red_giant::Result<()> {
    let payload = b"Red Giant Protocol".repeat(500);
    let manifest = Manifest::new("small-text", payload.len() as u64, 64 * 1024)?;
    assert_eq!(manifest.total_chunks, 1);
    let (exposer, surface) = Surface::create(manifest)?;
    exposer.expose(0, &payload)?;
    exposer.raise_completion();
    assert!(surface.is_complete());

    let mut out = vec![0u8; payload.len()];
    let n = surface.pull(0, &mut out)?;
    assert_eq!(n, payload.len());
    assert_eq!(out, payload);

    let stats = surface.performance_stats();
    assert!(stats.throughput_mibps > 0.0);
    Ok(())
}

#[test]
fn a_million_bytes_in_tiny_chunks() -> red_giant::Result<()> {
    let payload = pattern(1_000_000);
    let manifest = Manifest::new("many-chunks", payload.len() as u64, 1024)?;
    assert_eq!(manifest.total_chunks, 977);
    assert_eq!(manifest.chunk_len(976), 576);
    let (exposer, surface) = Surface::create(manifest)?;

    // Expose in a scrambled order; visibility is per-chunk.
    let mut order: Vec<u32> = (0..977).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    order.shuffle(&mut rng);
    let chunks: Vec<(u32, &[u8])> = order
        .iter()
        .map(|&chunk_id| {
            let start = chunk_id as usize * 1024;
            let end = (start + 1024).min(payload.len());
            (chunk_id, &payload[start..end])
        })
        .collect();
    assert_eq!(exposer.expose_batch(chunks), 977);
    exposer.raise_completion();
    assert!(surface.is_complete());

    let mut assembled = Vec::with_capacity(payload.len());
    for chunk_id in 0..977 {
        let view = surface.peek(chunk_id)?;
        assembled.extend_from_slice(view.bytes());
    }
    assert_eq!(assembled.len(), 1_000_000);
    assert_eq!(assembled, payload);
    assert_eq!(surface.peek(976)?.len(), 576);
    Ok(())
}

#[test]
fn exposed_views_match_the_source_slice() -> red_giant::Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let payload: Vec<u8> = (0..50_000).map(|_| rng.gen()).collect();
    let chunk_size = 4096u32;
    let manifest = Manifest::new("slices", payload.len() as u64, chunk_size)?;
    let (exposer, surface) = Surface::create(manifest.clone())?;
    for chunk_id in 0..manifest.total_chunks {
        let start = chunk_id as usize * chunk_size as usize;
        let end = (start + chunk_size as usize).min(payload.len());
        exposer.expose(chunk_id, &payload[start..end])?;
        let view = surface.peek(chunk_id)?;
        assert!(view.len() > 0);
        assert!(view.len() <= chunk_size as usize);
        assert_eq!(view.bytes(), &payload[start..end]);
    }
    Ok(())
}

#[test]
fn double_expose_is_observationally_single() -> red_giant::Result<()> {
    let payload = pattern(4096);
    let manifest = Manifest::new("idempotent", payload.len() as u64, 1024)?;
    let (exposer, surface) = Surface::create(manifest)?;
    for chunk_id in 0..4 {
        let slice = &payload[chunk_id as usize * 1024..(chunk_id as usize + 1) * 1024];
        exposer.expose(chunk_id, slice)?;
        exposer.expose(chunk_id, slice)?;
    }
    assert_eq!(surface.exposed_count(), 4);
    let stats = surface.performance_stats();
    assert_eq!(stats.bytes_exposed, 4096);
    Ok(())
}

#[test]
fn unexposed_chunks_read_as_missing() -> red_giant::Result<()> {
    let manifest = Manifest::new("missing", 10_240, 1024)?;
    let (exposer, surface) = Surface::create(manifest)?;
    exposer.expose(3, &[7u8; 1024])?;
    assert!(matches!(surface.peek(0), Err(RgError::Missing(0))));
    assert!(surface.peek(3).is_ok());
    let mut buf = [0u8; 1024];
    assert!(matches!(surface.pull(9, &mut buf), Err(RgError::Missing(9))));
    assert!(matches!(surface.pull(10, &mut buf), Err(RgError::OutOfRange(10))));
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn roundtrip_is_lossless_for_any_geometry(
        total_size in 1usize..200_000,
        chunk_kib in 1u32..64,
    ) {
        let payload = pattern(total_size);
        let chunk_size = chunk_kib * MIN_CHUNK_SIZE;
        let manifest = Manifest::new("prop", total_size as u64, chunk_size).unwrap();
        let expected_chunks = (total_size as u64).div_ceil(chunk_size as u64) as u32;
        prop_assert_eq!(manifest.total_chunks, expected_chunks);

        let (exposer, surface) = Surface::create(manifest).unwrap();
        for chunk_id in 0..expected_chunks {
            let start = chunk_id as usize * chunk_size as usize;
            let end = (start + chunk_size as usize).min(total_size);
            exposer.expose(chunk_id, &payload[start..end]).unwrap();
        }
        exposer.raise_completion();
        prop_assert!(surface.is_complete());

        let mut assembled = Vec::with_capacity(total_size);
        for chunk_id in 0..expected_chunks {
            assembled.extend_from_slice(surface.peek(chunk_id).unwrap().bytes());
        }
        prop_assert_eq!(assembled, payload);
    }
}
