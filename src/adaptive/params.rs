//! Parameter recommendation rules.

use std::time::Duration;

use serde::Serialize;
use smallvec::SmallVec;

use crate::adaptive::monitor::TrafficMetrics;
use crate::surface::{MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

/// Baseline chunk size.
pub const BASE_CHUNK_SIZE: u32 = 64 * 1024;
/// Baseline inter-chunk cadence.
pub const BASE_CADENCE: Duration = Duration::from_millis(100);
/// Baseline exposure worker count.
pub const BASE_WORKERS: usize = 4;

const HIGH_BANDWIDTH: f64 = 10.0 * 1024.0 * 1024.0;
const LOW_BANDWIDTH: f64 = 100.0 * 1024.0;
const OPTIMAL_BANDWIDTH: f64 = 5.0 * 1024.0 * 1024.0;

/// Tuning knobs the orchestrator applies between chunks.
///
/// Mutated only by the orchestrator's re-tune task under a single writer
/// lock; everyone else reads an `Arc` snapshot. A chunk-size change only
/// affects surfaces built after it; the current surface's layout is
/// frozen at construction.
#[derive(Debug, Clone, Serialize)]
pub struct AdaptiveParams {
    /// Chunk size for the next surface.
    pub chunk_size: u32,
    /// Target duration between successive chunk emissions per worker.
    pub cadence: Duration,
    /// Exposure worker count.
    pub workers: usize,
    /// Suggested transfer buffer size, `chunk_size * workers * 2`.
    pub buffer_size: usize,
    /// Composed rule tokens explaining the recommendation.
    pub reason: String,
}

impl Default for AdaptiveParams {
    fn default() -> Self {
        Self {
            chunk_size: BASE_CHUNK_SIZE,
            cadence: BASE_CADENCE,
            workers: BASE_WORKERS,
            buffer_size: BASE_CHUNK_SIZE as usize * BASE_WORKERS * 2,
            reason: "Stable".into(),
        }
    }
}

/// Applies the recommendation rules, in order, to a metrics snapshot.
pub fn recommend(metrics: &TrafficMetrics) -> AdaptiveParams {
    let mut chunk_size = BASE_CHUNK_SIZE as f64;
    let mut cadence = BASE_CADENCE;
    let mut workers = BASE_WORKERS;
    let mut tokens: SmallVec<[&str; 4]> = SmallVec::new();

    if metrics.bandwidth_bps > HIGH_BANDWIDTH {
        chunk_size = (4.0 * BASE_CHUNK_SIZE as f64).min(1024.0 * 1024.0);
        tokens.push("High-BW");
    } else if metrics.bandwidth_bps < LOW_BANDWIDTH {
        chunk_size = BASE_CHUNK_SIZE as f64 / 4.0;
        tokens.push("Low-BW");
    }

    if metrics.packet_loss > 0.05 {
        chunk_size *= 1.0 - metrics.packet_loss;
        tokens.push("High-Loss");
    }

    if metrics.latency > Duration::from_millis(200) {
        cadence = BASE_CADENCE * 2;
        tokens.push("High-Latency");
    } else if metrics.latency < Duration::from_millis(20) {
        cadence = BASE_CADENCE / 2;
        tokens.push("Low-Latency");
    }

    if metrics.congestion > 0.7 {
        cadence = cadence.mul_f64(1.0 + metrics.congestion);
        chunk_size *= 0.7;
        tokens.push("Congested");
    }

    if metrics.bandwidth_bps > OPTIMAL_BANDWIDTH && metrics.packet_loss < 0.01 {
        workers = 8;
        tokens.push("Optimal");
    }
    if metrics.packet_loss > 0.10 || metrics.congestion > 0.8 {
        workers = 2;
        tokens.push("Degraded");
    }

    let chunk_size = (chunk_size as u32).clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
    let reason = if tokens.is_empty() {
        "Stable".to_string()
    } else {
        tokens.join(", ")
    };
    AdaptiveParams {
        chunk_size,
        cadence,
        workers,
        buffer_size: chunk_size as usize * workers * 2,
        reason,
    }
}
