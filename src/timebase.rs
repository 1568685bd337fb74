//! Process-wide monotonic nanosecond clock.
//!
//! All exposure timestamps and traffic samples share one anchor taken at
//! first use, so timestamps are strictly non-decreasing within a process
//! and directly comparable across components.

use std::sync::OnceLock;
use std::time::Instant;

fn anchor() -> Instant {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    *ANCHOR.get_or_init(Instant::now)
}

/// Nanoseconds elapsed since the process anchor.
pub fn now_ns() -> u64 {
    anchor().elapsed().as_nanos() as u64
}

/// Milliseconds elapsed since the process anchor.
pub fn now_ms() -> u64 {
    now_ns() / 1_000_000
}
