//! TCP-style AIMD congestion control for the exposure rate.

use std::time::Duration;

/// Smallest window in chunks.
pub const MIN_WINDOW: f64 = 4.0;
/// Largest window in chunks.
pub const MAX_WINDOW: f64 = 256.0;

const SRTT_ALPHA: f64 = 1.0 / 8.0;

/// AIMD window plus smoothed RTT, driving the target exposure rate.
///
/// Additive increase on success (+2 while below half the max window, +1
/// after), multiplicative decrease to 0.75x on failure, Jacobson/Karels
/// RTT smoothing with alpha = 1/8.
#[derive(Debug, Clone)]
pub struct CongestionController {
    window: f64,
    min_window: f64,
    max_window: f64,
    srtt: Duration,
    loss_estimate: f64,
    utilization_threshold: f64,
}

impl Default for CongestionController {
    fn default() -> Self {
        Self::new()
    }
}

impl CongestionController {
    /// Controller with the default window bounds; the initial window is a
    /// quarter of the maximum.
    pub fn new() -> Self {
        Self::with_bounds(MIN_WINDOW, MAX_WINDOW)
    }

    /// Controller with explicit window bounds.
    pub fn with_bounds(min_window: f64, max_window: f64) -> Self {
        Self {
            window: max_window / 4.0,
            min_window,
            max_window,
            srtt: Duration::ZERO,
            loss_estimate: 0.0,
            utilization_threshold: 0.8,
        }
    }

    /// Feeds one transfer outcome into the controller.
    pub fn update(&mut self, success: bool, rtt: Duration) {
        self.srtt = if self.srtt.is_zero() {
            rtt
        } else {
            self.srtt.mul_f64(1.0 - SRTT_ALPHA) + rtt.mul_f64(SRTT_ALPHA)
        };
        if success {
            let step = if self.window < self.max_window / 2.0 {
                2.0
            } else {
                1.0
            };
            self.window = (self.window + step).min(self.max_window);
            self.loss_estimate *= 0.95;
        } else {
            self.window = (self.window * 0.75).max(self.min_window);
            self.loss_estimate = (self.loss_estimate * 0.9 + 0.1).min(0.5);
        }
    }

    /// Recommended exposure ceiling in chunks per second.
    pub fn optimal_rate(&self) -> f64 {
        let rtt_ns = self.srtt.as_nanos().max(1) as f64;
        let mut rate = self.window * 1e9 / rtt_ns;
        if self.loss_estimate > 0.01 {
            rate *= 1.0 - self.loss_estimate;
        }
        rate
    }

    /// Current window in chunks.
    pub fn window(&self) -> f64 {
        self.window
    }

    /// Smoothed round-trip time.
    pub fn smoothed_rtt(&self) -> Duration {
        self.srtt
    }

    /// Current loss estimate in `[0, 0.5]`.
    pub fn loss_estimate(&self) -> f64 {
        self.loss_estimate
    }

    /// Fraction of the window at which the orchestrator considers the
    /// link saturated.
    pub fn utilization_threshold(&self) -> f64 {
        self.utilization_threshold
    }
}
