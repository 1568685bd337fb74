//! Live traffic telemetry and the tuning loops driven by it.
//!
//! The [`TrafficMonitor`] keeps a rolling window of transfer samples and
//! derives bandwidth, latency, loss and congestion from it. The pure
//! recommendation rules in [`params`] turn those metrics into
//! [`AdaptiveParams`]; the AIMD [`CongestionController`] turns per-sample
//! outcomes into a target exposure rate.

pub mod congestion;
pub mod monitor;
pub mod params;

pub use congestion::CongestionController;
pub use monitor::{NetworkSample, TrafficMetrics, TrafficMonitor};
pub use params::{recommend, AdaptiveParams};
