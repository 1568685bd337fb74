//! Rolling-window traffic telemetry.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

use crate::adaptive::params::{recommend, AdaptiveParams};
use crate::timebase;

/// Samples kept in the rolling window.
pub const SAMPLE_WINDOW: usize = 20;
/// Bounded intake queue; overflow drops the sample.
pub const SAMPLE_QUEUE_CAPACITY: usize = 100;
/// Minimum interval between parameter recommendations.
pub const RECOMMEND_INTERVAL: Duration = Duration::from_millis(500);

const PARAM_STREAM_CAPACITY: usize = 8;

/// One observed transfer outcome.
#[derive(Debug, Clone, Copy)]
pub struct NetworkSample {
    /// Process-nanosecond timestamp at which the sample was taken.
    pub at_ns: u64,
    /// Wall time the transfer took, including the copy.
    pub response_time: Duration,
    /// Bytes moved; zero for failures.
    pub bytes: u64,
    /// Whether the transfer succeeded.
    pub success: bool,
}

impl NetworkSample {
    /// Successful transfer of `bytes` in `response_time`.
    pub fn success(bytes: u64, response_time: Duration) -> Self {
        Self {
            at_ns: timebase::now_ns(),
            response_time,
            bytes,
            success: true,
        }
    }

    /// Failed transfer attempt that took `response_time`.
    pub fn failure(response_time: Duration) -> Self {
        Self {
            at_ns: timebase::now_ns(),
            response_time,
            bytes: 0,
            success: false,
        }
    }
}

/// Metrics derived from the rolling window.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrafficMetrics {
    /// Successful bytes over total response time, in bytes per second.
    pub bandwidth_bps: f64,
    /// Mean response time of successful samples.
    pub latency: Duration,
    /// Failed fraction of the window, in `[0, 1]`.
    pub packet_loss: f64,
    /// Normalized latency variance, in `[0, 1]`.
    pub congestion: f64,
}

/// Derives metrics from a sample window.
pub fn derive_metrics(samples: &[NetworkSample]) -> TrafficMetrics {
    if samples.is_empty() {
        return TrafficMetrics::default();
    }
    let total_rtt: Duration = samples.iter().map(|s| s.response_time).sum();
    let successes: Vec<&NetworkSample> = samples.iter().filter(|s| s.success).collect();
    let success_bytes: u64 = successes.iter().map(|s| s.bytes).sum();
    let bandwidth_bps = if total_rtt > Duration::ZERO {
        success_bytes as f64 / total_rtt.as_secs_f64()
    } else {
        0.0
    };
    let latency = if successes.is_empty() {
        Duration::ZERO
    } else {
        successes
            .iter()
            .map(|s| s.response_time)
            .sum::<Duration>()
            / successes.len() as u32
    };
    let packet_loss = 1.0 - successes.len() as f64 / samples.len() as f64;
    let congestion = if successes.len() >= 2 && latency > Duration::ZERO {
        let mean = latency.as_secs_f64();
        let variance = successes
            .iter()
            .map(|s| {
                let delta = s.response_time.as_secs_f64() - mean;
                delta * delta
            })
            .sum::<f64>()
            / successes.len() as f64;
        (variance / (mean * mean)).min(1.0)
    } else {
        0.0
    };
    TrafficMetrics {
        bandwidth_bps,
        latency,
        packet_loss,
        congestion,
    }
}

struct MonitorShared {
    metrics: RwLock<TrafficMetrics>,
    subscribers: Mutex<Vec<mpsc::Sender<AdaptiveParams>>>,
    dropped: AtomicU64,
}

/// Owns the sample window and produces parameter recommendations.
///
/// All updates arrive through the bounded intake channel and are applied
/// by a single monitor task; recommendations are produced at most every
/// [`RECOMMEND_INTERVAL`] while fresh samples arrive.
pub struct TrafficMonitor {
    sample_tx: mpsc::Sender<NetworkSample>,
    shared: Arc<MonitorShared>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TrafficMonitor {
    /// Spawns the monitor task. Requires a tokio runtime.
    pub fn start() -> Self {
        let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(MonitorShared {
            metrics: RwLock::new(TrafficMetrics::default()),
            subscribers: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        });
        let task = tokio::spawn(monitor_loop(sample_rx, shutdown_rx, shared.clone()));
        Self {
            sample_tx,
            shared,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Non-blocking intake. Returns false when the queue is full and the
    /// sample was dropped; callers treat that as a failure signal.
    pub fn record(&self, sample: NetworkSample) -> bool {
        match self.sample_tx.try_send(sample) {
            Ok(()) => true,
            Err(_) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Opens a stream of parameter recommendations.
    pub fn subscribe(&self) -> mpsc::Receiver<AdaptiveParams> {
        let (tx, rx) = mpsc::channel(PARAM_STREAM_CAPACITY);
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// Snapshot of the latest derived metrics.
    pub fn current_metrics(&self) -> TrafficMetrics {
        self.shared.metrics.read().clone()
    }

    /// Samples dropped at the intake queue so far.
    pub fn dropped_samples(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Stops and joins the monitor task. Idempotent.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn monitor_loop(
    mut sample_rx: mpsc::Receiver<NetworkSample>,
    mut shutdown_rx: watch::Receiver<bool>,
    shared: Arc<MonitorShared>,
) {
    let mut window: VecDeque<NetworkSample> = VecDeque::with_capacity(SAMPLE_WINDOW);
    let mut ticker = tokio::time::interval(RECOMMEND_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut fresh = 0usize;
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            maybe = sample_rx.recv() => match maybe {
                Some(sample) => {
                    if window.len() == SAMPLE_WINDOW {
                        window.pop_front();
                    }
                    window.push_back(sample);
                    fresh += 1;
                }
                None => break,
            },
            _ = ticker.tick() => {
                if fresh == 0 {
                    continue;
                }
                fresh = 0;
                let metrics = derive_metrics(window.make_contiguous());
                let params = recommend(&metrics);
                trace!(
                    bandwidth_bps = metrics.bandwidth_bps,
                    packet_loss = metrics.packet_loss,
                    congestion = metrics.congestion,
                    reason = %params.reason,
                    "monitor.recommendation"
                );
                *shared.metrics.write() = metrics;
                let mut subscribers = shared.subscribers.lock();
                subscribers.retain(|tx| match tx.try_send(params.clone()) {
                    Ok(()) | Err(TrySendError::Full(_)) => true,
                    Err(TrySendError::Closed(_)) => false,
                });
            }
        }
    }
}
