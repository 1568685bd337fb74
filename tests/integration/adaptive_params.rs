#![allow(missing_docs)]

use std::time::Duration;

use red_giant::adaptive::congestion::CongestionController;
use red_giant::adaptive::monitor::{derive_metrics, NetworkSample, TrafficMonitor, SAMPLE_WINDOW};
use red_giant::adaptive::params::{recommend, BASE_CADENCE, BASE_CHUNK_SIZE};

/// 17 successes with bimodal latency around a 237 ms mean plus 3
/// failures: lossy, slow, and heavily jittered.
fn congested_window() -> Vec<NetworkSample> {
    let mut samples = Vec::with_capacity(SAMPLE_WINDOW);
    for i in 0..17 {
        let latency = if i % 2 == 0 { 25 } else { 475 };
        samples.push(NetworkSample::success(
            64 * 1024,
            Duration::from_millis(latency),
        ));
    }
    for _ in 0..3 {
        samples.push(NetworkSample::failure(Duration::from_millis(250)));
    }
    samples
}

#[test]
fn congested_window_degrades_the_parameters() {
    let samples = congested_window();
    let metrics = derive_metrics(&samples);
    assert!((metrics.packet_loss - 0.15).abs() < 1e-9);
    assert!(metrics.latency > Duration::from_millis(200));
    assert!(metrics.congestion > 0.7);

    let params = recommend(&metrics);
    assert_eq!(params.workers, 2);
    assert!(params.cadence > BASE_CADENCE);
    assert!(params.chunk_size < BASE_CHUNK_SIZE);
    assert!(params.reason.contains("Congested"));
    assert!(params.reason.contains("Degraded"));
    assert_eq!(params.buffer_size, params.chunk_size as usize * 2 * 2);
}

#[tokio::test(start_paused = true)]
async fn monitor_streams_the_degraded_recommendation() {
    let monitor = TrafficMonitor::start();
    let mut params_rx = monitor.subscribe();
    for sample in congested_window() {
        assert!(monitor.record(sample));
    }
    let params = params_rx.recv().await.expect("recommendation");
    assert_eq!(params.workers, 2);
    assert!(params.reason.contains("Degraded"));

    let metrics = monitor.current_metrics();
    assert!(metrics.congestion > 0.7);
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn recommendations_are_paced_by_the_tick() {
    let monitor = TrafficMonitor::start();
    let mut params_rx = monitor.subscribe();

    for _ in 0..5 {
        monitor.record(NetworkSample::success(512, Duration::from_millis(10)));
    }
    let first = params_rx.recv().await.expect("first recommendation");
    assert_eq!(first.reason, "Low-BW, Low-Latency");

    // No fresh samples: the stream stays quiet across further ticks.
    tokio::time::sleep(Duration::from_millis(1_600)).await;
    assert!(params_rx.try_recv().is_err());

    monitor.record(NetworkSample::success(512, Duration::from_millis(10)));
    let second = params_rx.recv().await.expect("second recommendation");
    assert_eq!(second.reason, first.reason);
    monitor.stop().await;
}

#[test]
fn rate_tracks_sustained_outcomes() {
    let rtt = Duration::from_millis(20);
    let mut controller = CongestionController::new();
    controller.update(true, rtt);
    let healthy = controller.optimal_rate();

    // A failure burst must strictly decrease the rate.
    let mut prev = healthy;
    for _ in 0..5 {
        controller.update(false, rtt);
        let rate = controller.optimal_rate();
        assert!(rate < prev);
        prev = rate;
    }

    // Sustained success recovers past the degraded rate.
    for _ in 0..300 {
        controller.update(true, rtt);
    }
    assert!(controller.optimal_rate() > healthy);
}
