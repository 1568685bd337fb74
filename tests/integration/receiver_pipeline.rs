#![allow(missing_docs)]

use std::time::Duration;

use red_giant::orchestrator::{Orchestrator, OrchestratorOptions};
use red_giant::receiver::Receiver;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

fn fast_options(chunk_size: u32) -> OrchestratorOptions {
    OrchestratorOptions {
        chunk_size,
        adaptive: false,
        cadence: Duration::ZERO,
        ..OrchestratorOptions::default()
    }
}

async fn run_transfer(payload: &[u8], options: OrchestratorOptions, workers: usize) -> Vec<u8> {
    let orchestrator = Orchestrator::with_options(payload.to_vec(), options).unwrap();
    let receiver = Receiver::new(orchestrator.manifest().total_chunks, workers);
    receiver.construct_file(&orchestrator);
    orchestrator.begin_exposure();
    let assembled = receiver
        .wait_for_completion(&orchestrator, Duration::from_secs(10))
        .await
        .unwrap();
    orchestrator.shutdown().await;
    assembled
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_million_bytes_reassemble_in_order() {
    let payload = pattern(1_000_000);
    let options = fast_options(1024);
    let assembled = run_transfer(&payload, options, 4).await;
    assert_eq!(assembled.len(), 1_000_000);
    assert_eq!(assembled, payload);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reassembly_is_deterministic_across_runs() {
    let payload = pattern(300_000);
    let first = run_transfer(&payload, fast_options(1024), 4).await;
    let second = run_transfer(&payload, fast_options(1024), 2).await;
    assert_eq!(first, second);
    assert_eq!(first, payload);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dropped_notifications_are_recovered_by_the_sweep() {
    // A one-slot notification channel guarantees heavy drops; the
    // receiver's completion sweep has to fill the gaps.
    let payload = pattern(200_000);
    let options = OrchestratorOptions {
        notice_capacity: Some(1),
        ..fast_options(1024)
    };
    let assembled = run_transfer(&payload, options, 2).await;
    assert_eq!(assembled, payload);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_notifications_write_each_chunk_once() {
    let payload = pattern(64 * 1024);
    let orchestrator =
        Orchestrator::with_options(payload.clone(), fast_options(1024)).unwrap();
    let total = orchestrator.manifest().total_chunks;
    let receiver = Receiver::new(total, 4);
    receiver.construct_file(&orchestrator);
    orchestrator.begin_exposure();
    let assembled = receiver
        .wait_for_completion(&orchestrator, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(receiver.received_count(), total);
    assert_eq!(assembled, payload);
    // Every chunk was pulled at least once and stored exactly once.
    let surface = orchestrator.surface();
    for chunk_id in 0..total {
        assert!(surface.pull_count(chunk_id).unwrap() >= 1);
    }
    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn paced_exposure_still_completes() {
    let payload = pattern(16 * 1024);
    let options = OrchestratorOptions {
        chunk_size: 1024,
        adaptive: true,
        cadence: Duration::from_millis(1),
        ..OrchestratorOptions::default()
    };
    let assembled = run_transfer(&payload, options, 2).await;
    assert_eq!(assembled, payload);
}
