//! Concurrent receiver: drains exposure notifications, pulls chunks with
//! bounded retries, and reassembles the byte stream in index order.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::orchestrator::{ChunkNotice, Orchestrator};

/// Default pull worker count.
pub const DEFAULT_WORKERS: usize = 4;
/// Attempts per chunk before giving up.
pub const PULL_ATTEMPTS: u32 = 3;
/// Base backoff; doubles per retry.
pub const PULL_BACKOFF_BASE: Duration = Duration::from_millis(5);
/// Completion monitor poll interval.
pub const COMPLETION_POLL_INTERVAL: Duration = Duration::from_millis(5);
/// Completion timeout for transfers up to [`LARGE_TRANSFER_BYTES`].
pub const SMALL_TRANSFER_TIMEOUT: Duration = Duration::from_secs(30);
/// Completion timeout for larger transfers.
pub const LARGE_TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

const LARGE_TRANSFER_BYTES: u64 = 256 * 1024 * 1024;

/// Suggested completion timeout for a transfer of `total_bytes`.
pub fn default_timeout(total_bytes: u64) -> Duration {
    if total_bytes > LARGE_TRANSFER_BYTES {
        LARGE_TRANSFER_TIMEOUT
    } else {
        SMALL_TRANSFER_TIMEOUT
    }
}

struct ReceiverInner {
    expected: u32,
    workers: usize,
    slots: Box<[OnceLock<Box<[u8]>>]>,
    received: AtomicU32,
    complete_tx: watch::Sender<bool>,
    shutdown_tx: watch::Sender<bool>,
    started: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Worker pool reassembling one transfer.
///
/// Tolerates out-of-order notifications, duplicates, and dropped
/// notifications: each chunk lands in a once-only slot, and a completion
/// monitor sweeps the surface for anything the notification stream
/// missed. Output is deterministic in chunk-id order regardless of pull
/// order.
#[derive(Clone)]
pub struct Receiver {
    inner: Arc<ReceiverInner>,
}

impl Receiver {
    /// Receiver expecting `expected_chunks` chunks, pulled by `workers`
    /// concurrent workers.
    pub fn new(expected_chunks: u32, workers: usize) -> Self {
        let slots = (0..expected_chunks)
            .map(|_| OnceLock::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let (complete_tx, _) = watch::channel(expected_chunks == 0);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ReceiverInner {
                expected: expected_chunks,
                workers: workers.max(1),
                slots,
                received: AtomicU32::new(0),
                complete_tx,
                shutdown_tx,
                started: AtomicBool::new(false),
                started_at: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Subscribes to the orchestrator and starts the pull workers and the
    /// completion monitor. Idempotent; requires a tokio runtime.
    pub fn construct_file(&self, orchestrator: &Orchestrator) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.inner.started_at.lock() = Some(Instant::now());
        let notices = Arc::new(AsyncMutex::new(orchestrator.subscribe()));
        let mut tasks = self.inner.tasks.lock();
        for _ in 0..self.inner.workers {
            tasks.push(tokio::spawn(worker_loop(
                self.inner.clone(),
                orchestrator.clone(),
                notices.clone(),
            )));
        }
        tasks.push(tokio::spawn(completion_monitor(
            self.inner.clone(),
            orchestrator.clone(),
        )));
    }

    /// Chunks received so far.
    pub fn received_count(&self) -> u32 {
        self.inner.received.load(Ordering::Acquire)
    }

    /// True once every expected chunk has been received.
    pub fn is_complete(&self) -> bool {
        self.received_count() >= self.inner.expected
    }

    /// Waits for completion (bounded by `timeout`), then assembles the
    /// output in chunk-id order.
    ///
    /// On timeout the assembly proceeds with whatever chunks are present;
    /// missing indices are logged, never silently skipped.
    pub async fn wait_for_completion(
        &self,
        orchestrator: &Orchestrator,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        self.construct_file(orchestrator);
        let mut complete_rx = self.inner.complete_tx.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            while !*complete_rx.borrow() {
                if complete_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        if waited.is_err() {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                received = self.received_count(),
                expected = self.inner.expected,
                "receiver.completion.timeout"
            );
        }
        let _ = self.inner.shutdown_tx.send(true);
        let tasks: Vec<_> = {
            let mut guard = self.inner.tasks.lock();
            guard.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }
        Ok(self.assemble())
    }

    fn assemble(&self) -> Vec<u8> {
        let total: usize = self
            .inner
            .slots
            .iter()
            .filter_map(|slot| slot.get().map(|bytes| bytes.len()))
            .sum();
        let mut out = Vec::with_capacity(total);
        let mut missing = Vec::new();
        for (chunk_id, slot) in self.inner.slots.iter().enumerate() {
            match slot.get() {
                Some(bytes) => out.extend_from_slice(bytes),
                None => missing.push(chunk_id as u32),
            }
        }
        if !missing.is_empty() {
            warn!(
                missing = missing.len(),
                first = missing.first().copied(),
                "receiver.assembly.missing"
            );
        }
        let started_at = *self.inner.started_at.lock();
        let elapsed = started_at.map(|at| at.elapsed()).unwrap_or_default();
        let secs = elapsed.as_secs_f64();
        let throughput_mibps = if secs > 0.0 {
            out.len() as f64 / (1024.0 * 1024.0) / secs
        } else {
            0.0
        };
        info!(
            bytes = out.len(),
            chunks = self.received_count(),
            duration_ms = secs * 1_000.0,
            throughput_mibps,
            "receiver.assembled"
        );
        out
    }
}

async fn worker_loop(
    inner: Arc<ReceiverInner>,
    orchestrator: Orchestrator,
    notices: Arc<AsyncMutex<mpsc::Receiver<ChunkNotice>>>,
) {
    let mut shutdown_rx = inner.shutdown_tx.subscribe();
    loop {
        let notice = tokio::select! {
            _ = shutdown_rx.changed() => break,
            notice = async { notices.lock().await.recv().await } => match notice {
                Some(notice) => notice,
                None => break,
            },
        };
        if notice.chunk_id >= inner.expected {
            warn!(chunk_id = notice.chunk_id, "receiver.notice.out_of_range");
            continue;
        }
        if inner.slots[notice.chunk_id as usize].get().is_some() {
            // Duplicate notification.
            continue;
        }
        pull_with_retry(&inner, &orchestrator, notice.chunk_id).await;
    }
}

async fn pull_with_retry(inner: &ReceiverInner, orchestrator: &Orchestrator, chunk_id: u32) {
    let len = orchestrator.manifest().chunk_len(chunk_id) as usize;
    for attempt in 0..PULL_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(PULL_BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
        }
        let mut buf = vec![0u8; len];
        match orchestrator.pull(chunk_id, &mut buf) {
            Ok(n) => {
                buf.truncate(n);
                store_chunk(inner, chunk_id, buf);
                return;
            }
            Err(err) if err.is_transient() => {
                debug!(chunk_id, attempt, %err, "receiver.pull.retry");
            }
            Err(err) => {
                warn!(chunk_id, %err, "receiver.pull.failed");
                return;
            }
        }
    }
    warn!(
        chunk_id,
        attempts = PULL_ATTEMPTS,
        "receiver.pull.exhausted"
    );
}

fn store_chunk(inner: &ReceiverInner, chunk_id: u32, bytes: Vec<u8>) {
    if inner.slots[chunk_id as usize]
        .set(bytes.into_boxed_slice())
        .is_ok()
    {
        let received = inner.received.fetch_add(1, Ordering::AcqRel) + 1;
        if received == inner.expected {
            let _ = inner.complete_tx.send(true);
        }
    }
    // A racing worker already stored this chunk; the copy is discarded.
}

async fn completion_monitor(inner: Arc<ReceiverInner>, orchestrator: Orchestrator) {
    let mut shutdown_rx = inner.shutdown_tx.subscribe();
    let surface = orchestrator.surface();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = tokio::time::sleep(COMPLETION_POLL_INTERVAL) => {}
        }
        if inner.received.load(Ordering::Acquire) >= inner.expected {
            let _ = inner.complete_tx.send(true);
            break;
        }
        if surface.is_complete() {
            // The red flag is up: everything is exposed, so anything still
            // missing had its notification dropped. Sweep it directly.
            for chunk_id in 0..inner.expected {
                if inner.slots[chunk_id as usize].get().is_some() {
                    continue;
                }
                let len = surface.manifest().chunk_len(chunk_id) as usize;
                let mut buf = vec![0u8; len];
                match surface.pull(chunk_id, &mut buf) {
                    Ok(n) => {
                        buf.truncate(n);
                        store_chunk(&inner, chunk_id, buf);
                    }
                    Err(err) => {
                        warn!(chunk_id, %err, "receiver.sweep.failed");
                    }
                }
            }
        }
    }
}
