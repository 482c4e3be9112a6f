// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Prioritised asynchronous write-back.
//!
//! Write requests land in one of three bounded queues by priority and a
//! single processor task dispatches them to the engine in strict priority
//! order: high first, then medium, then low, with a short idle wait when
//! all queues are empty. High-priority work therefore preempts queued bulk
//! writes, while lower queues still drain whenever the upper ones are idle.
//!
//! Every request's one-shot sink receives exactly one response: from
//! execution, from the submission-failure path, or from the drain that runs
//! at shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use kiln_core::error::{EngineError, EngineResult};
use kiln_core::write::{WriteRequest, WriteResponse};

use crate::engine::Engine;

/// Queue capacity for priorities `>= 8`.
const HIGH_CAPACITY: usize = 100;

/// Queue capacity for priorities `4..=7`.
const MEDIUM_CAPACITY: usize = 500;

/// Queue capacity for priorities `< 4`.
const LOW_CAPACITY: usize = 1000;

/// Idle wait between queue sweeps when no request is ready.
const IDLE_WAIT: Duration = Duration::from_millis(10);

/// One PLC cycle; how long a written value needs to become readable.
const PLC_CYCLE: Duration = Duration::from_millis(20);

// =============================================================================
// Metrics
// =============================================================================

/// Counters kept by the writer processor.
#[derive(Debug, Default)]
pub struct WriterMetrics {
    /// Requests dispatched to the engine.
    pub processed: AtomicU64,
    /// Requests that completed successfully (including verification).
    pub succeeded: AtomicU64,
    /// Requests that failed or failed verification.
    pub failed: AtomicU64,
    /// Requests that expired before dispatch.
    pub expired: AtomicU64,
}

impl WriterMetrics {
    /// Returns `(processed, succeeded, failed, expired)`.
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.processed.load(Ordering::Relaxed),
            self.succeeded.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.expired.load(Ordering::Relaxed),
        )
    }
}

// =============================================================================
// PrioritizedWriter
// =============================================================================

struct QueueReceivers {
    high: mpsc::Receiver<WriteRequest>,
    medium: mpsc::Receiver<WriteRequest>,
    low: mpsc::Receiver<WriteRequest>,
}

/// Accepts write requests and dispatches them in priority order.
pub struct PrioritizedWriter {
    high_tx: mpsc::Sender<WriteRequest>,
    medium_tx: mpsc::Sender<WriteRequest>,
    low_tx: mpsc::Sender<WriteRequest>,
    receivers: Mutex<Option<QueueReceivers>>,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
    confirm_tx: broadcast::Sender<WriteResponse>,
    metrics: Arc<WriterMetrics>,
}

impl PrioritizedWriter {
    /// Creates the writer with its three queues.
    ///
    /// Responses are mirrored onto `confirm_tx` for engine-wide observers;
    /// lagging observers lose messages rather than stalling the processor.
    pub fn new(confirm_tx: broadcast::Sender<WriteResponse>) -> Self {
        let (high_tx, high_rx) = mpsc::channel(HIGH_CAPACITY);
        let (medium_tx, medium_rx) = mpsc::channel(MEDIUM_CAPACITY);
        let (low_tx, low_rx) = mpsc::channel(LOW_CAPACITY);

        Self {
            high_tx,
            medium_tx,
            low_tx,
            receivers: Mutex::new(Some(QueueReceivers {
                high: high_rx,
                medium: medium_rx,
                low: low_rx,
            })),
            shutdown: Arc::new(Notify::new()),
            handle: Mutex::new(None),
            confirm_tx,
            metrics: Arc::new(WriterMetrics::default()),
        }
    }

    /// Enqueues a request without blocking.
    ///
    /// On a saturated queue the request fails immediately: its sink receives
    /// a failure response and `QueueFull` is returned. No queue is modified.
    pub fn submit(&self, req: WriteRequest) -> EngineResult<()> {
        let (queue_tx, queue_name) = if req.priority >= 8 {
            (&self.high_tx, "high")
        } else if req.priority >= 4 {
            (&self.medium_tx, "medium")
        } else {
            (&self.low_tx, "low")
        };

        match queue_tx.try_send(req) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(req)) => {
                let err = EngineError::QueueFull { queue: queue_name };
                let _ = req
                    .response_tx
                    .send(WriteResponse::failure(req.id, err.to_string()));
                Err(err)
            }
            Err(mpsc::error::TrySendError::Closed(req)) => {
                let err = EngineError::Stopping;
                let _ = req
                    .response_tx
                    .send(WriteResponse::failure(req.id, err.to_string()));
                Err(err)
            }
        }
    }

    /// Spawns the processor task.
    ///
    /// Requests submitted before `start` stay queued and are picked up in
    /// priority order once the processor runs.
    pub fn start(&self, engine: Weak<Engine>) {
        let receivers = match self.receivers.lock().take() {
            Some(r) => r,
            None => return, // already started
        };

        let processor = WriterProcessor {
            engine,
            high_rx: receivers.high,
            medium_rx: receivers.medium,
            low_rx: receivers.low,
            shutdown: self.shutdown.clone(),
            confirm_tx: self.confirm_tx.clone(),
            metrics: self.metrics.clone(),
        };

        *self.handle.lock() = Some(tokio::spawn(processor.run()));
    }

    /// Stops the processor; queued requests are failed, not dropped.
    pub async fn stop(&self, wait: Duration) -> bool {
        self.shutdown.notify_one();

        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => match tokio::time::timeout(wait, handle).await {
                Ok(_) => true,
                Err(_) => {
                    warn!("writer processor did not stop in time, abandoning");
                    false
                }
            },
            None => true,
        }
    }

    /// Returns the processor's counters.
    pub fn metrics(&self) -> &Arc<WriterMetrics> {
        &self.metrics
    }
}

// =============================================================================
// WriterProcessor
// =============================================================================

struct WriterProcessor {
    engine: Weak<Engine>,
    high_rx: mpsc::Receiver<WriteRequest>,
    medium_rx: mpsc::Receiver<WriteRequest>,
    low_rx: mpsc::Receiver<WriteRequest>,
    shutdown: Arc<Notify>,
    confirm_tx: broadcast::Sender<WriteResponse>,
    metrics: Arc<WriterMetrics>,
}

impl WriterProcessor {
    async fn run(mut self) {
        info!("write processor started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => break,

                Some(req) = self.high_rx.recv() => self.execute(req).await,
                Some(req) = self.medium_rx.recv() => self.execute(req).await,
                Some(req) = self.low_rx.recv() => self.execute(req).await,

                _ = sleep(IDLE_WAIT) => {}
            }
        }

        self.drain();

        let (processed, succeeded, failed, expired) = self.metrics.snapshot();
        info!(processed, succeeded, failed, expired, "write processor stopped");
    }

    /// Fails everything still queued so no sink is left unresolved.
    fn drain(&mut self) {
        for rx in [&mut self.high_rx, &mut self.medium_rx, &mut self.low_rx] {
            rx.close();
            while let Ok(req) = rx.try_recv() {
                let resp = WriteResponse::failure(req.id, EngineError::Stopping.to_string());
                let _ = req.response_tx.send(resp);
            }
        }
    }

    async fn execute(&self, req: WriteRequest) {
        self.metrics.processed.fetch_add(1, Ordering::Relaxed);

        // A zero timeout means no deadline.
        let budget = if req.timeout.is_zero() {
            None
        } else {
            match req.remaining_time() {
                Some(remaining) => Some(remaining),
                None => {
                    self.metrics.expired.fetch_add(1, Ordering::Relaxed);
                    let resp = WriteResponse::failure(
                        req.id,
                        EngineError::Timeout(req.timeout).to_string(),
                    );
                    let _ = self.confirm_tx.send(resp.clone());
                    let _ = req.response_tx.send(resp);
                    return;
                }
            }
        };

        let outcome = match budget {
            Some(budget) => match tokio::time::timeout(budget, self.perform(&req)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(EngineError::Timeout(req.timeout).to_string()),
            },
            None => self.perform(&req).await,
        };

        let resp = match outcome {
            Ok(()) => {
                self.metrics.succeeded.fetch_add(1, Ordering::Relaxed);
                WriteResponse::success(req.id)
            }
            Err(message) => {
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                debug!(request_id = %req.id, error = %message, "write request failed");
                WriteResponse::failure(req.id, message)
            }
        };

        // Mirror for engine-wide observers first (broadcast sheds on lag),
        // then resolve the caller's single-shot sink; neither can block.
        let _ = self.confirm_tx.send(resp.clone());
        let _ = req.response_tx.send(resp);
    }

    /// Executes the write and, when requested, the read-back verification.
    async fn perform(&self, req: &WriteRequest) -> Result<(), String> {
        let engine = self
            .engine
            .upgrade()
            .ok_or_else(|| EngineError::Stopping.to_string())?;

        engine
            .write_symbol(&req.machine_id, req.symbol.clone(), req.value.clone())
            .await
            .map_err(|e| e.to_string())?;

        if !req.require_ack {
            return Ok(());
        }

        // Give the PLC one cycle to latch the value before reading it back.
        sleep(PLC_CYCLE).await;

        let readback = engine
            .read_symbol(&req.machine_id, req.symbol.clone())
            .await
            .map_err(|e| format!("verification read failed: {}", e))?;

        let want = req.value.canonical();
        let got = readback.value.canonical();
        if want == got {
            Ok(())
        } else {
            Err(format!(
                "verification failed: expected {}, got {}",
                want, got
            ))
        }
    }
}
