// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Chamber pollers.
//!
//! One ticker-driven task per chamber batch-reads every symbol of the
//! chamber at a fixed cadence and publishes the result twice: one
//! [`BroadcastMsg`] per tick toward the stream hub, and one [`PlcValue`]
//! per symbol onto the bounded archive channel.
//!
//! A poller never blocks longer than a tick: both publishes are
//! non-blocking, and archive overflow drops the individual point against a
//! per-chamber counter. Read errors are logged at most once per 10 s per
//! chamber and the poller simply continues.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use kiln_config::{ChamberConfig, MachineConfig};
use kiln_core::message::BroadcastMsg;
use kiln_core::types::{ChamberId, MachineId, PlcValue};

use crate::engine::Engine;

/// Poll cadence per chamber.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Minimum spacing between error log lines per chamber.
const ERROR_LOG_THROTTLE: Duration = Duration::from_secs(10);

/// Cap on how long `PollerSet::stop` waits for acknowledgements.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// ChamberPoller
// =============================================================================

/// A single chamber's polling task.
pub struct ChamberPoller {
    machine_id: MachineId,
    chamber_id: ChamberId,
    dropped: Arc<AtomicU64>,
    shutdown: Arc<Notify>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ChamberPoller {
    /// Spawns the polling task for one chamber.
    pub fn spawn(
        engine: Arc<Engine>,
        machine_id: MachineId,
        chamber: ChamberConfig,
        hub_tx: mpsc::Sender<BroadcastMsg>,
        archive_tx: mpsc::Sender<PlcValue>,
    ) -> Arc<Self> {
        let dropped = Arc::new(AtomicU64::new(0));
        let shutdown = Arc::new(Notify::new());

        let task = PollerTask {
            engine,
            machine_id: machine_id.clone(),
            chamber,
            hub_tx,
            archive_tx,
            dropped: dropped.clone(),
            shutdown: shutdown.clone(),
        };
        let chamber_id = task.chamber.id.clone();
        let handle = tokio::spawn(task.run());

        Arc::new(Self {
            machine_id,
            chamber_id,
            dropped,
            shutdown,
            handle: parking_lot::Mutex::new(Some(handle)),
        })
    }

    /// Returns the machine this poller reads from.
    pub fn machine_id(&self) -> &MachineId {
        &self.machine_id
    }

    /// Returns the chamber this poller covers.
    pub fn chamber_id(&self) -> &ChamberId {
        &self.chamber_id
    }

    /// Number of archive points dropped on channel overflow.
    pub fn dropped_points(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Signals the task to stop and waits for it to acknowledge.
    pub async fn stop(&self, wait: Duration) -> bool {
        self.shutdown.notify_one();

        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => match tokio::time::timeout(wait, handle).await {
                Ok(_) => true,
                Err(_) => {
                    warn!(
                        machine_id = %self.machine_id,
                        chamber_id = %self.chamber_id,
                        "poller did not stop in time, abandoning"
                    );
                    false
                }
            },
            None => true,
        }
    }
}

struct PollerTask {
    engine: Arc<Engine>,
    machine_id: MachineId,
    chamber: ChamberConfig,
    hub_tx: mpsc::Sender<BroadcastMsg>,
    archive_tx: mpsc::Sender<PlcValue>,
    dropped: Arc<AtomicU64>,
    shutdown: Arc<Notify>,
}

impl PollerTask {
    async fn run(self) {
        let symbols = self.chamber.symbol_paths();
        let mut last_error_log: Option<Instant> = None;

        // Wall-clock driven; a missed tick coalesces into one catch-up tick
        // instead of a burst replay.
        let mut tick = interval(POLL_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(
            machine_id = %self.machine_id,
            chamber_id = %self.chamber.id,
            symbols = symbols.len(),
            "chamber poller started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => break,

                _ = tick.tick() => {
                    self.poll_once(&symbols, &mut last_error_log).await;
                }
            }
        }

        debug!(
            machine_id = %self.machine_id,
            chamber_id = %self.chamber.id,
            dropped = self.dropped.load(Ordering::Relaxed),
            "chamber poller stopped"
        );
    }

    async fn poll_once(
        &self,
        symbols: &[kiln_core::types::SymbolPath],
        last_error_log: &mut Option<Instant>,
    ) {
        let values = match self.engine.read_symbols(&self.machine_id, symbols).await {
            Ok(values) => values,
            Err(e) => {
                let due = last_error_log
                    .map(|t| t.elapsed() >= ERROR_LOG_THROTTLE)
                    .unwrap_or(true);
                if due {
                    warn!(
                        machine_id = %self.machine_id,
                        chamber_id = %self.chamber.id,
                        error = %e,
                        "chamber poll failed"
                    );
                    *last_error_log = Some(Instant::now());
                }
                return;
            }
        };

        let timestamp = values
            .values()
            .next()
            .map(|v| v.timestamp)
            .unwrap_or_else(Utc::now);

        let mut data = HashMap::with_capacity(values.len());
        for (symbol, point) in &values {
            data.insert(symbol.clone(), point.value.clone());
        }

        for (_, point) in values {
            if self.archive_tx.try_send(point).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        let msg = BroadcastMsg::data(
            self.machine_id.clone(),
            self.chamber.id.clone(),
            data,
            timestamp,
        );
        // The hub sheds under overload rather than stalling the poller.
        let _ = self.hub_tx.try_send(msg);
    }
}

// =============================================================================
// PollerSet
// =============================================================================

/// Lifecycle manager for the pollers of a machine fleet.
pub struct PollerSet {
    pollers: Vec<Arc<ChamberPoller>>,
}

impl PollerSet {
    /// Spawns one poller per configured chamber.
    pub fn start(
        engine: Arc<Engine>,
        configs: &[MachineConfig],
        hub_tx: mpsc::Sender<BroadcastMsg>,
        archive_tx: mpsc::Sender<PlcValue>,
    ) -> Self {
        let mut pollers = Vec::new();
        for machine in configs {
            for chamber in &machine.chambers {
                pollers.push(ChamberPoller::spawn(
                    engine.clone(),
                    machine.id.clone(),
                    chamber.clone(),
                    hub_tx.clone(),
                    archive_tx.clone(),
                ));
            }
        }

        info!(pollers = pollers.len(), "chamber pollers started");
        Self { pollers }
    }

    /// Returns the managed pollers.
    pub fn pollers(&self) -> &[Arc<ChamberPoller>] {
        &self.pollers
    }

    /// Stops every poller under a shared ten-second cap.
    pub async fn stop(&self) {
        let deadline = Instant::now() + STOP_TIMEOUT;
        for poller in &self.pollers {
            let wait = deadline.saturating_duration_since(Instant::now());
            poller.stop(wait).await;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimClientFactory;
    use kiln_config::SymbolConfig;
    use kiln_core::types::{PlcType, SymbolPath};

    fn machine_with_chamber(id: &str) -> MachineConfig {
        MachineConfig {
            id: MachineId::new(id),
            name: String::new(),
            host: "127.0.0.1".to_string(),
            node_id: "127.0.0.1.1.1".to_string(),
            port: 851,
            chambers: vec![ChamberConfig {
                id: ChamberId::new("ch1"),
                name: String::new(),
                symbols: vec![
                    SymbolConfig {
                        path: SymbolPath::new("GVL.ch1.temperature"),
                        data_type: PlcType::Float64,
                        unit: None,
                    },
                    SymbolConfig {
                        path: SymbolPath::new("GVL.ch1.pressure"),
                        data_type: PlcType::Float64,
                        unit: None,
                    },
                ],
            }],
        }
    }

    #[tokio::test]
    async fn poller_emits_broadcasts_and_archive_points() {
        let config = machine_with_chamber("m1");
        let (engine, _engine_archive_rx) = Engine::new(Arc::new(SimClientFactory), 16);
        engine.start(std::slice::from_ref(&config)).await.unwrap();

        let (hub_tx, mut hub_rx) = mpsc::channel(64);
        let (archive_tx, mut archive_rx) = mpsc::channel(64);

        let set = PollerSet::start(engine.clone(), &[config], hub_tx, archive_tx);

        let msg = tokio::time::timeout(Duration::from_secs(1), hub_rx.recv())
            .await
            .expect("broadcast within a second")
            .expect("channel open");
        assert_eq!(msg.machine_id, Some(MachineId::new("m1")));
        assert_eq!(msg.chamber_id, Some(ChamberId::new("ch1")));
        assert_eq!(msg.data.len(), 2);

        let point = archive_rx.recv().await.expect("archive point");
        assert_eq!(point.quality, 100);
        assert_eq!(point.source, MachineId::new("m1"));

        set.stop().await;
        engine.stop().await;
    }

    #[tokio::test]
    async fn archive_overflow_drops_points_not_progress() {
        let config = machine_with_chamber("m1");
        let (engine, _engine_archive_rx) = Engine::new(Arc::new(SimClientFactory), 16);
        engine.start(std::slice::from_ref(&config)).await.unwrap();

        let (hub_tx, mut hub_rx) = mpsc::channel(1024);
        // A one-slot archive channel that nobody drains: it fills after a
        // single point and every further point is dropped.
        let (archive_tx, _archive_rx) = mpsc::channel(1);

        let set = PollerSet::start(engine.clone(), &[config], hub_tx, archive_tx);

        // Broadcasts keep flowing regardless of the stuck archive channel.
        for _ in 0..5 {
            tokio::time::timeout(Duration::from_secs(1), hub_rx.recv())
                .await
                .expect("poller keeps broadcasting")
                .expect("channel open");
        }

        assert!(set.pollers()[0].dropped_points() > 0);

        set.stop().await;
        engine.stop().await;
    }
}
