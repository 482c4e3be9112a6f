// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The engine: registry of PLC connections and the single entry point used
//! by pollers, the writer and external callers.
//!
//! The registry is guarded by one reader/writer lock, written only on start
//! and stop and read everywhere else. The engine is parameterised by a
//! [`ClientFactory`], which is the sole seam for swapping the real fieldbus
//! transport for a simulated or mocked one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{info, warn};

use kiln_config::MachineConfig;
use kiln_core::error::{EngineError, EngineResult};
use kiln_core::types::{ConnectionStatus, MachineId, PlcValue, SymbolPath, Value};
use kiln_core::write::{WriteRequest, WriteResponse};

use crate::client::ClientFactory;
use crate::connection::PlcConnection;
use crate::writer::PrioritizedWriter;

/// Capacity of the engine-wide write confirmation mirror.
const CONFIRM_CAPACITY: usize = 100;

/// Cap on how long `stop` waits for component acknowledgements.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Engine
// =============================================================================

/// Registry of PLC connections plus the prioritised writer.
pub struct Engine {
    connections: RwLock<HashMap<MachineId, Arc<PlcConnection>>>,
    writer: PrioritizedWriter,
    factory: Arc<dyn ClientFactory>,
    archive_tx: mpsc::Sender<PlcValue>,
    confirm_tx: broadcast::Sender<WriteResponse>,
}

impl Engine {
    /// Creates an engine.
    ///
    /// Returns the engine together with the receiving half of the bounded
    /// archive channel, which an external message-bus producer consumes.
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        archive_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<PlcValue>) {
        let (archive_tx, archive_rx) = mpsc::channel(archive_capacity);
        let (confirm_tx, _) = broadcast::channel(CONFIRM_CAPACITY);

        let engine = Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            writer: PrioritizedWriter::new(confirm_tx.clone()),
            factory,
            archive_tx,
            confirm_tx,
        });

        (engine, archive_rx)
    }

    /// Starts one connection per machine and the write processor.
    ///
    /// On error, connections created by this call are torn down again
    /// before the error is returned.
    pub async fn start(self: &Arc<Self>, configs: &[MachineConfig]) -> EngineResult<()> {
        let mut created: Vec<Arc<PlcConnection>> = Vec::with_capacity(configs.len());
        let mut error = None;

        for cfg in configs {
            let duplicate = {
                let registry = self.connections.read();
                registry.contains_key(&cfg.id)
            } || created.iter().any(|c| c.machine_id() == &cfg.id);

            if duplicate {
                error = Some(EngineError::AlreadyRegistered {
                    machine_id: cfg.id.clone(),
                });
                break;
            }

            created.push(PlcConnection::start(cfg.clone(), self.factory.clone()));
        }

        if let Some(err) = error {
            for conn in created {
                conn.stop(STOP_TIMEOUT).await;
            }
            return Err(err);
        }

        {
            let mut registry = self.connections.write();
            for conn in created {
                registry.insert(conn.machine_id().clone(), conn);
            }
        }

        self.writer.start(Arc::downgrade(self));
        info!(machines = configs.len(), "engine started");
        Ok(())
    }

    /// Stops the writer, then every connection, waiting for acknowledgements
    /// under a shared ten-second cap. Stragglers are logged and abandoned.
    pub async fn stop(&self) {
        let deadline = Instant::now() + STOP_TIMEOUT;

        if !self.writer.stop(remaining(deadline)).await {
            warn!("write processor abandoned during stop");
        }

        let connections: Vec<Arc<PlcConnection>> = {
            let mut registry = self.connections.write();
            registry.drain().map(|(_, conn)| conn).collect()
        };

        for conn in connections {
            if !conn.stop(remaining(deadline)).await {
                warn!(machine_id = %conn.machine_id(), "connection abandoned during stop");
            }
        }

        info!("engine stopped");
    }

    /// Reads one symbol, stamping the value with the read time.
    pub async fn read_symbol(
        &self,
        machine_id: &MachineId,
        symbol: SymbolPath,
    ) -> EngineResult<PlcValue> {
        let conn = self.connection(machine_id)?;
        let value = conn.read_symbol(symbol.clone()).await?;
        Ok(PlcValue::now(machine_id.clone(), symbol, value))
    }

    /// Reads a batch of symbols in one round-trip.
    ///
    /// Every returned value carries the same timestamp, assigned once when
    /// the batch returned.
    pub async fn read_symbols(
        &self,
        machine_id: &MachineId,
        symbols: &[SymbolPath],
    ) -> EngineResult<HashMap<SymbolPath, PlcValue>> {
        let conn = self.connection(machine_id)?;
        let raw = conn.read_symbols(symbols.to_vec()).await?;

        let now = Utc::now();
        Ok(raw
            .into_iter()
            .map(|(symbol, value)| {
                let point = PlcValue::at(machine_id.clone(), symbol.clone(), value, now);
                (symbol, point)
            })
            .collect())
    }

    /// Writes one symbol synchronously.
    pub async fn write_symbol(
        &self,
        machine_id: &MachineId,
        symbol: SymbolPath,
        value: Value,
    ) -> EngineResult<()> {
        let conn = self.connection(machine_id)?;
        conn.write_symbol(symbol, value).await
    }

    /// Submits an asynchronous write request.
    ///
    /// The request's response sink receives exactly one response; if the
    /// submission itself fails, the failure response has already been
    /// delivered when this returns.
    pub fn write_async(&self, req: WriteRequest) -> EngineResult<()> {
        self.writer.submit(req)
    }

    /// Returns a snapshot of every connection's health counters.
    pub fn status(&self) -> HashMap<MachineId, ConnectionStatus> {
        let registry = self.connections.read();
        registry
            .iter()
            .map(|(id, conn)| (id.clone(), conn.status()))
            .collect()
    }

    /// Subscribes to the engine-wide write confirmation mirror.
    pub fn confirmations(&self) -> broadcast::Receiver<WriteResponse> {
        self.confirm_tx.subscribe()
    }

    /// Returns the sending half of the bounded archive channel.
    pub fn archive_sender(&self) -> mpsc::Sender<PlcValue> {
        self.archive_tx.clone()
    }

    /// Returns the writer's metrics counters.
    pub fn writer_metrics(&self) -> (u64, u64, u64, u64) {
        self.writer.metrics().snapshot()
    }

    fn connection(&self, machine_id: &MachineId) -> EngineResult<Arc<PlcConnection>> {
        let registry = self.connections.read();
        registry
            .get(machine_id)
            .cloned()
            .ok_or_else(|| EngineError::unknown_machine(machine_id.clone()))
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimClientFactory;

    fn machine(id: &str) -> MachineConfig {
        MachineConfig {
            id: MachineId::new(id),
            name: String::new(),
            host: "127.0.0.1".to_string(),
            node_id: "127.0.0.1.1.1".to_string(),
            port: 851,
            chambers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn read_unknown_machine_fails() {
        let (engine, _archive_rx) = Engine::new(Arc::new(SimClientFactory), 16);
        engine.start(&[machine("m1")]).await.unwrap();

        let err = engine
            .read_symbol(&MachineId::new("m9"), SymbolPath::new("GVL.x"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownMachine { .. }));

        engine.stop().await;
    }

    #[tokio::test]
    async fn batch_values_share_one_timestamp() {
        let (engine, _archive_rx) = Engine::new(Arc::new(SimClientFactory), 16);
        engine.start(&[machine("m1")]).await.unwrap();

        let symbols = vec![SymbolPath::new("GVL.a"), SymbolPath::new("GVL.b")];
        let values = engine
            .read_symbols(&MachineId::new("m1"), &symbols)
            .await
            .unwrap();

        assert_eq!(values.len(), 2);
        let timestamps: Vec<_> = values.values().map(|v| v.timestamp).collect();
        assert_eq!(timestamps[0], timestamps[1]);

        engine.stop().await;
    }

    #[tokio::test]
    async fn duplicate_start_tears_down() {
        let (engine, _archive_rx) = Engine::new(Arc::new(SimClientFactory), 16);
        let err = engine
            .start(&[machine("m1"), machine("m1")])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyRegistered { .. }));
        assert!(engine.status().is_empty());
    }

    #[tokio::test]
    async fn status_reports_connected_machines() {
        let (engine, _archive_rx) = Engine::new(Arc::new(SimClientFactory), 16);
        engine.start(&[machine("m1"), machine("m2")]).await.unwrap();

        // Force both handlers through their initial connect.
        engine
            .read_symbol(&MachineId::new("m1"), SymbolPath::new("GVL.x"))
            .await
            .unwrap();
        engine
            .read_symbol(&MachineId::new("m2"), SymbolPath::new("GVL.x"))
            .await
            .unwrap();

        let status = engine.status();
        assert_eq!(status.len(), 2);
        assert!(status[&MachineId::new("m1")].connected);
        assert_eq!(status[&MachineId::new("m1")].reconnect_count, 1);

        engine.stop().await;
    }
}
