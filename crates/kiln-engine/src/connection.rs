// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-PLC connection multiplexer.
//!
//! A PLC accepts exactly one physical client connection, so every logical
//! reader and writer in the process funnels through one [`PlcConnection`].
//! Callers never touch the client handle: each call enqueues a request
//! record carrying a one-shot reply sink onto a bounded channel, and a
//! dedicated handler task that owns the handle drains the channel, executes
//! each request in arrival order and replies on the sink.
//!
//! # Reconnection
//!
//! The handler runs a 1 s health tick. If the connection is not in the
//! connected state when the tick fires, the client factory is invoked;
//! success moves to `Connected` and increments the reconnect counter,
//! failure moves to `Error` and increments the error counter. Request
//! failures never tear down the handle by themselves; the next tick
//! decides. This keeps transient faults from causing reconnect storms.
//! The handler task owns the reconnect path, so at most one attempt is in
//! flight per connection.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use kiln_config::MachineConfig;
use kiln_core::error::{EngineError, EngineResult};
use kiln_core::types::{ConnectionState, ConnectionStatus, MachineId, SymbolPath, SymbolValues, Value};

use crate::client::{ClientFactory, PlcClient};

/// Capacity of the internal request channel.
const REQUEST_QUEUE_CAPACITY: usize = 100;

/// Interval of the health tick that drives reconnection.
const HEALTH_TICK: Duration = Duration::from_secs(1);

// =============================================================================
// Internal request records
// =============================================================================

enum Op {
    Read(SymbolPath),
    ReadBatch(Vec<SymbolPath>),
    Write(SymbolPath, Value),
}

enum Reply {
    Value(Value),
    Values(SymbolValues),
    Done,
}

struct Request {
    op: Op,
    reply_tx: oneshot::Sender<EngineResult<Reply>>,
}

// =============================================================================
// PlcConnection
// =============================================================================

/// Handle to one PLC's connection handler task.
///
/// All public operations are safe to call concurrently; they are serialised
/// internally by the handler.
pub struct PlcConnection {
    machine_id: MachineId,
    request_tx: mpsc::Sender<Request>,
    status: Arc<RwLock<ConnectionStatus>>,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PlcConnection {
    /// Creates the connection and spawns its handler task.
    pub fn start(machine: MachineConfig, factory: Arc<dyn ClientFactory>) -> Arc<Self> {
        let machine_id = machine.id.clone();
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let status = Arc::new(RwLock::new(ConnectionStatus::new(machine_id.clone())));
        let shutdown = Arc::new(Notify::new());

        let handler = ConnectionHandler {
            machine,
            factory,
            client: None,
            state: ConnectionState::Disconnected,
            status: status.clone(),
            request_rx,
            shutdown: shutdown.clone(),
        };
        let handle = tokio::spawn(handler.run());

        Arc::new(Self {
            machine_id,
            request_tx,
            status,
            shutdown,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Returns the machine this connection serves.
    pub fn machine_id(&self) -> &MachineId {
        &self.machine_id
    }

    /// Reads one symbol.
    pub async fn read_symbol(&self, symbol: SymbolPath) -> EngineResult<Value> {
        match self.request(Op::Read(symbol)).await? {
            Reply::Value(v) => Ok(v),
            _ => Err(EngineError::transport("unexpected reply shape")),
        }
    }

    /// Reads a batch of symbols in one round-trip.
    pub async fn read_symbols(&self, symbols: Vec<SymbolPath>) -> EngineResult<SymbolValues> {
        match self.request(Op::ReadBatch(symbols)).await? {
            Reply::Values(v) => Ok(v),
            _ => Err(EngineError::transport("unexpected reply shape")),
        }
    }

    /// Writes one symbol.
    pub async fn write_symbol(&self, symbol: SymbolPath, value: Value) -> EngineResult<()> {
        match self.request(Op::Write(symbol, value)).await? {
            Reply::Done => Ok(()),
            _ => Err(EngineError::transport("unexpected reply shape")),
        }
    }

    /// Returns a snapshot of the connection's health counters.
    pub fn status(&self) -> ConnectionStatus {
        self.status.read().clone()
    }

    /// Signals the handler to stop and waits for it to acknowledge.
    ///
    /// Returns `false` if the handler did not acknowledge within `wait`;
    /// the task is then abandoned.
    pub async fn stop(&self, wait: Duration) -> bool {
        self.shutdown.notify_one();

        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => match tokio::time::timeout(wait, handle).await {
                Ok(_) => true,
                Err(_) => {
                    warn!(machine_id = %self.machine_id, "connection handler did not stop in time, abandoning");
                    false
                }
            },
            None => true,
        }
    }

    async fn request(&self, op: Op) -> EngineResult<Reply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(Request { op, reply_tx })
            .await
            .map_err(|_| EngineError::Stopping)?;

        reply_rx.await.map_err(|_| EngineError::Stopping)?
    }
}

// =============================================================================
// ConnectionHandler
// =============================================================================

/// The task that owns the client handle.
struct ConnectionHandler {
    machine: MachineConfig,
    factory: Arc<dyn ClientFactory>,
    client: Option<Box<dyn PlcClient>>,
    state: ConnectionState,
    status: Arc<RwLock<ConnectionStatus>>,
    request_rx: mpsc::Receiver<Request>,
    shutdown: Arc<Notify>,
}

impl ConnectionHandler {
    async fn run(mut self) {
        // Initial connection attempt before the first tick.
        self.check_connection().await;

        let mut tick = interval(HEALTH_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    break;
                }

                req = self.request_rx.recv() => {
                    match req {
                        Some(req) => self.process(req).await,
                        None => break,
                    }
                }

                _ = tick.tick() => {
                    self.check_connection().await;
                }
            }
        }

        self.teardown().await;
    }

    /// Invoked by the health tick; a no-op while connected.
    async fn check_connection(&mut self) {
        if self.state == ConnectionState::Connected {
            return;
        }

        self.state = ConnectionState::Connecting;
        match self.factory.connect(&self.machine).await {
            Ok(client) => {
                self.client = Some(client);
                self.state = ConnectionState::Connected;

                let mut status = self.status.write();
                status.connected = true;
                status.reconnect_count += 1;
                status.last_seen = Some(Utc::now());
                drop(status);

                info!(machine_id = %self.machine.id, "PLC connected");
            }
            Err(e) => {
                self.client = None;
                self.state = ConnectionState::Error;

                let mut status = self.status.write();
                status.connected = false;
                status.error_count += 1;
                drop(status);

                debug!(machine_id = %self.machine.id, error = %e, "PLC connection attempt failed");
            }
        }
    }

    async fn process(&mut self, req: Request) {
        // Requests are failed, not queued, while the link is down.
        let client = match (&self.state, self.client.as_mut()) {
            (ConnectionState::Connected, Some(client)) => client,
            _ => {
                let _ = req.reply_tx.send(Err(EngineError::NotConnected));
                return;
            }
        };

        let result = match req.op {
            Op::Read(symbol) => client.read_symbol(&symbol).await.map(Reply::Value),
            Op::ReadBatch(symbols) => client.read_symbols(&symbols).await.map(Reply::Values),
            Op::Write(symbol, value) => {
                client.write_symbol(&symbol, value).await.map(|_| Reply::Done)
            }
        };

        match &result {
            Ok(_) => {
                self.status.write().last_seen = Some(Utc::now());
            }
            Err(_) => {
                // Counted, but the handle survives; the next tick probes it.
                self.status.write().error_count += 1;
            }
        }

        let _ = req.reply_tx.send(result);
    }

    async fn teardown(mut self) {
        // Fail everything still queued, then release the handle.
        self.request_rx.close();
        while let Some(req) = self.request_rx.recv().await {
            let _ = req.reply_tx.send(Err(EngineError::NotConnected));
        }

        if let Some(mut client) = self.client.take() {
            if let Err(e) = client.close().await {
                warn!(machine_id = %self.machine.id, error = %e, "error closing PLC client");
            }
        }

        let mut status = self.status.write();
        status.connected = false;
        drop(status);

        debug!(machine_id = %self.machine.id, "connection handler stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimClientFactory;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

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

    /// Factory whose first `fail_first` attempts fail.
    struct FlakyFactory {
        attempts: AtomicU64,
        fail_first: u64,
    }

    #[async_trait]
    impl ClientFactory for FlakyFactory {
        async fn connect(&self, _machine: &MachineConfig) -> EngineResult<Box<dyn PlcClient>> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(EngineError::transport("simulated dial failure"))
            } else {
                Ok(Box::new(crate::sim::SimClient::new()))
            }
        }
    }

    #[tokio::test]
    async fn serves_requests_once_connected() {
        let conn = PlcConnection::start(machine("m1"), Arc::new(SimClientFactory));

        // The initial attempt runs before the first request is served.
        let value = conn.read_symbol(SymbolPath::new("GVL.x")).await.unwrap();
        assert!(matches!(value, Value::Float64(_)));

        let status = conn.status();
        assert!(status.connected);
        assert_eq!(status.reconnect_count, 1);
        assert!(status.last_seen.is_some());

        assert!(conn.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_dial_counts_and_later_tick_recovers() {
        let factory = Arc::new(FlakyFactory {
            attempts: AtomicU64::new(0),
            fail_first: 2,
        });
        let conn = PlcConnection::start(machine("m1"), factory);

        // Give the initial attempt a chance to run and fail.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let err = conn.read_symbol(SymbolPath::new("GVL.x")).await.unwrap_err();
        assert!(matches!(err, EngineError::NotConnected));

        // Two health ticks later the factory succeeds.
        tokio::time::sleep(Duration::from_millis(2100)).await;
        let status = conn.status();
        assert!(status.connected);
        assert_eq!(status.error_count, 2);
        assert_eq!(status.reconnect_count, 1);

        conn.read_symbol(SymbolPath::new("GVL.x")).await.unwrap();
        assert!(conn.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn requests_after_stop_fail() {
        let conn = PlcConnection::start(machine("m1"), Arc::new(SimClientFactory));
        conn.read_symbol(SymbolPath::new("GVL.x")).await.unwrap();
        assert!(conn.stop(Duration::from_secs(1)).await);

        let err = conn.read_symbol(SymbolPath::new("GVL.x")).await.unwrap_err();
        assert!(matches!(err, EngineError::Stopping));
    }
}
