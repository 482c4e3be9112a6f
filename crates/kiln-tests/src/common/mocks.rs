// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Mock fieldbus client for testing the I/O plane in isolation.
//!
//! The mock's behavior lives in a shared [`MockPlcState`] handle, so tests
//! keep control of values, error injection and the execution gate while
//! the connection handler owns the client itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use kiln_config::MachineConfig;
use kiln_core::error::{EngineError, EngineResult};
use kiln_core::types::{SymbolPath, SymbolValues, Value};
use kiln_engine::{ClientFactory, PlcClient};

/// Shared, test-controlled behavior of mock clients.
pub struct MockPlcState {
    /// Symbol store; writes land here and reads serve from it.
    values: Mutex<HashMap<SymbolPath, Value>>,

    /// When set, every single-symbol read returns this instead.
    readback_override: Mutex<Option<Value>>,

    /// Every write in arrival order.
    write_history: Mutex<Vec<(SymbolPath, Value)>>,

    /// Fail every Nth batch read (0 disables).
    fail_batch_every: AtomicU64,
    batch_count: AtomicU64,

    /// Fail all connection attempts.
    fail_connect: AtomicBool,

    /// While enabled, writes block on the gate semaphore.
    gate_enabled: AtomicBool,
    gate: Semaphore,

    read_count: AtomicU64,
    write_count: AtomicU64,
    connect_count: AtomicU64,
}

impl MockPlcState {
    /// Creates default state: every read yields `42.0`, nothing fails.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            values: Mutex::new(HashMap::new()),
            readback_override: Mutex::new(None),
            write_history: Mutex::new(Vec::new()),
            fail_batch_every: AtomicU64::new(0),
            batch_count: AtomicU64::new(0),
            fail_connect: AtomicBool::new(false),
            gate_enabled: AtomicBool::new(false),
            gate: Semaphore::new(0),
            read_count: AtomicU64::new(0),
            write_count: AtomicU64::new(0),
            connect_count: AtomicU64::new(0),
        })
    }

    /// Sets a stored value.
    pub fn set_value(&self, symbol: SymbolPath, value: Value) {
        self.values.lock().insert(symbol, value);
    }

    /// Forces every single-symbol read to return `value`.
    pub fn set_readback_override(&self, value: Value) {
        *self.readback_override.lock() = Some(value);
    }

    /// Makes every `n`-th batch read fail with a transport error.
    pub fn fail_batch_every(&self, n: u64) {
        self.fail_batch_every.store(n, Ordering::SeqCst);
    }

    /// Makes connection attempts fail (or succeed again).
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Closes the write gate: subsequent writes block until released.
    pub fn close_gate(&self) {
        self.gate_enabled.store(true, Ordering::SeqCst);
    }

    /// Releases the gate for up to `permits` gated writes.
    pub fn open_gate(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    /// Writes observed so far, in order.
    pub fn write_history(&self) -> Vec<(SymbolPath, Value)> {
        self.write_history.lock().clone()
    }

    /// `(reads, writes, connects)` counters.
    pub fn counters(&self) -> (u64, u64, u64) {
        (
            self.read_count.load(Ordering::SeqCst),
            self.write_count.load(Ordering::SeqCst),
            self.connect_count.load(Ordering::SeqCst),
        )
    }

    fn value_for(&self, symbol: &SymbolPath) -> Value {
        self.values
            .lock()
            .get(symbol)
            .cloned()
            .unwrap_or(Value::Float64(42.0))
    }
}

/// A mock client handle; all behavior delegates to the shared state.
pub struct MockPlcClient {
    state: Arc<MockPlcState>,
}

#[async_trait]
impl PlcClient for MockPlcClient {
    async fn read_symbol(&mut self, symbol: &SymbolPath) -> EngineResult<Value> {
        self.state.read_count.fetch_add(1, Ordering::SeqCst);

        if let Some(v) = self.state.readback_override.lock().clone() {
            return Ok(v);
        }
        Ok(self.state.value_for(symbol))
    }

    async fn read_symbols(&mut self, symbols: &[SymbolPath]) -> EngineResult<SymbolValues> {
        self.state.read_count.fetch_add(1, Ordering::SeqCst);
        let n = self.state.batch_count.fetch_add(1, Ordering::SeqCst) + 1;

        let every = self.state.fail_batch_every.load(Ordering::SeqCst);
        if every > 0 && n % every == 0 {
            return Err(EngineError::transport("injected batch failure"));
        }

        Ok(symbols
            .iter()
            .map(|s| (s.clone(), self.state.value_for(s)))
            .collect())
    }

    async fn write_symbol(&mut self, symbol: &SymbolPath, value: Value) -> EngineResult<()> {
        if self.state.gate_enabled.load(Ordering::SeqCst) {
            let permit = self
                .state
                .gate
                .acquire()
                .await
                .map_err(|_| EngineError::transport("gate closed"))?;
            permit.forget();
        }

        self.state.write_count.fetch_add(1, Ordering::SeqCst);
        self.state
            .write_history
            .lock()
            .push((symbol.clone(), value.clone()));
        self.state.values.lock().insert(symbol.clone(), value);
        Ok(())
    }

    async fn close(&mut self) -> EngineResult<()> {
        Ok(())
    }
}

/// Factory handing out clients bound to one shared [`MockPlcState`].
pub struct MockClientFactory {
    state: Arc<MockPlcState>,
}

impl MockClientFactory {
    /// Creates a factory over the given state handle.
    pub fn new(state: Arc<MockPlcState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ClientFactory for MockClientFactory {
    async fn connect(&self, _machine: &MachineConfig) -> EngineResult<Box<dyn PlcClient>> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(EngineError::transport("injected connect failure"));
        }

        self.state.connect_count.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockPlcClient {
            state: self.state.clone(),
        }))
    }
}
