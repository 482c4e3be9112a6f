// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Simulated fieldbus client.
//!
//! Fabricates plausible per-symbol waveforms so the full pipeline can run
//! without a PLC on the network. Written values are stored and read back,
//! which makes write verification behave exactly as against real hardware.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use kiln_config::MachineConfig;
use kiln_core::error::EngineResult;
use kiln_core::types::{SymbolPath, SymbolValues, Value};

use crate::client::{ClientFactory, PlcClient};

// =============================================================================
// SimClient
// =============================================================================

/// An in-process PLC that generates a deterministic waveform per symbol.
pub struct SimClient {
    written: HashMap<SymbolPath, Value>,
    tick: u64,
}

impl SimClient {
    /// Creates a fresh simulated client.
    pub fn new() -> Self {
        Self {
            written: HashMap::new(),
            tick: 0,
        }
    }

    /// The generated value for a symbol: a slow triangle wave whose phase
    /// is derived from the symbol path, so different symbols stay
    /// distinguishable in a live view.
    fn generate(&self, symbol: &SymbolPath) -> Value {
        let mut hasher = DefaultHasher::new();
        symbol.as_str().hash(&mut hasher);
        let phase = hasher.finish() % 1000;

        let step = (self.tick + phase) % 200;
        let ramp = if step < 100 { step } else { 200 - step };
        Value::Float64(ramp as f64)
    }

    fn value_for(&self, symbol: &SymbolPath) -> Value {
        match self.written.get(symbol) {
            Some(v) => v.clone(),
            None => self.generate(symbol),
        }
    }
}

impl Default for SimClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlcClient for SimClient {
    async fn read_symbol(&mut self, symbol: &SymbolPath) -> EngineResult<Value> {
        self.tick += 1;
        Ok(self.value_for(symbol))
    }

    async fn read_symbols(&mut self, symbols: &[SymbolPath]) -> EngineResult<SymbolValues> {
        self.tick += 1;
        Ok(symbols
            .iter()
            .map(|s| (s.clone(), self.value_for(s)))
            .collect())
    }

    async fn write_symbol(&mut self, symbol: &SymbolPath, value: Value) -> EngineResult<()> {
        self.written.insert(symbol.clone(), value);
        Ok(())
    }

    async fn close(&mut self) -> EngineResult<()> {
        Ok(())
    }
}

// =============================================================================
// SimClientFactory
// =============================================================================

/// Factory producing [`SimClient`]s; every connect succeeds immediately.
#[derive(Debug, Default)]
pub struct SimClientFactory;

#[async_trait]
impl ClientFactory for SimClientFactory {
    async fn connect(&self, _machine: &MachineConfig) -> EngineResult<Box<dyn PlcClient>> {
        Ok(Box::new(SimClient::new()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_are_deterministic_per_symbol() {
        let mut client = SimClient::new();
        let a = SymbolPath::new("GVL.a");
        let b = SymbolPath::new("GVL.b");

        let values = client.read_symbols(&[a.clone(), b.clone()]).await.unwrap();
        assert_eq!(values.len(), 2);
        assert!(matches!(values[&a], Value::Float64(_)));
    }

    #[tokio::test]
    async fn written_values_read_back() {
        let mut client = SimClient::new();
        let sym = SymbolPath::new("GVL.setpoint");

        client
            .write_symbol(&sym, Value::Int64(42))
            .await
            .unwrap();
        assert_eq!(client.read_symbol(&sym).await.unwrap(), Value::Int64(42));
    }
}
