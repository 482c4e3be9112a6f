// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The fieldbus client seam.
//!
//! Each PLC accepts exactly one physical client connection, so the handle
//! returned by a [`ClientFactory`] is owned by a single connection handler
//! task and never touched by callers directly. Swapping the factory is the
//! sole mechanism for substituting a real transport with a simulated or
//! mocked one.

use async_trait::async_trait;

use kiln_config::MachineConfig;
use kiln_core::error::EngineResult;
use kiln_core::types::{SymbolPath, SymbolValues, Value};

// =============================================================================
// PlcClient
// =============================================================================

/// A live handle to one PLC.
///
/// Implementations do not need to be internally synchronised: the owning
/// connection handler serialises every operation onto the handle.
///
/// # Errors
///
/// Operations fail with [`EngineError::Transport`](kiln_core::EngineError)
/// when the underlying fieldbus call fails. A transport failure does not
/// invalidate the handle; the connection's health tick decides its fate.
#[async_trait]
pub trait PlcClient: Send {
    /// Reads one symbol.
    async fn read_symbol(&mut self, symbol: &SymbolPath) -> EngineResult<Value>;

    /// Reads a batch of symbols in one round-trip.
    async fn read_symbols(&mut self, symbols: &[SymbolPath]) -> EngineResult<SymbolValues>;

    /// Writes one symbol.
    async fn write_symbol(&mut self, symbol: &SymbolPath, value: Value) -> EngineResult<()>;

    /// Releases the connection.
    async fn close(&mut self) -> EngineResult<()>;
}

// =============================================================================
// ClientFactory
// =============================================================================

/// Creates [`PlcClient`] handles from machine configurations.
///
/// Invoked by a connection's health tick whenever the connection is not in
/// the connected state; at most one invocation is in flight per connection
/// at any time.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Dials the machine and returns a live client handle.
    async fn connect(&self, machine: &MachineConfig) -> EngineResult<Box<dyn PlcClient>>;
}
