// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # kiln-core
//!
//! Shared types and the unified error hierarchy for the kiln telemetry
//! backbone.
//!
//! This crate provides the foundations used across all kiln components:
//!
//! - **Types**: `MachineId`, `ChamberId`, `SymbolPath`, `Value`, `PlcValue`,
//!   connection state and status
//! - **Messages**: broadcast and client frames for the stream hub
//! - **Write**: prioritised write-back requests with single-shot responses
//! - **Error**: the `KilnError` hierarchy
//!
//! ## Example
//!
//! ```rust
//! use kiln_core::types::{MachineId, PlcValue, SymbolPath, Value};
//!
//! let point = PlcValue::now(
//!     MachineId::new("etch-01"),
//!     SymbolPath::new("GVL.ch1.temperature"),
//!     Value::Float64(213.4),
//! );
//! assert!(point.quality == 100);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod message;
pub mod types;
pub mod write;

pub use error::{EngineError, EngineResult, ExportError, ExportResult, KilnError, StreamError};
pub use message::{BroadcastMsg, ClientMessage, MessageType};
pub use types::{
    ChamberId, ConnectionState, ConnectionStatus, MachineId, PlcType, PlcValue, SymbolPath,
    SymbolValues, Value,
};
pub use write::{WriteRequest, WriteResponse};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
