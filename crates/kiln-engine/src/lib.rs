// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # kiln-engine
//!
//! The PLC I/O plane: everything that multiplexes many logical producers
//! and consumers onto the single physical fieldbus connection each PLC
//! supports.
//!
//! - **Connection**: per-PLC multiplexer and reconnection state machine
//! - **Engine**: connection registry and top-level read/write/status API
//! - **Writer**: prioritised asynchronous write-back with read-back
//!   verification
//! - **Poller**: per-chamber ticker issuing batched symbol reads
//! - **Client**: the transport trait and factory seam, plus a simulator
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kiln_engine::{Engine, SimClientFactory};
//!
//! let (engine, archive_rx) = Engine::new(Arc::new(SimClientFactory), 10_000);
//! engine.start(&machines).await?;
//! let status = engine.status();
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod connection;
pub mod engine;
pub mod poller;
pub mod sim;
pub mod writer;

pub use client::{ClientFactory, PlcClient};
pub use connection::PlcConnection;
pub use engine::Engine;
pub use poller::{ChamberPoller, PollerSet};
pub use sim::{SimClient, SimClientFactory};
pub use writer::{PrioritizedWriter, WriterMetrics};
