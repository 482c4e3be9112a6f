// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # kiln-config
//!
//! Configuration schema, validation and file loading for kiln.
//!
//! Machines, chambers and symbols are declared once and handed to the
//! engine at start; changing them requires a full stop and restart.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, parse_config, ConfigFormat};
pub use schema::{
    ArchiveConfig, ChamberConfig, KilnConfig, LoggingConfig, MachineConfig, StreamConfig,
    SymbolConfig,
};
