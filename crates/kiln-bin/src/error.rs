// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Binary-level errors.

use thiserror::Error;

/// Errors surfaced by the host binary.
#[derive(Debug, Error)]
pub enum BinError {
    /// Configuration loading or validation failed.
    #[error("Configuration error: {0}")]
    Config(#[from] kiln_config::ConfigError),

    /// The engine could not be brought up.
    #[error("Engine error: {0}")]
    Engine(#[from] kiln_core::EngineError),

    /// A component failed to initialize.
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for binary operations.
pub type BinResult<T> = Result<T, BinError>;
