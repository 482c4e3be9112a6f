// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Unified error hierarchy for kiln.
//!
//! # Error Hierarchy
//!
//! ```text
//! KilnError (root)
//! ├── EngineError   - PLC I/O plane (connections, reads, writes)
//! ├── StreamError   - WebSocket hub operations
//! └── ExportError   - Archive file encoding/decoding
//! ```
//!
//! Errors distinguish retryable conditions (transient transport faults,
//! saturated queues) from programmer errors and corrupt inputs, so callers
//! can back off where it helps and fail fast where it does not.

use std::time::Duration;

use thiserror::Error;

use crate::types::MachineId;

// =============================================================================
// KilnError - Root Error Type
// =============================================================================

/// The root error type for kiln.
#[derive(Debug, Error)]
pub enum KilnError {
    /// PLC I/O plane error.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Stream hub error.
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Archive codec error.
    #[error("Export error: {0}")]
    Export(#[from] ExportError),
}

impl KilnError {
    /// Returns `true` if a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            KilnError::Engine(e) => e.is_retryable(),
            KilnError::Stream(_) => false,
            KilnError::Export(_) => false,
        }
    }

    /// Returns the error category for logging and metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            KilnError::Engine(_) => "engine",
            KilnError::Stream(_) => "stream",
            KilnError::Export(_) => "export",
        }
    }
}

// =============================================================================
// EngineError
// =============================================================================

/// Errors from the PLC I/O plane.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The targeted connection was not in the connected state at dispatch.
    ///
    /// The request is not queued for retry; callers may retry once the
    /// background reconnect loop has restored the link.
    #[error("PLC connection not established")]
    NotConnected,

    /// The engine has no connection registered under this machine id.
    #[error("machine {machine_id} not found")]
    UnknownMachine {
        /// The unrecognised id.
        machine_id: MachineId,
    },

    /// A connection already exists for this machine id.
    #[error("machine {machine_id} is already registered")]
    AlreadyRegistered {
        /// The duplicated id.
        machine_id: MachineId,
    },

    /// The writer's priority queue refused the submission.
    #[error("priority queue '{queue}' is full")]
    QueueFull {
        /// Name of the saturated queue (`high`, `medium`, `low`).
        queue: &'static str,
    },

    /// A write did not complete (including verification) within its budget.
    ///
    /// The write may still have taken effect on the device.
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    /// The underlying fieldbus call failed.
    ///
    /// Counted on the owning connection; never tears the connection down.
    #[error("transport error: {0}")]
    Transport(String),

    /// The component is shutting down and can no longer accept work.
    #[error("engine is stopping")]
    Stopping,
}

impl EngineError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        EngineError::Transport(message.into())
    }

    /// Creates an unknown-machine error.
    pub fn unknown_machine(machine_id: impl Into<MachineId>) -> Self {
        EngineError::UnknownMachine {
            machine_id: machine_id.into(),
        }
    }

    /// Returns `true` if a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::NotConnected
                | EngineError::QueueFull { .. }
                | EngineError::Timeout(_)
                | EngineError::Transport(_)
        )
    }

    /// Returns the error category for logging and metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            EngineError::NotConnected => "not_connected",
            EngineError::UnknownMachine { .. } => "unknown_machine",
            EngineError::AlreadyRegistered { .. } => "already_registered",
            EngineError::QueueFull { .. } => "queue_full",
            EngineError::Timeout(_) => "timeout",
            EngineError::Transport(_) => "transport",
            EngineError::Stopping => "stopping",
        }
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

// =============================================================================
// StreamError
// =============================================================================

/// Errors from the stream hub.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The hub loop is no longer running.
    #[error("stream hub is not running")]
    HubClosed,

    /// An inbound frame could not be parsed as a client message.
    #[error("invalid client message: {0}")]
    InvalidMessage(String),
}

/// Result alias for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

// =============================================================================
// ExportError
// =============================================================================

/// Errors from the archive codec.
///
/// All variants are fatal to the reader or writer that produced them.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The file does not start with a recognised magic header.
    #[error("bad archive format: {0}")]
    BadFormat(String),

    /// The trailing block index is missing or unparsable.
    #[error("bad archive index: {0}")]
    BadIndex(String),

    /// A block body did not decode to a valid point array.
    #[error("bad archive block {block}: {message}")]
    BadBlock {
        /// Zero-based block number.
        block: usize,
        /// What failed while decoding it.
        message: String,
    },

    /// Underlying file I/O failure.
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExportError {
    /// Creates a bad-format error.
    pub fn bad_format(message: impl Into<String>) -> Self {
        ExportError::BadFormat(message.into())
    }

    /// Creates a bad-index error.
    pub fn bad_index(message: impl Into<String>) -> Self {
        ExportError::BadIndex(message.into())
    }

    /// Creates a bad-block error.
    pub fn bad_block(block: usize, message: impl Into<String>) -> Self {
        ExportError::BadBlock {
            block,
            message: message.into(),
        }
    }
}

/// Result alias for archive operations.
pub type ExportResult<T> = Result<T, ExportError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability() {
        assert!(EngineError::NotConnected.is_retryable());
        assert!(EngineError::transport("boom").is_retryable());
        assert!(EngineError::QueueFull { queue: "high" }.is_retryable());
        assert!(!EngineError::unknown_machine("m9").is_retryable());

        let root: KilnError = EngineError::NotConnected.into();
        assert!(root.is_retryable());
        assert_eq!(root.error_type(), "engine");
    }

    #[test]
    fn messages_name_the_machine() {
        let err = EngineError::unknown_machine("etch-07");
        assert!(err.to_string().contains("etch-07"));
    }

    #[test]
    fn export_errors_are_fatal() {
        let root: KilnError = ExportError::bad_format("no magic").into();
        assert!(!root.is_retryable());
        assert_eq!(root.error_type(), "export");
    }
}
