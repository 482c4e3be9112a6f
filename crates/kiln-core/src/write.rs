// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Write-back requests and their single-shot responses.
//!
//! A [`WriteRequest`] is consumed exactly once by the prioritised writer,
//! and its [`response_tx`](WriteRequest::response_tx) sink receives exactly
//! one [`WriteResponse`], either from execution or from a
//! submission-failure path. The sink is a `oneshot` channel, so delivering
//! a response can never block the writer, even when the caller has long
//! since given up waiting.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::types::{MachineId, SymbolPath, Value};

// =============================================================================
// WriteRequest
// =============================================================================

/// An asynchronous request to change one PLC symbol.
#[derive(Debug)]
pub struct WriteRequest {
    /// Unique request id.
    pub id: Uuid,

    /// Target machine.
    pub machine_id: MachineId,

    /// Target symbol.
    pub symbol: SymbolPath,

    /// Value to write.
    pub value: Value,

    /// Priority in `[0, 10]`; 10 is most urgent.
    pub priority: u8,

    /// Verify the write by reading the symbol back after one PLC cycle.
    pub require_ack: bool,

    /// Budget for the write including verification.
    pub timeout: Duration,

    /// Single-shot response sink.
    pub response_tx: oneshot::Sender<WriteResponse>,

    /// When the request was created, for expiry accounting.
    pub created_at: Instant,
}

impl WriteRequest {
    /// Creates a new request, returning it together with the receiving half
    /// of its response sink.
    pub fn new(
        machine_id: MachineId,
        symbol: SymbolPath,
        value: Value,
        priority: u8,
        require_ack: bool,
        timeout: Duration,
    ) -> (Self, oneshot::Receiver<WriteResponse>) {
        let (tx, rx) = oneshot::channel();
        let req = Self {
            id: Uuid::new_v4(),
            machine_id,
            symbol,
            value,
            priority: priority.min(10),
            require_ack,
            timeout,
            response_tx: tx,
            created_at: Instant::now(),
        };
        (req, rx)
    }

    /// Returns `true` if the request has outlived its budget.
    pub fn is_timed_out(&self) -> bool {
        self.created_at.elapsed() > self.timeout
    }

    /// Returns the remaining budget, or `None` when already expired.
    pub fn remaining_time(&self) -> Option<Duration> {
        let elapsed = self.created_at.elapsed();
        if elapsed >= self.timeout {
            None
        } else {
            Some(self.timeout - elapsed)
        }
    }
}

// =============================================================================
// WriteResponse
// =============================================================================

/// The outcome of a write request. Emitted at most once per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteResponse {
    /// The request this response answers.
    pub id: Uuid,

    /// Whether the write (and verification, if requested) succeeded.
    pub success: bool,

    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the response was produced.
    pub timestamp: DateTime<Utc>,
}

impl WriteResponse {
    /// Creates a success response.
    pub fn success(id: Uuid) -> Self {
        Self {
            id,
            success: true,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates a failure response.
    pub fn failure(id: Uuid, error: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn request(priority: u8, timeout: Duration) -> (WriteRequest, oneshot::Receiver<WriteResponse>) {
        WriteRequest::new(
            MachineId::new("m1"),
            SymbolPath::new("GVL.setpoint"),
            Value::Int64(42),
            priority,
            false,
            timeout,
        )
    }

    #[test]
    fn priority_is_clamped() {
        let (req, _rx) = request(200, Duration::from_secs(1));
        assert_eq!(req.priority, 10);
    }

    #[test]
    fn remaining_time_counts_down() {
        let (req, _rx) = request(5, Duration::from_secs(60));
        assert!(!req.is_timed_out());
        assert!(req.remaining_time().unwrap() <= Duration::from_secs(60));

        let (req, _rx) = request(5, Duration::ZERO);
        assert!(req.is_timed_out());
        assert_eq!(req.remaining_time(), None);
    }

    #[tokio::test]
    async fn response_sink_is_single_shot() {
        let (req, rx) = request(5, Duration::from_secs(1));
        let id = req.id;
        req.response_tx.send(WriteResponse::success(id)).unwrap();

        let resp = rx.await.unwrap();
        assert_eq!(resp.id, id);
        assert!(resp.success);
    }

    #[test]
    fn dropped_receiver_does_not_block_sender() {
        let (req, rx) = request(5, Duration::from_secs(1));
        drop(rx);
        // The send fails but returns immediately.
        assert!(req.response_tx.send(WriteResponse::success(Uuid::new_v4())).is_err());
    }
}
