// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Wire messages exchanged between the pollers, the stream hub and
//! browser clients.
//!
//! Broadcast messages are `Clone`-able so one tick's payload can move
//! through the hub's channels without re-reading the PLC; the hub still
//! serialises each broadcast exactly once before fan-out.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChamberId, MachineId, SymbolPath, Value};

// =============================================================================
// Message Types
// =============================================================================

/// Discriminator shared by inbound and outbound frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Outbound: one chamber's batch of symbol values.
    Data,
    /// Inbound: add a (machine, chamber) pair to the subscription set.
    Subscribe,
    /// Inbound: remove a (machine, chamber) pair.
    Unsubscribe,
    /// Inbound: request historical data. Answered with `not_implemented`.
    History,
    /// Outbound: an error frame.
    Error,
}

// =============================================================================
// BroadcastMsg
// =============================================================================

/// The JSON packet published by a poller and delivered to matching clients.
///
/// One message carries every symbol of one chamber read in one batch; all
/// values share the batch timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMsg {
    /// Message kind.
    #[serde(rename = "type")]
    pub msg_type: MessageType,

    /// Originating machine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<MachineId>,

    /// Originating chamber.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chamber_id: Option<ChamberId>,

    /// Symbol values of this batch.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<SymbolPath, Value>,

    /// Batch timestamp.
    pub timestamp: DateTime<Utc>,

    /// Error description for `error` frames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BroadcastMsg {
    /// Creates a data broadcast for one chamber batch.
    pub fn data(
        machine_id: MachineId,
        chamber_id: ChamberId,
        data: HashMap<SymbolPath, Value>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            msg_type: MessageType::Data,
            machine_id: Some(machine_id),
            chamber_id: Some(chamber_id),
            data,
            timestamp,
            error: None,
        }
    }

    /// Creates an error frame addressed to a single client.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::Error,
            machine_id: None,
            chamber_id: None,
            data: HashMap::new(),
            timestamp: Utc::now(),
            error: Some(message.into()),
        }
    }
}

// =============================================================================
// ClientMessage
// =============================================================================

/// The JSON packet received from browser clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Message kind.
    #[serde(rename = "type")]
    pub msg_type: MessageType,

    /// Target machine for subscribe/unsubscribe/history.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<MachineId>,

    /// Target chamber. Absent or empty means "all chambers of the machine".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chamber_id: Option<ChamberId>,

    /// Symbol filter for history requests.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<SymbolPath>,

    /// Look-back window for history requests, e.g. `"15m"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn broadcast_wire_format() {
        let mut data = HashMap::new();
        data.insert(SymbolPath::new("GVL.temp"), Value::Float64(21.5));
        let msg = BroadcastMsg::data(
            MachineId::new("m1"),
            ChamberId::new("c1"),
            data,
            Utc::now(),
        );

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "data");
        assert_eq!(json["machine_id"], "m1");
        assert_eq!(json["chamber_id"], "c1");
        assert_eq!(json["data"]["GVL.temp"], 21.5);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn error_frame_omits_empty_fields() {
        let msg = BroadcastMsg::error("not_implemented");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"], "not_implemented");
        assert!(json.get("machine_id").is_none());
        assert!(json.get("data").is_none());
    }

    #[test]
    fn subscribe_message_parses() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","machine_id":"m1","chamber_id":"c2"}"#)
                .unwrap();
        assert_eq!(msg.msg_type, MessageType::Subscribe);
        assert_eq!(msg.machine_id, Some(MachineId::new("m1")));
        assert_eq!(msg.chamber_id, Some(ChamberId::new("c2")));
    }

    #[test]
    fn subscribe_without_chamber_means_all() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","machine_id":"m1"}"#).unwrap();
        assert_eq!(msg.chamber_id, None);
    }
}
