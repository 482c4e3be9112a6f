// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Archive records.
//!
//! Points are stored with single-letter field names to keep block payloads
//! small; the index uses full names because it occurs once per file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kiln_core::types::{ChamberId, MachineId, SymbolPath, Value};

/// One archived data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Acquisition timestamp.
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,

    /// Source machine.
    #[serde(rename = "m")]
    pub machine: MachineId,

    /// Source chamber.
    #[serde(rename = "c")]
    pub chamber: ChamberId,

    /// Symbol path.
    #[serde(rename = "s")]
    pub symbol: SymbolPath,

    /// The recorded value.
    #[serde(rename = "v")]
    pub value: Value,
}

/// Index entry describing one block of the archive file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockIndex {
    /// File offset of the block's length prefix.
    pub offset: u64,

    /// Encoded length of the block including the 4-byte length prefix.
    pub length: u64,

    /// Number of points in the block.
    pub point_count: usize,

    /// Timestamp of the first point.
    pub start_time: DateTime<Utc>,

    /// Timestamp of the last point.
    pub end_time: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_uses_abbreviated_keys() {
        let point = Point {
            timestamp: Utc::now(),
            machine: MachineId::new("m1"),
            chamber: ChamberId::new("c1"),
            symbol: SymbolPath::new("GVL.temp"),
            value: Value::Float64(21.5),
        };

        let json = serde_json::to_value(&point).unwrap();
        assert_eq!(json["m"], "m1");
        assert_eq!(json["c"], "c1");
        assert_eq!(json["s"], "GVL.temp");
        assert_eq!(json["v"], 21.5);
        assert!(json.get("machine").is_none());
    }

    #[test]
    fn point_roundtrips() {
        let point = Point {
            timestamp: Utc::now(),
            machine: MachineId::new("m1"),
            chamber: ChamberId::new("c1"),
            symbol: SymbolPath::new("GVL.count"),
            value: Value::Int64(7),
        };

        let json = serde_json::to_string(&point).unwrap();
        let back: Point = serde_json::from_str(&json).unwrap();
        assert_eq!(back, point);
    }
}
