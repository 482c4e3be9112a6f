// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Ring buffer of recently broadcast messages.
//!
//! The hub records every fanned-out broadcast here so that diagnostic
//! surfaces can show the last moments of a chamber without touching the
//! time-series store.

use kiln_core::message::BroadcastMsg;
use kiln_core::types::{ChamberId, MachineId};

/// Fixed-capacity ring of recent broadcasts; new messages evict the oldest.
pub struct RingBuffer {
    data: Vec<Option<BroadcastMsg>>,
    head: usize,
    count: usize,
}

impl RingBuffer {
    /// Creates a ring holding up to `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: (0..capacity).map(|_| None).collect(),
            head: 0,
            count: 0,
        }
    }

    /// Appends a message, evicting the oldest when full.
    pub fn push(&mut self, msg: BroadcastMsg) {
        self.data[self.head] = Some(msg);
        self.head = (self.head + 1) % self.data.len();
        if self.count < self.data.len() {
            self.count += 1;
        }
    }

    /// Number of messages currently held.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns `true` if no message has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the held messages for one chamber, oldest first.
    pub fn recent(&self, machine_id: &MachineId, chamber_id: &ChamberId) -> Vec<BroadcastMsg> {
        let capacity = self.data.len();
        let start = (self.head + capacity - self.count) % capacity;

        let mut result = Vec::new();
        for i in 0..self.count {
            let idx = (start + i) % capacity;
            if let Some(msg) = &self.data[idx] {
                if msg.machine_id.as_ref() == Some(machine_id)
                    && msg.chamber_id.as_ref() == Some(chamber_id)
                {
                    result.push(msg.clone());
                }
            }
        }
        result
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn msg(machine: &str, chamber: &str) -> BroadcastMsg {
        BroadcastMsg::data(
            MachineId::new(machine),
            ChamberId::new(chamber),
            HashMap::new(),
            Utc::now(),
        )
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut ring = RingBuffer::new(3);
        for _ in 0..5 {
            ring.push(msg("m1", "c1"));
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.recent(&MachineId::new("m1"), &ChamberId::new("c1")).len(), 3);
    }

    #[test]
    fn filters_by_machine_and_chamber() {
        let mut ring = RingBuffer::new(8);
        ring.push(msg("m1", "c1"));
        ring.push(msg("m1", "c2"));
        ring.push(msg("m2", "c1"));
        ring.push(msg("m1", "c1"));

        let hits = ring.recent(&MachineId::new("m1"), &ChamberId::new("c1"));
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn empty_ring_returns_nothing() {
        let ring = RingBuffer::new(4);
        assert!(ring.is_empty());
        assert!(ring.recent(&MachineId::new("m1"), &ChamberId::new("c1")).is_empty());
    }
}
