// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Shared configuration fixtures.

use kiln_config::{ChamberConfig, MachineConfig, SymbolConfig};
use kiln_core::types::{ChamberId, MachineId, PlcType, SymbolPath};

/// A machine with no chambers, for engine-only tests.
pub fn bare_machine(id: &str) -> MachineConfig {
    MachineConfig {
        id: MachineId::new(id),
        name: format!("Machine {}", id),
        host: "127.0.0.1".to_string(),
        node_id: "127.0.0.1.1.1".to_string(),
        port: 851,
        chambers: Vec::new(),
    }
}

/// A machine with one chamber polling the given symbol paths.
pub fn machine_with_chamber(id: &str, chamber: &str, symbols: &[&str]) -> MachineConfig {
    let mut machine = bare_machine(id);
    machine.chambers.push(ChamberConfig {
        id: ChamberId::new(chamber),
        name: format!("Chamber {}", chamber),
        symbols: symbols
            .iter()
            .map(|path| SymbolConfig {
                path: SymbolPath::new(*path),
                data_type: PlcType::Float64,
                unit: None,
            })
            .collect(),
    });
    machine
}
