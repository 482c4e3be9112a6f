// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema for kiln.
//!
//! # Schema Structure
//!
//! ```text
//! KilnConfig
//! ├── machines: Vec<MachineConfig>
//! │   └── chambers: Vec<ChamberConfig>
//! │       └── symbols: Vec<SymbolConfig>
//! ├── stream: StreamConfig
//! ├── archive: ArchiveConfig
//! └── logging: LoggingConfig
//! ```
//!
//! Machine configurations are immutable for the lifetime of a connection;
//! re-configuration requires a full engine stop and restart.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use kiln_core::types::{ChamberId, MachineId, PlcType, SymbolPath};

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// Constants
// =============================================================================

/// Default fieldbus port.
pub const DEFAULT_PLC_PORT: u16 = 851;

/// Default WebSocket bind port.
pub const DEFAULT_STREAM_PORT: u16 = 8090;

/// Default capacity of the archive egress channel.
pub const DEFAULT_ARCHIVE_CAPACITY: usize = 10_000;

// =============================================================================
// Top-Level Configuration
// =============================================================================

/// The root configuration for a kiln instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KilnConfig {
    /// Machines to poll.
    #[serde(default)]
    pub machines: Vec<MachineConfig>,

    /// Stream hub settings.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Archive egress settings.
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl KilnConfig {
    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut machine_ids = HashSet::new();
        for machine in &self.machines {
            if !machine_ids.insert(machine.id.as_str()) {
                return Err(ConfigError::DuplicateMachineId {
                    machine_id: machine.id.to_string(),
                });
            }
            machine.validate()?;
        }

        self.stream.validate()?;
        self.archive.validate()?;
        Ok(())
    }

    /// Returns the machine configuration for an id, if present.
    pub fn machine(&self, machine_id: &MachineId) -> Option<&MachineConfig> {
        self.machines.iter().find(|m| &m.id == machine_id)
    }
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            machines: Vec::new(),
            stream: StreamConfig::default(),
            archive: ArchiveConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// =============================================================================
// Machines
// =============================================================================

/// One PLC-driven machine and the chambers it exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineConfig {
    /// Stable machine id.
    pub id: MachineId,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Network address of the PLC.
    pub host: String,

    /// Fieldbus node identifier (e.g. an AMS Net ID).
    pub node_id: String,

    /// Fieldbus port.
    #[serde(default = "default_plc_port")]
    pub port: u16,

    /// Ordered chamber list.
    #[serde(default)]
    pub chambers: Vec<ChamberConfig>,
}

impl MachineConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.id.as_str().is_empty() {
            return Err(ConfigError::validation("machines.id", "must not be empty"));
        }
        if self.host.is_empty() {
            return Err(ConfigError::validation(
                format!("machines.{}.host", self.id),
                "must not be empty",
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::validation(
                format!("machines.{}.port", self.id),
                "must be non-zero",
            ));
        }

        let mut chamber_ids = HashSet::new();
        for chamber in &self.chambers {
            if !chamber_ids.insert(chamber.id.as_str()) {
                return Err(ConfigError::validation(
                    format!("machines.{}.chambers", self.id),
                    format!("duplicate chamber id '{}'", chamber.id),
                ));
            }
            chamber.validate(&self.id)?;
        }
        Ok(())
    }
}

fn default_plc_port() -> u16 {
    DEFAULT_PLC_PORT
}

/// A chamber: one physical sub-unit of the machine and its symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChamberConfig {
    /// Stable chamber id, unique within the machine.
    pub id: ChamberId,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Ordered symbol list polled each tick.
    #[serde(default)]
    pub symbols: Vec<SymbolConfig>,
}

impl ChamberConfig {
    fn validate(&self, machine_id: &MachineId) -> ConfigResult<()> {
        if self.symbols.is_empty() {
            return Err(ConfigError::validation(
                format!("machines.{}.chambers.{}.symbols", machine_id, self.id),
                "chamber has no symbols to poll",
            ));
        }

        let mut paths = HashSet::new();
        for symbol in &self.symbols {
            if symbol.path.as_str().is_empty() {
                return Err(ConfigError::validation(
                    format!("machines.{}.chambers.{}.symbols", machine_id, self.id),
                    "symbol path must not be empty",
                ));
            }
            if !paths.insert(symbol.path.as_str()) {
                return Err(ConfigError::validation(
                    format!("machines.{}.chambers.{}.symbols", machine_id, self.id),
                    format!("duplicate symbol path '{}'", symbol.path),
                ));
            }
        }
        Ok(())
    }

    /// Returns the symbol paths of this chamber in declaration order.
    pub fn symbol_paths(&self) -> Vec<SymbolPath> {
        self.symbols.iter().map(|s| s.path.clone()).collect()
    }
}

/// One polled symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SymbolConfig {
    /// Full path within the PLC address space.
    pub path: SymbolPath,

    /// Declared data type.
    pub data_type: PlcType,

    /// Engineering unit, e.g. `"degC"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

// =============================================================================
// Stream / Archive / Logging
// =============================================================================

/// WebSocket stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    /// Bind address for the WebSocket endpoint.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Bind port.
    #[serde(default = "default_stream_port")]
    pub port: u16,
}

impl StreamConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.port == 0 {
            return Err(ConfigError::validation("stream.port", "must be non-zero"));
        }
        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_stream_port(),
        }
    }
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_stream_port() -> u16 {
    DEFAULT_STREAM_PORT
}

/// Archive egress settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    /// Capacity of the bounded channel feeding the downstream producer.
    #[serde(default = "default_archive_capacity")]
    pub channel_capacity: usize,

    /// Compress export files with zstd.
    #[serde(default = "default_true")]
    pub compression: bool,
}

impl ArchiveConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::validation(
                "archive.channel_capacity",
                "must be non-zero",
            ));
        }
        Ok(())
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_archive_capacity(),
            compression: true,
        }
    }
}

fn default_archive_capacity() -> usize {
    DEFAULT_ARCHIVE_CAPACITY
}

fn default_true() -> bool {
    true
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default log level directive.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_machine(id: &str) -> MachineConfig {
        MachineConfig {
            id: MachineId::new(id),
            name: "Etcher".to_string(),
            host: "10.0.0.5".to_string(),
            node_id: "10.0.0.5.1.1".to_string(),
            port: DEFAULT_PLC_PORT,
            chambers: vec![ChamberConfig {
                id: ChamberId::new("ch1"),
                name: "Chamber 1".to_string(),
                symbols: vec![SymbolConfig {
                    path: SymbolPath::new("GVL.ch1.temperature"),
                    data_type: PlcType::Float64,
                    unit: Some("degC".to_string()),
                }],
            }],
        }
    }

    #[test]
    fn valid_config_passes() {
        let config = KilnConfig {
            machines: vec![sample_machine("m1"), sample_machine("m2")],
            ..KilnConfig::default()
        };
        config.validate().unwrap();
        assert!(config.machine(&MachineId::new("m2")).is_some());
        assert!(config.machine(&MachineId::new("m3")).is_none());
    }

    #[test]
    fn duplicate_machine_ids_rejected() {
        let config = KilnConfig {
            machines: vec![sample_machine("m1"), sample_machine("m1")],
            ..KilnConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateMachineId { .. })
        ));
    }

    #[test]
    fn empty_chamber_rejected() {
        let mut machine = sample_machine("m1");
        machine.chambers[0].symbols.clear();
        let config = KilnConfig {
            machines: vec![machine],
            ..KilnConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_symbol_paths_rejected() {
        let mut machine = sample_machine("m1");
        let dup = machine.chambers[0].symbols[0].clone();
        machine.chambers[0].symbols.push(dup);
        let config = KilnConfig {
            machines: vec![machine],
            ..KilnConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn defaults_are_sane() {
        let config = KilnConfig::default();
        config.validate().unwrap();
        assert_eq!(config.stream.port, DEFAULT_STREAM_PORT);
        assert_eq!(config.archive.channel_capacity, DEFAULT_ARCHIVE_CAPACITY);
        assert!(config.archive.compression);
    }
}
