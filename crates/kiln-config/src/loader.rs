// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration file loading.
//!
//! The format is keyed on the file extension: `.yaml`/`.yml` parse as YAML,
//! `.toml` as TOML. The loaded configuration is validated before it is
//! returned.

use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::schema::KilnConfig;

/// Supported configuration formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML (`.yaml`, `.yml`).
    Yaml,
    /// TOML (`.toml`).
    Toml,
}

impl ConfigFormat {
    /// Derives the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Loads and validates a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<KilnConfig> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path)?;

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let config = parse_config(&content, format).map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })?;

    config.validate()?;
    Ok(config)
}

/// Parses configuration text in the given format, without validation.
pub fn parse_config(content: &str, format: ConfigFormat) -> Result<KilnConfig, String> {
    match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE_YAML: &str = r#"
machines:
  - id: etch-01
    name: Etcher 1
    host: 10.0.0.5
    node_id: 10.0.0.5.1.1
    chambers:
      - id: ch1
        name: Chamber 1
        symbols:
          - path: GVL.ch1.temperature
            data_type: float64
            unit: degC
          - path: GVL.ch1.valve_open
            data_type: bool
stream:
  port: 9001
"#;

    #[test]
    fn yaml_loads_and_validates() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(SAMPLE_YAML.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.machines.len(), 1);
        assert_eq!(config.machines[0].port, crate::schema::DEFAULT_PLC_PORT);
        assert_eq!(config.machines[0].chambers[0].symbols.len(), 2);
        assert_eq!(config.stream.port, 9001);
    }

    #[test]
    fn toml_loads() {
        let content = r#"
[[machines]]
id = "etch-01"
host = "10.0.0.5"
node_id = "10.0.0.5.1.1"

[[machines.chambers]]
id = "ch1"

[[machines.chambers.symbols]]
path = "GVL.ch1.temperature"
data_type = "float64"
"#;
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.machines[0].id.as_str(), "etch-01");
    }

    #[test]
    fn unknown_extension_rejected() {
        let err = ConfigFormat::from_path(Path::new("config.ini")).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
    }

    #[test]
    fn invalid_yaml_reports_parse_error() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(b"machines: {nope").unwrap();
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
