//! # Fleet Configuration
//!
//! Configuration management for the fleet engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Explicit path passed by the caller (e.g. fleetd --config)          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tagnet/fleet.toml (Linux)                                │
//! │     ~/Library/Application Support/com.tagnet.tagnet/fleet.toml (macOS) │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     0.0.0.0:5000, stock timeouts, CSVs in the working directory        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # fleet.toml
//! [server]
//! bind_addr = "0.0.0.0"
//! port = 5000
//!
//! [timeouts]
//! poll_ms = 2000     # broadcast poll collection window
//! ack_ms = 3000      # SET → ACK wait
//! uid_ms = 10000     # READUID → UID wait (a human has to present a tag)
//!
//! [storage]
//! movements_csv = "movimientos.csv"
//! sales_csv = "ventas.csv"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{FleetError, FleetResult};

// =============================================================================
// Server Settings
// =============================================================================

/// Default TCP port the devices' firmware is flashed with.
pub const DEFAULT_PORT: u16 = 5000;

/// Listening socket settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address (default: 0.0.0.0).
    pub bind_addr: String,

    /// TCP port (default: 5000). Port 0 asks the OS for an ephemeral port,
    /// which the tests rely on.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerSettings {
    /// Returns the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// Timeout Settings
// =============================================================================

/// Correlation wait budgets, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Broadcast poll collection window.
    pub poll_ms: u64,

    /// `SET` → matching `ACK` wait.
    pub ack_ms: u64,

    /// `READUID` → `UID` wait. Long: a human has to walk over and present
    /// a physical tag to the reader.
    pub uid_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        TimeoutSettings {
            poll_ms: 2_000,
            ack_ms: 3_000,
            uid_ms: 10_000,
        }
    }
}

impl TimeoutSettings {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_ms)
    }

    pub fn uid_timeout(&self) -> Duration {
        Duration::from_millis(self.uid_ms)
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Paths for the append-only CSV event files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Movement records file.
    pub movements_csv: PathBuf,

    /// Sale records file.
    pub sales_csv: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            movements_csv: PathBuf::from("movimientos.csv"),
            sales_csv: PathBuf::from("ventas.csv"),
        }
    }
}

// =============================================================================
// Fleet Configuration
// =============================================================================

/// Complete fleet engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub server: ServerSettings,
    pub timeouts: TimeoutSettings,
    pub storage: StorageSettings,
}

impl FleetConfig {
    pub fn new() -> Self {
        FleetConfig::default()
    }

    /// Platform config file location, if one can be determined.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tagnet", "tagnet")
            .map(|dirs| dirs.config_dir().join("fleet.toml"))
    }

    /// Loads configuration from `config_path`, or from the platform
    /// location when none is given.
    pub fn load(config_path: Option<PathBuf>) -> FleetResult<Self> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| FleetError::ConfigLoadFailed("no config directory available".into()))?;

        let raw = std::fs::read_to_string(&path)
            .map_err(|e| FleetError::ConfigLoadFailed(format!("{}: {e}", path.display())))?;
        let config: FleetConfig = toml::from_str(&raw)?;
        config.validate()?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Loads configuration, falling back to defaults on any failure.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        match Self::load(config_path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Using default configuration");
                FleetConfig::default()
            }
        }
    }

    /// Saves configuration to `config_path`, or to the platform location
    /// when none is given.
    pub fn save(&self, config_path: Option<PathBuf>) -> FleetResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| FleetError::ConfigSaveFailed("no config directory available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FleetError::ConfigSaveFailed(format!("{}: {e}", parent.display())))?;
        }
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(&path, raw)
            .map_err(|e| FleetError::ConfigSaveFailed(format!("{}: {e}", path.display())))?;
        Ok(())
    }

    /// Checks the configuration for values the engine cannot run with.
    pub fn validate(&self) -> FleetResult<()> {
        if self.server.bind_addr.trim().is_empty() {
            return Err(FleetError::InvalidConfig("bind_addr is empty".into()));
        }
        if self.timeouts.poll_ms == 0 || self.timeouts.ack_ms == 0 || self.timeouts.uid_ms == 0 {
            return Err(FleetError::InvalidConfig(
                "timeouts must be greater than zero".into(),
            ));
        }
        if self.storage.movements_csv.as_os_str().is_empty()
            || self.storage.sales_csv.as_os_str().is_empty()
        {
            return Err(FleetError::InvalidConfig("storage paths must be set".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FleetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.bind_address(), "0.0.0.0:5000");
        assert_eq!(config.timeouts.poll_timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = FleetConfig::default();
        config.server.port = 6000;
        config.timeouts.ack_ms = 1234;

        let raw = toml::to_string_pretty(&config).unwrap();
        let parsed: FleetConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: FleetConfig = toml::from_str("[server]\nport = 7000\n").unwrap();
        assert_eq!(parsed.server.port, 7000);
        assert_eq!(parsed.server.bind_addr, "0.0.0.0");
        assert_eq!(parsed.timeouts, TimeoutSettings::default());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = FleetConfig::default();
        config.timeouts.poll_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(FleetError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_blank_bind_addr() {
        let mut config = FleetConfig::default();
        config.server.bind_addr = "  ".into();
        assert!(config.validate().is_err());
    }
}
