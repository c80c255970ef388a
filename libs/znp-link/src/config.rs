//! Link configuration
//!
//! `LinkConfig` groups the serial port options, the engine timings and the
//! logging setup. Every field has a default, so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use znp_common::LogConfig;

/// Environment prefix, e.g. `ZNP_SERIAL__PATH=/dev/ttyUSB0`
pub const ENV_PREFIX: &str = "ZNP_";

// ============================================================================
// Serial Port
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Serial port options passed to `init`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub path: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    /// Hardware flow control
    pub rtscts: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            rtscts: false,
        }
    }
}

impl SerialConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

// ============================================================================
// Engine Timings
// ============================================================================

/// Transaction engine timings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard ceiling for a synchronous request
    pub request_timeout_ms: u64,
    /// Delay before a non-colliding queued request may be sent alongside an
    /// outstanding one
    pub promotion_interval_ms: u64,
    /// Gate release if the reset indication never arrives
    pub reset_failsafe_ms: u64,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 3500,
            promotion_interval_ms: 1800,
            reset_failsafe_ms: 30_000,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn promotion_interval(&self) -> Duration {
        Duration::from_millis(self.promotion_interval_ms)
    }

    pub fn reset_failsafe(&self) -> Duration {
        Duration::from_millis(self.reset_failsafe_ms)
    }

    /// Reject timings the engine cannot work with
    pub fn validate(&self) -> znp_common::Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(znp_common::Error::invalid_setting("engine.request_timeout_ms", "must be > 0"));
        }
        if self.event_capacity == 0 {
            return Err(znp_common::Error::invalid_setting("engine.event_capacity", "must be > 0"));
        }
        Ok(())
    }
}

// ============================================================================
// Top-level
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LinkConfig {
    pub serial: SerialConfig,
    pub engine: EngineConfig,
    pub logging: LogConfig,
}

impl LinkConfig {
    /// Defaults overlaid with `ZNP_` environment variables
    pub fn from_env() -> znp_common::Result<Self> {
        let config: Self = znp_common::config::load_config(ENV_PREFIX)?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Defaults, then the file, then `ZNP_` environment variables
    pub fn load(path: impl AsRef<Path>) -> znp_common::Result<Self> {
        let config: Self = znp_common::config::load_config_from_file(path, Some(ENV_PREFIX))?;
        config.engine.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    
    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.serial.parity, Parity::None);
        assert_eq!(config.engine.request_timeout(), Duration::from_millis(3500));
        assert_eq!(config.engine.promotion_interval(), Duration::from_millis(1800));
        assert_eq!(config.engine.reset_failsafe(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_yaml_partial() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "serial:\n  path: /dev/ttyUSB1\n  rtscts: true\nengine:\n  request_timeout_ms: 5000\n"
        )
        .unwrap();

        let config = LinkConfig::load(file.path()).unwrap();
        assert_eq!(config.serial.path, "/dev/ttyUSB1");
        assert!(config.serial.rtscts);
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.engine.request_timeout_ms, 5000);
        assert_eq!(config.engine.promotion_interval_ms, 1800);
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("link.toml", "[serial]\npath = \"/dev/ttyS0\"\nparity = \"even\"\n")?;
            jail.set_env("ZNP_SERIAL__PATH", "/dev/ttyACM3");

            let config = LinkConfig::load("link.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.serial.path, "/dev/ttyACM3");
            assert_eq!(config.serial.parity, Parity::Even);
            Ok(())
        });
    }

    #[test]
    fn test_zero_timeout_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ZNP_ENGINE__REQUEST_TIMEOUT_MS", "0");
            assert!(LinkConfig::from_env().is_err());
            Ok(())
        });
    }
}
