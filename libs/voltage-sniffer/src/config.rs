//! Sniffer configuration
//!
//! Sources are layered with figment, lowest to highest priority:
//! 1. Built-in defaults
//! 2. Config file (YAML, TOML or JSON, picked by extension)
//! 3. Environment variables, `SNIFFSRV_` prefix, `__` as section separator
//!    (e.g. `SNIFFSRV_SERIAL__BAUD_RATE=19200`)

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_IDLE_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT, MAX_REGISTER_BIT};
use crate::error::{Result, SnifferError};
use crate::sniffer::SnifferTimeouts;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "SNIFFSRV_";

// ============================================================================
// Default Value Functions
// ============================================================================

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_idle_timeout_ms() -> u64 {
    DEFAULT_IDLE_TIMEOUT.as_millis() as u64
}

fn default_response_timeout_ms() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT.as_millis() as u64
}

fn bool_true() -> bool {
    true
}

// ============================================================================
// Serial
// ============================================================================

/// Serial parity
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

/// Serial line the sniffer listens on
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SerialConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Drive RTS low so an RTS-controlled RS-485 driver stays disabled
    #[serde(default)]
    pub hold_rts_low: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::None,
            stop_bits: default_stop_bits(),
            hold_rts_low: false,
        }
    }
}

impl SerialConfig {
    pub fn tokio_data_bits(&self) -> tokio_serial::DataBits {
        match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        }
    }

    pub fn tokio_stop_bits(&self) -> tokio_serial::StopBits {
        match self.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        }
    }
}

// ============================================================================
// Timing
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TimingConfig {
    /// Override for the derived inter-byte gap, in microseconds
    ///
    /// USB serial adapters deliver bytes in bursts spaced by their latency
    /// timer; set this above that timer when frames are dropped as stalled.
    #[serde(default)]
    pub inter_byte_gap_us: Option<u64>,
    /// Bus-idle timeout while waiting for a request
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Request-to-response timeout
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            inter_byte_gap_us: None,
            idle_timeout_ms: default_idle_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl TimingConfig {
    pub fn inter_byte_gap(&self) -> Option<Duration> {
        self.inter_byte_gap_us.map(Duration::from_micros)
    }

    pub fn timeouts(&self) -> SnifferTimeouts {
        SnifferTimeouts {
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            response_timeout: Duration::from_millis(self.response_timeout_ms),
        }
    }
}

// ============================================================================
// Publisher and Sensors
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Log observations no sensor subscribed to at info instead of trace
    #[serde(default = "bool_true")]
    pub log_not_configured_data: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            log_not_configured_data: true,
        }
    }
}

/// A register (or one bit of it) to publish
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SensorConfig {
    pub name: String,
    /// Slave address
    pub device: u8,
    /// Protocol (0-based) register address
    pub register: u16,
    /// Bit index for binary sensors; absent for a whole-register sensor
    #[serde(default)]
    pub bit: Option<u8>,
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct SnifferConfig {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

impl SnifferConfig {
    /// Load defaults, then `path`, then `SNIFFSRV_*` environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_env_prefix(path, ENV_PREFIX)
    }

    /// Same layering as [`load`](Self::load) without validation, for callers
    /// that apply further overrides before calling [`validate`](Self::validate)
    pub fn load_unvalidated(path: impl AsRef<Path>) -> Result<Self> {
        Self::extract_with_env_prefix(path.as_ref(), ENV_PREFIX)
    }

    pub(crate) fn load_with_env_prefix(path: impl AsRef<Path>, prefix: &str) -> Result<Self> {
        let config = Self::extract_with_env_prefix(path.as_ref(), prefix)?;
        config.validate()?;
        Ok(config)
    }

    fn extract_with_env_prefix(path: &Path, prefix: &str) -> Result<Self> {
        let figment = Self::file_figment(path)?.merge(Env::prefixed(prefix).split("__"));
        Ok(figment.extract()?)
    }

    fn file_figment(path: &Path) -> Result<Figment> {
        let defaults = Figment::from(Serialized::defaults(Self::default()));
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| SnifferError::config("Config file must have an extension"))?;

        let figment = match extension {
            "yaml" | "yml" => defaults.merge(Yaml::file(path)),
            "toml" => defaults.merge(Toml::file(path)),
            "json" => defaults.merge(Json::file(path)),
            _ => {
                return Err(SnifferError::config(format!(
                    "Unsupported config file format: {extension}"
                )))
            },
        };
        Ok(figment)
    }

    /// Reject values the sniffer cannot run with
    pub fn validate(&self) -> Result<()> {
        let serial = &self.serial;
        if serial.port.trim().is_empty() {
            return Err(SnifferError::config("serial.port must not be empty"));
        }
        if serial.baud_rate == 0 {
            return Err(SnifferError::config("serial.baud_rate must be positive"));
        }
        if !(5..=8).contains(&serial.data_bits) {
            return Err(SnifferError::config(format!(
                "serial.data_bits must be 5-8, got {}",
                serial.data_bits
            )));
        }
        if !matches!(serial.stop_bits, 1 | 2) {
            return Err(SnifferError::config(format!(
                "serial.stop_bits must be 1 or 2, got {}",
                serial.stop_bits
            )));
        }

        let timing = &self.timing;
        if timing.idle_timeout_ms == 0 || timing.response_timeout_ms == 0 {
            return Err(SnifferError::config("timing timeouts must be positive"));
        }
        if timing.inter_byte_gap_us == Some(0) {
            return Err(SnifferError::config(
                "timing.inter_byte_gap_us must be positive",
            ));
        }

        for sensor in &self.sensors {
            if sensor.name.trim().is_empty() {
                return Err(SnifferError::config(format!(
                    "sensor for slave {} register {} has no name",
                    sensor.device, sensor.register
                )));
            }
            if let Some(bit) = sensor.bit {
                if bit > MAX_REGISTER_BIT {
                    return Err(SnifferError::config(format!(
                        "sensor '{}': bit {} out of range 0-{}",
                        sensor.name, bit, MAX_REGISTER_BIT
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = SnifferConfig::default();
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.parity, Parity::None);
        assert_eq!(config.timing.idle_timeout_ms, 1000);
        assert_eq!(config.timing.response_timeout_ms, 1000);
        assert!(config.publisher.log_not_configured_data);
        assert!(config.sensors.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml() {
        let file = write_config(
            ".yaml",
            r#"
serial:
  port: /dev/ttyS1
  baud_rate: 19200
  parity: even
  hold_rts_low: true
timing:
  inter_byte_gap_us: 5000
publisher:
  log_not_configured_data: false
sensors:
  - name: inverter_power
    device: 1
    register: 0
  - name: pump_running
    device: 17
    register: 5
    bit: 3
"#,
        );

        let config = SnifferConfig::load_with_env_prefix(file.path(), "SNIFFSRV_TEST_YAML_").unwrap();
        assert_eq!(config.serial.port, "/dev/ttyS1");
        assert_eq!(config.serial.baud_rate, 19200);
        assert_eq!(config.serial.parity, Parity::Even);
        assert_eq!(config.serial.data_bits, 8);
        assert!(config.serial.hold_rts_low);
        assert_eq!(
            config.timing.inter_byte_gap(),
            Some(Duration::from_millis(5))
        );
        assert_eq!(config.timing.response_timeout_ms, 1000);
        assert!(!config.publisher.log_not_configured_data);
        assert_eq!(config.sensors.len(), 2);
        assert_eq!(config.sensors[1].bit, Some(3));
    }

    #[test]
    fn test_load_toml() {
        let file = write_config(
            ".toml",
            r#"
[serial]
port = "COM3"
stop_bits = 2

[[sensors]]
name = "setpoint"
device = 2
register = 100
"#,
        );

        let config = SnifferConfig::load_with_env_prefix(file.path(), "SNIFFSRV_TEST_TOML_").unwrap();
        assert_eq!(config.serial.port, "COM3");
        assert_eq!(config.serial.tokio_stop_bits(), tokio_serial::StopBits::Two);
        assert_eq!(config.sensors[0].register, 100);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let config = SnifferConfig::load_with_env_prefix(&path, "SNIFFSRV_TEST_ABSENT_").unwrap();
        assert_eq!(config, SnifferConfig::default());
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_config(".yaml", "serial:\n  baud_rate: 4800\n");
        std::env::set_var("SNIFFSRV_TEST_ENV_SERIAL__BAUD_RATE", "38400");
        std::env::set_var("SNIFFSRV_TEST_ENV_TIMING__IDLE_TIMEOUT_MS", "250");

        let config = SnifferConfig::load_with_env_prefix(file.path(), "SNIFFSRV_TEST_ENV_").unwrap();

        std::env::remove_var("SNIFFSRV_TEST_ENV_SERIAL__BAUD_RATE");
        std::env::remove_var("SNIFFSRV_TEST_ENV_TIMING__IDLE_TIMEOUT_MS");

        assert_eq!(config.serial.baud_rate, 38400);
        assert_eq!(
            config.timing.timeouts().idle_timeout,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_load_unvalidated_keeps_invalid_values() {
        let file = write_config(".yaml", "serial:\n  baud_rate: 0\n");
        assert!(SnifferConfig::load(file.path()).is_err());

        let config = SnifferConfig::load_unvalidated(file.path()).unwrap();
        assert_eq!(config.serial.baud_rate, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unsupported_extension() {
        let err = SnifferConfig::load("config/sniffsrv.ini").unwrap_err();
        assert!(matches!(err, SnifferError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SnifferConfig::default();
        config.serial.baud_rate = 0;
        assert!(config.validate().is_err());

        let mut config = SnifferConfig::default();
        config.serial.data_bits = 9;
        assert!(config.validate().is_err());

        let mut config = SnifferConfig::default();
        config.serial.stop_bits = 3;
        assert!(config.validate().is_err());

        let mut config = SnifferConfig::default();
        config.timing.response_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = SnifferConfig::default();
        config.timing.inter_byte_gap_us = Some(0);
        assert!(config.validate().is_err());

        let mut config = SnifferConfig::default();
        config.sensors.push(SensorConfig {
            name: "alarm".to_string(),
            device: 1,
            register: 10,
            bit: Some(16),
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bit 16"));

        let mut config = SnifferConfig::default();
        config.sensors.push(SensorConfig {
            name: " ".to_string(),
            device: 1,
            register: 10,
            bit: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serial_conversions() {
        let serial = SerialConfig {
            data_bits: 7,
            parity: Parity::Odd,
            ..SerialConfig::default()
        };
        assert_eq!(serial.tokio_data_bits(), tokio_serial::DataBits::Seven);
        assert_eq!(serial.tokio_stop_bits(), tokio_serial::StopBits::One);
        assert_eq!(
            tokio_serial::Parity::from(serial.parity),
            tokio_serial::Parity::Odd
        );
    }
}
