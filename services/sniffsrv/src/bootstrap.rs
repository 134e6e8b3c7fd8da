//! Command-line arguments and configuration loading

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};
use voltage_sniffer::SnifferConfig;

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/sniffsrv.yaml";

/// Command-line arguments for sniffsrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "sniffsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Passive Modbus RTU bus sniffer",
    long_about = None
)]
pub struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH, env = "SNIFFSRV_CONFIG")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,

    /// Also write daily-rolling log files to this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Write log files as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Serial port override
    #[arg(short = 'p', long)]
    pub port: Option<String>,

    /// Baud rate override
    #[arg(short = 'b', long)]
    pub baud_rate: Option<u32>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Validation mode - print the effective configuration and exit
    #[arg(long)]
    pub validate: bool,
}

impl Args {
    /// Apply command-line overrides on top of file and environment values
    pub fn apply_overrides(&self, config: &mut SnifferConfig) {
        if let Some(port) = &self.port {
            debug!("Port override: {}", port);
            config.serial.port = port.clone();
        }
        if let Some(baud_rate) = self.baud_rate {
            debug!("Baud rate override: {}", baud_rate);
            config.serial.baud_rate = baud_rate;
        }
    }
}

/// Load, override and validate the configuration
pub fn load_config(args: &Args) -> anyhow::Result<SnifferConfig> {
    if args.config.exists() {
        info!("Config: {}", args.config.display());
    } else {
        warn!("Config {} not found, using defaults", args.config.display());
    }

    let mut config = SnifferConfig::load_unvalidated(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    args.apply_overrides(&mut config);
    config.validate().context("Invalid configuration")?;

    Ok(config)
}

/// Effective configuration as YAML
pub fn render_config(config: &SnifferConfig) -> anyhow::Result<String> {
    serde_yaml::to_string(config).context("Failed to render configuration")
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["sniffsrv"]).unwrap();
        assert_eq!(args.log_level, "info");
        assert!(args.port.is_none());
        assert!(!args.validate);
    }

    #[test]
    fn test_overrides_applied_and_validated() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(b"serial:\n  port: /dev/ttyS0\n  baud_rate: 9600\n")
            .unwrap();

        let args = Args::try_parse_from([
            "sniffsrv",
            "-c",
            file.path().to_str().unwrap(),
            "-p",
            "/dev/ttyUSB3",
            "-b",
            "19200",
        ])
        .unwrap();

        let config = load_config(&args).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB3");
        assert_eq!(config.serial.baud_rate, 19200);

        let rendered = render_config(&config).unwrap();
        assert!(rendered.contains("/dev/ttyUSB3"));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sniffsrv.yaml");
        let args = Args::try_parse_from([
            "sniffsrv",
            "-c",
            path.to_str().unwrap(),
            "--baud-rate",
            "0",
        ])
        .unwrap();

        assert!(load_config(&args).is_err());
    }

    #[test]
    fn test_override_rescues_invalid_file_value() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(b"serial:\n  baud_rate: 0\n").unwrap();

        let args = Args::try_parse_from([
            "sniffsrv",
            "-c",
            file.path().to_str().unwrap(),
            "-b",
            "9600",
        ])
        .unwrap();

        let config = load_config(&args).unwrap();
        assert_eq!(config.serial.baud_rate, 9600);
    }
}
