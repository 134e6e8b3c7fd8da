//! Sniffer Error Types
//!
//! Only failures of the link itself or of the configuration are errors.
//! Malformed wire data is expected traffic on a shared bus and never
//! surfaces here.

use thiserror::Error;

/// Result type for voltage-sniffer operations
pub type Result<T> = std::result::Result<T, SnifferError>;

/// Sniffer errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnifferError {
    /// IO errors on the byte source
    #[error("IO error: {0}")]
    Io(String),

    /// The link could not be opened or was closed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for SnifferError {
    fn from(err: std::io::Error) -> Self {
        SnifferError::Io(err.to_string())
    }
}

impl From<tokio_serial::Error> for SnifferError {
    fn from(err: tokio_serial::Error) -> Self {
        SnifferError::Connection(err.to_string())
    }
}

impl From<figment::Error> for SnifferError {
    fn from(err: figment::Error) -> Self {
        SnifferError::Config(err.to_string())
    }
}

// Helper methods for creating errors
impl SnifferError {
    pub fn io(msg: impl Into<String>) -> Self {
        SnifferError::Io(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        SnifferError::Connection(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        SnifferError::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        SnifferError::Internal(msg.into())
    }

    /// Whether the byte source is gone and the sniffer cannot continue
    pub fn is_link_lost(&self) -> bool {
        matches!(self, SnifferError::Io(_) | SnifferError::Connection(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: SnifferError = io.into();
        assert!(matches!(err, SnifferError::Io(_)));
        assert!(err.to_string().contains("pipe closed"));
        assert!(err.is_link_lost());
    }

    #[test]
    fn test_config_error_is_not_link_loss() {
        let err = SnifferError::config("baud_rate must be greater than 0");
        assert!(!err.is_link_lost());
        assert_eq!(
            err.to_string(),
            "Configuration error: baud_rate must be greater than 0"
        );
    }
}
