//! # Error Types
//!
//! Custom error types for the payload link controller using `thiserror`.

use thiserror::Error;

/// Main error type for the payload link controller
#[derive(Debug, Error)]
pub enum PayloadLinkError {
    /// Serial port could not be opened or configured
    #[error("Serial error: {0}")]
    Serial(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The acknowledgment for a command could not be written to the command link
    #[error("Acknowledgment write failed: {0}")]
    Acknowledge(std::io::Error),

    /// The command link failed while a handler or transfer was using it
    #[error("Command link write failed: {0}")]
    CommandLink(std::io::Error),

    /// A camera settings payload was rejected
    #[error("Invalid camera settings: {0}")]
    CameraSettings(String),

    /// Malformed traffic on a link
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A GPS sentence could not be parsed
    #[error("GPS sentence error: {0}")]
    Gps(String),

    /// The peripheral needed for an operation is not enabled
    #[error("{0} is unavailable")]
    Unavailable(&'static str),
}

impl PayloadLinkError {
    /// Whether this error means the command link itself can no longer be used.
    pub fn is_command_link_failure(&self) -> bool {
        matches!(
            self,
            PayloadLinkError::Acknowledge(_) | PayloadLinkError::CommandLink(_)
        )
    }
}

/// Result type alias for the payload link controller
pub type Result<T> = std::result::Result<T, PayloadLinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acknowledge_is_command_link_failure() {
        let err = PayloadLinkError::Acknowledge(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "gone",
        ));
        assert!(err.is_command_link_failure());
        assert!(err.to_string().contains("Acknowledgment write failed"));
    }

    #[test]
    fn test_link_write_is_command_link_failure() {
        let err = PayloadLinkError::CommandLink(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "stalled",
        ));
        assert!(err.is_command_link_failure());
    }

    #[test]
    fn test_other_errors_are_not_command_link_failures() {
        let err = PayloadLinkError::Protocol("bad frame".to_string());
        assert!(!err.is_command_link_failure());

        let err = PayloadLinkError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "image"));
        assert!(!err.is_command_link_failure());

        let err = PayloadLinkError::Unavailable("GPS");
        assert_eq!(err.to_string(), "GPS is unavailable");
    }
}
