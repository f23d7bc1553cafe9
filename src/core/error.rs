use std::io;
use thiserror::Error;

/// Custom error types for the anycast MAC
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timing error: {0}")]
    Timing(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Radio busy: {0}")]
    RadioBusy(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new timing error
    pub fn timing(msg: impl Into<String>) -> Self {
        Error::Timing(msg.into())
    }

    /// Creates a new invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Creates a new radio busy error
    pub fn radio_busy(msg: impl Into<String>) -> Self {
        Error::RadioBusy(msg.into())
    }

    /// Whether the error halts the node (configuration or logic defect)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Timing(_) | Error::InvalidState(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::timing("negative sleep");
        assert!(matches!(err, Error::Timing(_)));
        assert_eq!(err.to_string(), "Timing error: negative sleep");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::invalid_state("custodian without next hop").is_fatal());
        assert!(Error::config("cycle").is_fatal());
        assert!(!Error::radio_busy("tx in progress").is_fatal());
        assert!(!Error::protocol("short frame").is_fatal());
    }
}
