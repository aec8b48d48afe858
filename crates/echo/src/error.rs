//! Error types for the echo simulator.

use std::time::Duration;
use taler_types::{ConfigError, ZoneError};
use thiserror::Error;
use tokio::task::JoinError;

/// Errors raised by the generator and responder.
#[derive(Debug, Error)]
pub enum EchoError {
    /// Could not establish a connection.
    #[error("Failed to connect to {addr}: {reason}")]
    Dial { addr: String, reason: String },

    /// Transport failure on an established connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A single read or write stalled past its deadline.
    #[error("{operation} exceeded its {timeout:?} deadline")]
    DeadlineExceeded {
        operation: &'static str,
        timeout: Duration,
    },

    /// Echoed bytes differ from what was sent.
    #[error(
        "Echo verification failed: sent {sent} bytes, received {received} bytes, first mismatch at {first_mismatch:?}"
    )]
    Verification {
        sent: usize,
        received: usize,
        first_mismatch: Option<usize>,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    ZoneConfig(#[from] ConfigError),

    #[error(transparent)]
    Zone(#[from] ZoneError),

    /// Request could not be built or the response was not an echo.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A spawned task panicked.
    #[error("Task failed: {0}")]
    Task(String),
}

impl EchoError {
    /// Whether the bounded reconnect policy may retry after this error.
    ///
    /// Only failures on an established connection qualify. A failed dial is
    /// fatal, and a verification failure points at a bug rather than a flaky
    /// network.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EchoError::Io(_) | EchoError::DeadlineExceeded { .. })
    }
}

impl From<JoinError> for EchoError {
    fn from(e: JoinError) -> Self {
        EchoError::Task(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let io = EchoError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        let deadline = EchoError::DeadlineExceeded {
            operation: "read",
            timeout: Duration::from_secs(1),
        };
        let dial = EchoError::Dial {
            addr: "127.0.0.1:1".to_string(),
            reason: "refused".to_string(),
        };
        let verification = EchoError::Verification {
            sent: 10,
            received: 9,
            first_mismatch: None,
        };

        assert!(io.is_retryable());
        assert!(deadline.is_retryable());
        assert!(!dial.is_retryable());
        assert!(!verification.is_retryable());
    }
}
