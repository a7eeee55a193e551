//! Client error types.

use sortlink_protocol::{ProtocolError, ValidationError};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ClientError {
    /// Returns whether the error came from the connection rather than from
    /// the bytes carried over it.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ClientError::Connect { .. }
                | ClientError::ConnectTimeout(_)
                | ClientError::Io(_)
                | ClientError::ConnectionClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ClientError::ConnectionClosed.is_connection_error());
        assert!(ClientError::ConnectTimeout("sorter:7020".into()).is_connection_error());
        assert!(!ClientError::from(ProtocolError::UnexpectedSequence { probes: 10 })
            .is_connection_error());
        assert!(!ClientError::from(ValidationError::NameTooLong { len: 300, max: 255 })
            .is_connection_error());
    }
}
