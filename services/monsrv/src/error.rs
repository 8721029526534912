//! Error handling for the monitoring service
//!
//! Port errors stay local to one exchange; only configuration errors are
//! fatal, and only at startup.

use std::time::Duration;

use solar_codec::CodecError;
use thiserror::Error;

/// Port layer error types
#[derive(Error, Debug, Clone)]
pub enum PortError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection lost
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Send operation failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Receive operation failed
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Exchange did not complete in time
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Port used before connect
    #[error("Port not connected: {0}")]
    NotConnected(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Request could not be built or response could not be decoded
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Relayed response never arrived
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
}

impl PortError {
    /// Whether the connection should be dropped so the next exchange reconnects
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            PortError::ConnectionLost(_)
                | PortError::SendFailed(_)
                | PortError::ReceiveFailed(_)
                | PortError::NotConnected(_)
        )
    }
}

/// Port result type
pub type PortResult<T> = std::result::Result<T, PortError>;

/// Async correlation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("No result for {key} after {after:?}")]
    TimedOut { key: String, after: Duration },

    #[error("Wait for {key} cancelled")]
    Cancelled { key: String },
}

/// Monitoring service error type
#[derive(Error, Debug)]
pub enum MonsrvError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Port errors surfaced outside an exchange (construction, lookup)
    #[error("Port error: {0}")]
    Port(#[from] PortError),

    /// Protocol table errors at startup
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Scheduler lifecycle errors
    #[error("Scheduler error: {0}")]
    SchedulerError(String),

    /// Ad-hoc request did not complete
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    /// Output sink errors
    #[error("Output error: {0}")]
    Output(String),

    /// Shared plumbing errors (config loader, logging)
    #[error(transparent)]
    Common(#[from] common::Error),
}

impl MonsrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        MonsrvError::ConfigError(msg.into())
    }

    pub fn output(msg: impl Into<String>) -> Self {
        MonsrvError::Output(msg.into())
    }
}

/// Result type alias for the monitoring service
pub type Result<T> = std::result::Result<T, MonsrvError>;
