//! Codec error types
//!
//! `CodecError` is request-local: it fails one build or decode, never the
//! codec. `FieldError` is field-local and only ever recorded as an issue on
//! the reading set.

use serde::Serialize;
use thiserror::Error;

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while building or decoding a single command
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// Command name not present in the protocol's command table
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Parameter missing, unexpected, or rejected by the command's pattern
    #[error("Invalid parameter for {command}: {reason}")]
    InvalidParameter { command: String, reason: String },

    /// Trailing checksum does not match a recomputation over the frame
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    Checksum {
        expected: String,
        actual: String,
        recoverable: bool,
    },

    /// Response does not have the shape the protocol expects
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Protocol name not recognized
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    /// Command table could not be built
    #[error("Invalid command definition: {0}")]
    InvalidDefinition(String),
}

impl CodecError {
    pub fn invalid_parameter(command: impl Into<String>, reason: impl Into<String>) -> Self {
        CodecError::InvalidParameter {
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        CodecError::MalformedFrame(msg.into())
    }

    pub fn definition(msg: impl Into<String>) -> Self {
        CodecError::InvalidDefinition(msg.into())
    }

    /// Whether repeating the exchange may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CodecError::Checksum {
                recoverable: true,
                ..
            }
        )
    }
}

/// Field-local decode problems; decoding always continues past these
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldError {
    #[error("{field}: no mapping for value {raw}")]
    UnknownEnumValue { field: String, raw: String },

    #[error("{field}: malformed timestamp {raw}")]
    MalformedTimestamp { field: String, raw: String },

    #[error("{field}: not a number: {raw}")]
    InvalidNumber { field: String, raw: String },

    #[error("{field}: response too short")]
    Truncated { field: String },
}

impl FieldError {
    /// Name of the field the issue belongs to
    pub fn field(&self) -> &str {
        match self {
            FieldError::UnknownEnumValue { field, .. }
            | FieldError::MalformedTimestamp { field, .. }
            | FieldError::InvalidNumber { field, .. }
            | FieldError::Truncated { field } => field,
        }
    }
}
