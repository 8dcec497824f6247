//! Error types for the core crate
//!
//! This module provides a consolidated error type for the core crate,
//! wrapping errors from the chain engine, the operation registry and the
//! crypto identity layer.

use thiserror::Error;
use std::io;

/// Core error type
#[derive(Error, Debug)]
pub enum ChainError {
    /// Operation validation error (bad or missing fields, bad identifiers,
    /// bad nickname charset). The operation was never enqueued.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Password below the entropy floor
    #[error("Weak password: {0} characters, at least {1} required")]
    WeakPassword(usize, usize),

    /// Signature verification failure or malformed key material
    #[error("Signature error: {0}")]
    Signature(String),

    /// Attempted a sealing or locking operation while the chain was locked
    #[error("Chain locked: {0}")]
    ChainLocked(String),

    /// Operation payload exceeds the configured size ceiling
    #[error("Oversize operation: {0} bytes exceeds the {1} byte ceiling")]
    OversizeOperation(usize, usize),

    /// The external relational sink rejected a DDL statement
    #[error("DDL execution error: {0}")]
    DdlExecution(String),

    /// Replication check failure; retried on the next scheduled tick
    #[error("Replication error: {0}")]
    Replication(String),

    /// Unrecoverable defect: hash mismatch on sealed data or a broken
    /// chain link. Not a user error.
    #[error("Corrupt chain: {0}")]
    CorruptChain(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Chain state management error
    #[error("State error: {0}")]
    State(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Hex decoding error
    #[error("Hex decoding error: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Result type for the core crate
pub type Result<T> = std::result::Result<T, ChainError>;

/// Convert a displayable error to a Validation error
pub fn to_validation_error<E: std::fmt::Display>(err: E) -> ChainError {
    ChainError::Validation(err.to_string())
}

/// Convert a displayable error to a Signature error
pub fn to_signature_error<E: std::fmt::Display>(err: E) -> ChainError {
    ChainError::Signature(err.to_string())
}

/// Convert a displayable error to a State error
pub fn to_state_error<E: std::fmt::Display>(err: E) -> ChainError {
    ChainError::State(err.to_string())
}

/// Convert a displayable error to a Config error
pub fn to_config_error<E: std::fmt::Display>(err: E) -> ChainError {
    ChainError::Config(err.to_string())
}

impl ChainError {
    /// Whether the error is recoverable at the caller level.
    ///
    /// Recoverable errors reject a single operation or a single attempt;
    /// the chain itself remains usable. `CorruptChain` is the one
    /// unrecoverable defect channel.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ChainError::CorruptChain(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: ChainError = io_err.into();
        match err {
            ChainError::Io(_) => {}
            _ => panic!("Expected Io variant"),
        }

        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: ChainError = json_err.into();
        match err {
            ChainError::Json(_) => {}
            _ => panic!("Expected Json variant"),
        }

        let err = to_validation_error("missing field");
        match err {
            ChainError::Validation(msg) => assert_eq!(msg, "missing field"),
            _ => panic!("Expected Validation variant"),
        }

        let err = to_signature_error("bad key");
        match err {
            ChainError::Signature(msg) => assert_eq!(msg, "bad key"),
            _ => panic!("Expected Signature variant"),
        }
    }

    #[test]
    fn test_error_display() {
        let err = ChainError::WeakPassword(4, 10);
        assert_eq!(
            err.to_string(),
            "Weak password: 4 characters, at least 10 required"
        );

        let err = ChainError::OversizeOperation(2048, 1024);
        assert_eq!(
            err.to_string(),
            "Oversize operation: 2048 bytes exceeds the 1024 byte ceiling"
        );

        let err = ChainError::ChainLocked("create_block".to_string());
        assert_eq!(err.to_string(), "Chain locked: create_block");
    }

    #[test]
    fn test_recoverability() {
        assert!(ChainError::Validation("x".to_string()).is_recoverable());
        assert!(ChainError::ChainLocked("x".to_string()).is_recoverable());
        assert!(ChainError::Replication("x".to_string()).is_recoverable());
        assert!(!ChainError::CorruptChain("x".to_string()).is_recoverable());
    }
}
