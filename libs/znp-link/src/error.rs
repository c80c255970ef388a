//! ZNP Link Error Types
//!
//! Programmer errors (`NotInitialized`, `InvalidArgument`) are returned
//! synchronously by the submitting call. Everything else travels through the
//! request's reply handle.

use std::fmt;
use thiserror::Error;
use znp_protocol::{ProtocolError, RpcErrorCode, Subsystem};

/// Result type for znp-link operations
pub type Result<T> = std::result::Result<T, ZnpError>;

/// Replies are correlated by subsystem and command id, not by sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub subsystem: Subsystem,
    pub command: u8,
}

impl CorrelationKey {
    pub fn new(subsystem: Subsystem, command: u8) -> Self {
        Self { subsystem, command }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:0x{:02X}", self.subsystem, self.command)
    }
}

/// ZNP link errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ZnpError {
    /// Request issued before `init` or after `close`
    #[error("Not initialized")]
    NotInitialized,

    /// Bad call shape
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Command could not be resolved or encoded
    #[error("Build error: {0}")]
    Build(String),

    /// No reply within the hard ceiling
    #[error("request timeout: {0}")]
    Timeout(CorrelationKey),

    /// Device rejected the request with an rpcError
    #[error("Device error on {key}: {code}")]
    Device {
        key: CorrelationKey,
        code: RpcErrorCode,
    },

    /// Transport failures
    #[error("Transport error: {0}")]
    Transport(String),

    /// Queued request dropped by a reset or close before it reached the wire
    #[error("Request discarded")]
    Discarded,

    /// Engine task is gone
    #[error("Engine stopped")]
    EngineStopped,
}

impl From<ProtocolError> for ZnpError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => ZnpError::Transport(e.to_string()),
            other => ZnpError::Build(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ZnpError {
    fn from(err: std::io::Error) -> Self {
        ZnpError::Transport(err.to_string())
    }
}

impl From<tokio_serial::Error> for ZnpError {
    fn from(err: tokio_serial::Error) -> Self {
        ZnpError::Transport(format!("Serial port error: {}", err))
    }
}

// Helper methods for creating errors
impl ZnpError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ZnpError::InvalidArgument(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        ZnpError::Transport(msg.into())
    }

    /// Misuse of the API rather than a protocol or device failure
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            ZnpError::NotInitialized | ZnpError::InvalidArgument(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ZnpError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_programmer_errors() {
        assert!(ZnpError::NotInitialized.is_programmer_error());
        assert!(ZnpError::invalid_argument("args").is_programmer_error());
        assert!(!ZnpError::Discarded.is_programmer_error());
        assert!(!ZnpError::Build("x".into()).is_programmer_error());
    }

    #[test]
    fn test_timeout_message() {
        let err = ZnpError::Timeout(CorrelationKey::new(Subsystem::Sys, 0x01));
        assert_eq!(err.to_string(), "request timeout: SYS:0x01");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_protocol_error_becomes_build_error() {
        let err: ZnpError = ProtocolError::unknown_command("ZDO", "bind").into();
        assert!(matches!(err, ZnpError::Build(_)));
    }
}
