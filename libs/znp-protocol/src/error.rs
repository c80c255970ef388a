//! Protocol Error Types

use thiserror::Error;

/// Result type for znp-protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Framing and schema errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload does not fit in a single MT frame
    #[error("Frame too large: {0} bytes (max {})", crate::constants::MAX_PAYLOAD_LEN)]
    FrameTooLarge(usize),

    /// Subsystem name or code is not known
    #[error("Unknown subsystem: {0}")]
    UnknownSubsystem(String),

    /// Command is not defined for the subsystem
    #[error("Unknown command: {subsystem}:{command}")]
    UnknownCommand { subsystem: String, command: String },

    /// Command exists but cannot be sent by the host
    #[error("Command {0} is not a request")]
    NotARequest(String),

    /// Argument missing, of the wrong type or out of range
    #[error("Invalid argument '{param}': {reason}")]
    InvalidArgument { param: String, reason: String },

    /// Payload ended before every parameter was read
    #[error("Payload too short for '{param}': need {needed} bytes, {available} left")]
    PayloadTooShort {
        param: String,
        needed: usize,
        available: usize,
    },

    /// Bytes left over after every parameter was read
    #[error("Unexpected trailing payload: {0} bytes")]
    TrailingBytes(usize),

    /// IO errors surfaced through the codec
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub fn invalid_argument(param: impl Into<String>, reason: impl Into<String>) -> Self {
        ProtocolError::InvalidArgument {
            param: param.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_command(subsystem: impl Into<String>, command: impl Into<String>) -> Self {
        ProtocolError::UnknownCommand {
            subsystem: subsystem.into(),
            command: command.into(),
        }
    }
}
