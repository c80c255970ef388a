//! Command schema translator
//!
//! Maps `(subsystem, command)` pairs to wire ids, encodes argument objects
//! into request payloads and decodes inbound payloads into result objects.
//! The [`CommandSchema`] trait is the seam; [`ZnpSchema`] is the built-in
//! table.

mod params;
mod table;

use bytes::Bytes;
use serde_json::{Map, Value};
use std::fmt;

pub use params::{decode as decode_params, encode as encode_params, p, Param, ParamType};

use crate::constants::{RES0_RPC_ERROR, SUBSYSTEM_MASK};
use crate::error::{ProtocolError, Result};
use crate::frame::{FrameType, MtFrame, Subsystem};

/// How a command travels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Host request answered by one reply (SREQ/SRSP)
    Sync,
    /// Host request without reply (AREQ)
    Async,
    /// Device-originated notification (AREQ)
    Indication,
}

impl CommandKind {
    pub fn is_indication(&self) -> bool {
        matches!(self, CommandKind::Indication)
    }

    /// Frame type used when the host sends this command
    pub fn request_frame_type(&self) -> Option<FrameType> {
        match self {
            CommandKind::Sync => Some(FrameType::SyncRequest),
            CommandKind::Async => Some(FrameType::FireAndForget),
            CommandKind::Indication => None,
        }
    }
}

/// Static description of one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDef {
    pub name: &'static str,
    pub id: u8,
    pub kind: CommandKind,
    /// Parameters sent by the host
    pub request: &'static [Param],
    /// Parameters of the reply or of the notification
    pub response: &'static [Param],
}

impl CommandDef {
    pub const fn sreq(
        name: &'static str,
        id: u8,
        request: &'static [Param],
        response: &'static [Param],
    ) -> Self {
        Self {
            name,
            id,
            kind: CommandKind::Sync,
            request,
            response,
        }
    }

    pub const fn areq(name: &'static str, id: u8, request: &'static [Param]) -> Self {
        Self {
            name,
            id,
            kind: CommandKind::Async,
            request,
            response: &[],
        }
    }

    pub const fn ind(name: &'static str, id: u8, response: &'static [Param]) -> Self {
        Self {
            name,
            id,
            kind: CommandKind::Indication,
            request: &[],
            response,
        }
    }
}

/// An inbound frame translated to symbolic names
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub frame_type: FrameType,
    pub subsystem: Subsystem,
    pub command: &'static str,
    pub command_id: u8,
    pub data: Value,
}

/// Error codes carried by `RES0:rpcError`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorCode {
    InvalidSubsystem,
    InvalidCommandId,
    InvalidParameter,
    InvalidLength,
    Other(u8),
}

impl From<u8> for RpcErrorCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => RpcErrorCode::InvalidSubsystem,
            0x02 => RpcErrorCode::InvalidCommandId,
            0x03 => RpcErrorCode::InvalidParameter,
            0x04 => RpcErrorCode::InvalidLength,
            other => RpcErrorCode::Other(other),
        }
    }
}

impl fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcErrorCode::InvalidSubsystem => write!(f, "invalid subsystem"),
            RpcErrorCode::InvalidCommandId => write!(f, "invalid command id"),
            RpcErrorCode::InvalidParameter => write!(f, "invalid parameter"),
            RpcErrorCode::InvalidLength => write!(f, "invalid length"),
            RpcErrorCode::Other(code) => write!(f, "error 0x{:02X}", code),
        }
    }
}

/// Generic device error referencing the raw codes of the rejected request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcError {
    pub code: RpcErrorCode,
    pub subsystem: u8,
    pub command: u8,
}

impl RpcError {
    /// Recognise a `RES0:rpcError` reply
    pub fn parse(frame: &MtFrame) -> Option<Self> {
        if frame.frame_type != FrameType::SyncReply
            || frame.subsystem != Subsystem::Res0.code()
            || frame.command != RES0_RPC_ERROR
            || frame.payload.len() != 3
        {
            return None;
        }
        Some(Self {
            code: RpcErrorCode::from(frame.payload[0]),
            subsystem: frame.payload[1] & SUBSYSTEM_MASK,
            command: frame.payload[2],
        })
    }
}

/// Translation between symbolic commands and MT frames
pub trait CommandSchema: Send + Sync + fmt::Debug {
    /// Look a command up by name
    fn command(&self, subsystem: Subsystem, name: &str) -> Result<&CommandDef>;

    /// Look a command up by wire id; indications and requests share id space
    /// only within their own kind
    fn command_by_id(&self, subsystem: Subsystem, id: u8, frame_type: FrameType)
        -> Option<&CommandDef>;

    /// Resolve and encode an outgoing request
    fn build(
        &self,
        subsystem: Subsystem,
        name: &str,
        args: &Map<String, Value>,
    ) -> Result<(&CommandDef, MtFrame)> {
        let def = self.command(subsystem, name)?;
        let frame_type = def
            .kind
            .request_frame_type()
            .ok_or_else(|| ProtocolError::NotARequest(format!("{}:{}", subsystem, name)))?;
        let payload: Bytes = params::encode(def.request, args)?;
        if payload.len() > crate::constants::MAX_PAYLOAD_LEN {
            return Err(ProtocolError::FrameTooLarge(payload.len()));
        }
        Ok((def, MtFrame::new(frame_type, subsystem, def.id, payload)))
    }

    /// Decode an inbound SRSP or AREQ frame
    fn decode(&self, frame: &MtFrame) -> Result<DecodedMessage> {
        let subsystem = frame
            .subsystem()
            .ok_or_else(|| ProtocolError::UnknownSubsystem(format!("0x{:02X}", frame.subsystem)))?;
        let def = self
            .command_by_id(subsystem, frame.command, frame.frame_type)
            .ok_or_else(|| {
                ProtocolError::unknown_command(subsystem.name(), format!("0x{:02X}", frame.command))
            })?;
        let params = match def.kind {
            CommandKind::Sync | CommandKind::Indication => def.response,
            CommandKind::Async => def.request,
        };
        let data = params::decode(params, &frame.payload)?;

        Ok(DecodedMessage {
            frame_type: frame.frame_type,
            subsystem,
            command: def.name,
            command_id: def.id,
            data: Value::Object(data),
        })
    }

    /// Name of a command id for logging and error translation
    fn command_name(&self, subsystem: Subsystem, id: u8, frame_type: FrameType) -> Option<&'static str> {
        self.command_by_id(subsystem, id, frame_type).map(|d| d.name)
    }
}

/// Built-in Z-Stack command table
#[derive(Debug, Default, Clone, Copy)]
pub struct ZnpSchema;

impl ZnpSchema {
    pub fn new() -> Self {
        Self
    }
}

impl CommandSchema for ZnpSchema {
    fn command(&self, subsystem: Subsystem, name: &str) -> Result<&CommandDef> {
        table::commands(subsystem)
            .iter()
            .find(|def| def.name == name)
            .ok_or_else(|| ProtocolError::unknown_command(subsystem.name(), name))
    }

    fn command_by_id(
        &self,
        subsystem: Subsystem,
        id: u8,
        frame_type: FrameType,
    ) -> Option<&CommandDef> {
        table::commands(subsystem).iter().find(|def| {
            def.id == id
                && match frame_type {
                    FrameType::SyncRequest | FrameType::SyncReply => def.kind == CommandKind::Sync,
                    FrameType::FireAndForget => def.kind != CommandKind::Sync,
                    FrameType::Poll => false,
                }
        })
    }
}
