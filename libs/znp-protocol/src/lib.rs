//! Z-Stack Monitor-and-Test (MT) protocol building blocks
//!
//! # Architecture
//!
//! This library provides:
//! - **Frame types**: `FrameType`, `Subsystem`, `MtFrame`
//! - **Codec**: `MtCodec`, a `tokio_util` codec for the UART transport framing
//! - **Schema**: `CommandSchema` and the built-in `ZnpSchema` command table that
//!   encodes JSON argument objects into payloads and decodes payloads back

pub mod codec;
pub mod constants;
pub mod error;
pub mod frame;
pub mod schema;

// Re-export core types
pub use codec::{InboundFrame, MtCodec};
pub use error::{ProtocolError, Result};
pub use frame::{FrameType, MtFrame, Subsystem};
pub use schema::{
    CommandDef, CommandKind, CommandSchema, DecodedMessage, Param, ParamType, RpcError,
    RpcErrorCode, ZnpSchema,
};
