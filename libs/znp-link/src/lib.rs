//! Transaction engine for Z-Stack ZNP network processors
//!
//! # Architecture
//!
//! - **Transport**: opens the byte stream (`SerialTransport`, or any
//!   `Transport` implementation)
//! - **Dispatcher**: classifies inbound frames into replies, device errors
//!   and notifications
//! - **Engine**: admission gate, transmit queue with early promotion, hard
//!   timeouts, backlog sweep and reset recovery, owned by a single task
//! - **Znp**: the public handle
//!
//! ```no_run
//! # async fn demo() -> znp_link::Result<()> {
//! use serde_json::json;
//! use znp_link::{EngineConfig, SerialConfig, Znp};
//!
//! let znp = Znp::new(EngineConfig::default());
//! znp.init(&SerialConfig::new("/dev/ttyACM0")).await?;
//! let reply = znp.sys("ping", json!({})).await?;
//! println!("capabilities: {}", reply["capabilities"]);
//! znp.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod transport;

mod dispatcher;
mod engine;
mod znp;

// Re-export core types
pub use config::{EngineConfig, LinkConfig, Parity, SerialConfig};
pub use engine::{EngineSnapshot, EngineStats, Gate, Holder, TxnId};
pub use error::{CorrelationKey, Result, ZnpError};
pub use events::ZnpEvent;
pub use transport::{ConnectionState, DeviceIo, DeviceStream, SerialTransport, Transport};
pub use znp::{PendingReply, Znp};

pub use znp_protocol::{FrameType, MtFrame, RpcErrorCode, Subsystem};
