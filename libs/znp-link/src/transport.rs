//! Transport abstraction
//!
//! The engine only needs a bidirectional byte stream. `SerialTransport` opens
//! one on a serial port; tests plug in an in-memory duplex stream.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error, info};

use crate::config::{Parity, SerialConfig};
use crate::error::{Result, ZnpError};

// ============================================================================
// Connection State
// ============================================================================

/// Lifecycle of a `Znp` handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    /// Not initialized yet, or closed
    #[default]
    Uninitialized,
    /// Opening the transport
    Connecting,
    /// Transport open, requests accepted
    Connected,
    /// Flushing and closing the transport
    Closing,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Requests are accepted while connected and while (re)opening; the
    /// engine holds them until a stream is attached
    pub fn accepts_requests(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Connecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Uninitialized => write!(f, "UNINITIALIZED"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Closing => write!(f, "CLOSING"),
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Byte stream to the device
pub trait DeviceIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> DeviceIo for T {}

pub type DeviceStream = Box<dyn DeviceIo>;

/// Opens the byte stream; called once per `init`
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn open(&self) -> Result<DeviceStream>;

    /// Human readable endpoint for logs
    fn describe(&self) -> String;
}

/// Serial port transport
#[derive(Debug, Clone)]
pub struct SerialTransport {
    config: SerialConfig,
}

impl SerialTransport {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn builder(&self) -> tokio_serial::SerialPortBuilder {
        let config = &self.config;

        let parity = match config.parity {
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::None => tokio_serial::Parity::None,
        };

        let data_bits = match config.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };

        let stop_bits = match config.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        let flow_control = if config.rtscts {
            tokio_serial::FlowControl::Hardware
        } else {
            tokio_serial::FlowControl::None
        };

        tokio_serial::new(&config.path, config.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(flow_control)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&self) -> Result<DeviceStream> {
        debug!("Serial: {} @{}baud", self.config.path, self.config.baud_rate);

        match self.builder().open_native_async() {
            Ok(port) => {
                info!("Serial opened: {}", self.config.path);
                Ok(Box::new(port))
            },
            Err(e) => {
                error!("Serial err: {} - {}", self.config.path, e);
                Err(ZnpError::transport(format!(
                    "Failed to open serial port {}: {}",
                    self.config.path, e
                )))
            },
        }
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.config.path, self.config.baud_rate)
    }
}
