//! Public handle
//!
//! `Znp` is the only entry point to an engine. Each handle owns its own engine
//! task; dropping the handle stops it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::debug;

use znp_protocol::constants::{MAX_PAYLOAD_LEN, SYS_RESET_REQ};
use znp_protocol::{CommandKind, CommandSchema, FrameType, MtFrame, Subsystem, ZnpSchema};

use crate::config::{EngineConfig, SerialConfig};
use crate::engine::{Engine, EngineMsg, EngineSnapshot, Submission, TxnKind};
use crate::error::{CorrelationKey, Result, ZnpError};
use crate::events::ZnpEvent;
use crate::transport::{ConnectionState, SerialTransport, Transport};

/// Outcome of a submitted request, completed at most once.
///
/// Resolves to `ZnpError::Discarded` if the request was dropped from the
/// queue by a reset or a close.
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingReply {
    fn ready(result: Result<Value>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for PendingReply {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(ZnpError::Discarded)))
    }
}

/// Handle to one ZNP device
#[derive(Debug)]
pub struct Znp {
    engine: tokio::sync::mpsc::UnboundedSender<EngineMsg>,
    events: broadcast::Sender<ZnpEvent>,
    state: watch::Receiver<ConnectionState>,
    schema: Arc<dyn CommandSchema>,
    config: EngineConfig,
}

impl Znp {
    /// Create a handle with the built-in command table.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_schema(config, Arc::new(ZnpSchema::new()))
    }

    pub fn with_schema(config: EngineConfig, schema: Arc<dyn CommandSchema>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (state_tx, state) = watch::channel(ConnectionState::Uninitialized);
        let engine = Engine::spawn(config.clone(), schema.clone(), events.clone(), state_tx);

        Self {
            engine,
            events,
            state,
            schema,
            config,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open the serial port. Calling it again replaces the previous stream
    /// and emits exactly one more `Ready`.
    pub async fn init(&self, serial: &SerialConfig) -> Result<()> {
        self.init_with(SerialTransport::new(serial.clone())).await
    }

    pub async fn init_with<T>(&self, transport: T) -> Result<()>
    where
        T: Transport + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.send(EngineMsg::Attach {
            transport: Box::new(transport),
            reply,
        })?;
        rx.await.map_err(|_| ZnpError::EngineStopped)?
    }

    /// Flush and close the transport. Concurrent calls share one close.
    pub async fn close(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineMsg::Close { reply })?;
        rx.await.map_err(|_| ZnpError::EngineStopped)?
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ZnpEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineMsg::Snapshot { reply })?;
        rx.await.map_err(|_| ZnpError::EngineStopped)
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Submit a command.
    ///
    /// Misuse (not initialized, arguments not an object) fails here. Build
    /// errors, timeouts and device errors arrive through the returned reply.
    /// While `init` is still opening the stream the request is queued.
    pub fn submit(&self, subsystem: Subsystem, command: &str, args: Value) -> Result<PendingReply> {
        if !self.state().accepts_requests() {
            return Err(ZnpError::NotInitialized);
        }
        let Value::Object(args) = args else {
            return Err(ZnpError::invalid_argument(format!(
                "arguments for {}:{} must be an object",
                subsystem, command
            )));
        };

        let (def, frame) = match self.schema.build(subsystem, command, &args) {
            Ok(built) => built,
            Err(e) => {
                debug!("Build {}:{}: {}", subsystem, command, e);
                return Ok(PendingReply::ready(Err(e.into())));
            },
        };

        let kind = match def.kind {
            CommandKind::Sync => TxnKind::Sync,
            CommandKind::Async if subsystem == Subsystem::Sys && def.id == SYS_RESET_REQ => {
                TxnKind::Reset
            },
            _ => TxnKind::Async,
        };

        let (reply, rx) = oneshot::channel();
        self.send(EngineMsg::Request(Submission {
            key: CorrelationKey::new(subsystem, def.id),
            name: def.name.to_string(),
            kind,
            frame,
            reply,
        }))?;

        Ok(PendingReply { rx })
    }

    pub async fn request(&self, subsystem: Subsystem, command: &str, args: Value) -> Result<Value> {
        self.submit(subsystem, command, args)?.await
    }

    /// Write a frame directly, outside the transaction engine
    pub async fn send_raw(
        &self,
        frame_type: FrameType,
        subsystem: Subsystem,
        command: u8,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        if !self.state().is_connected() {
            return Err(ZnpError::NotInitialized);
        }
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ZnpError::invalid_argument(format!(
                "payload of {} bytes exceeds {}",
                payload.len(),
                MAX_PAYLOAD_LEN
            )));
        }

        let (reply, rx) = oneshot::channel();
        self.send(EngineMsg::SendRaw {
            frame: MtFrame::new(frame_type, subsystem, command, payload),
            reply,
        })?;
        rx.await.map_err(|_| ZnpError::EngineStopped)?
    }

    // ========================================================================
    // Per-subsystem shorthands
    // ========================================================================

    pub async fn sys(&self, command: &str, args: Value) -> Result<Value> {
        self.request(Subsystem::Sys, command, args).await
    }

    pub async fn mac(&self, command: &str, args: Value) -> Result<Value> {
        self.request(Subsystem::Mac, command, args).await
    }

    pub async fn nwk(&self, command: &str, args: Value) -> Result<Value> {
        self.request(Subsystem::Nwk, command, args).await
    }

    pub async fn af(&self, command: &str, args: Value) -> Result<Value> {
        self.request(Subsystem::Af, command, args).await
    }

    pub async fn zdo(&self, command: &str, args: Value) -> Result<Value> {
        self.request(Subsystem::Zdo, command, args).await
    }

    pub async fn sapi(&self, command: &str, args: Value) -> Result<Value> {
        self.request(Subsystem::Sapi, command, args).await
    }

    pub async fn util(&self, command: &str, args: Value) -> Result<Value> {
        self.request(Subsystem::Util, command, args).await
    }

    pub async fn dbg(&self, command: &str, args: Value) -> Result<Value> {
        self.request(Subsystem::Dbg, command, args).await
    }

    pub async fn app(&self, command: &str, args: Value) -> Result<Value> {
        self.request(Subsystem::App, command, args).await
    }

    pub async fn app_cnf(&self, command: &str, args: Value) -> Result<Value> {
        self.request(Subsystem::AppCnf, command, args).await
    }

    pub async fn green_power(&self, command: &str, args: Value) -> Result<Value> {
        self.request(Subsystem::GreenPower, command, args).await
    }

    fn send(&self, msg: EngineMsg) -> Result<()> {
        self.engine.send(msg).map_err(|_| ZnpError::EngineStopped)
    }
}

impl Drop for Znp {
    fn drop(&mut self) {
        let _ = self.engine.send(EngineMsg::Shutdown);
    }
}
