//! Scripted in-memory device for engine tests

#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;

use znp_link::{DeviceStream, EngineConfig, Transport, Znp, ZnpError, ZnpEvent};
use znp_protocol::codec::fcs;
use znp_protocol::{FrameType, MtCodec, MtFrame, Subsystem};

/// Hands the device end of a fresh duplex pipe to the test on every `open`
#[derive(Debug, Clone)]
pub struct MockTransport {
    devices: mpsc::UnboundedSender<MockDevice>,
}

impl MockTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockDevice>) {
        let (devices, rx) = mpsc::unbounded_channel();
        (Self { devices }, rx)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self) -> znp_link::Result<DeviceStream> {
        let (host, device) = tokio::io::duplex(4096);
        self.devices
            .send(MockDevice::new(device))
            .map_err(|_| ZnpError::transport("test dropped the device receiver"))?;
        Ok(Box::new(host))
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

/// Mock transport whose `open` takes `delay`
#[derive(Debug, Clone)]
pub struct SlowTransport {
    inner: MockTransport,
    delay: Duration,
}

impl SlowTransport {
    pub fn new(inner: MockTransport, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl Transport for SlowTransport {
    async fn open(&self) -> znp_link::Result<DeviceStream> {
        tokio::time::sleep(self.delay).await;
        self.inner.open().await
    }

    fn describe(&self) -> String {
        "slow mock".to_string()
    }
}

/// Transport whose `open` always fails
#[derive(Debug)]
pub struct FailingTransport;

#[async_trait]
impl Transport for FailingTransport {
    async fn open(&self) -> znp_link::Result<DeviceStream> {
        Err(ZnpError::transport("no such device"))
    }

    fn describe(&self) -> String {
        "failing".to_string()
    }
}

pub struct MockDevice {
    framed: Framed<DuplexStream, MtCodec>,
}

impl MockDevice {
    fn new(stream: DuplexStream) -> Self {
        Self {
            framed: Framed::new(stream, MtCodec::new()),
        }
    }

    /// Next frame written by the host
    pub async fn recv(&mut self) -> MtFrame {
        self.framed
            .next()
            .await
            .expect("host closed the stream")
            .expect("host wrote a bad frame")
            .frame
    }

    /// Next frame if one arrives within `within`
    pub async fn recv_within(&mut self, within: Duration) -> Option<MtFrame> {
        tokio::time::timeout(within, self.recv()).await.ok()
    }

    /// Read until the host shuts the stream down; returns the frames seen
    pub async fn until_closed(&mut self) -> Vec<MtFrame> {
        let mut frames = Vec::new();
        while let Some(Ok(inbound)) = self.framed.next().await {
            frames.push(inbound.frame);
        }
        frames
    }

    pub async fn send(&mut self, frame: MtFrame) {
        self.framed.send(frame).await.expect("device write");
    }

    pub async fn reply(&mut self, subsystem: Subsystem, command: u8, payload: &[u8]) {
        self.send(MtFrame::new(
            FrameType::SyncReply,
            subsystem,
            command,
            Bytes::copy_from_slice(payload),
        ))
        .await;
    }

    pub async fn indicate(&mut self, subsystem: Subsystem, command: u8, payload: &[u8]) {
        self.send(MtFrame::new(
            FrameType::FireAndForget,
            subsystem,
            command,
            Bytes::copy_from_slice(payload),
        ))
        .await;
    }

    pub async fn reset_ind(&mut self) {
        self.indicate(Subsystem::Sys, 0x80, &[0x00, 0x02, 0x01, 0x02, 0x07, 0x01])
            .await;
    }

    /// Write a frame with its FCS flipped
    pub async fn send_corrupted(&mut self, frame: MtFrame) {
        let mut body = vec![frame.payload.len() as u8, frame.cmd0(), frame.command];
        body.extend_from_slice(&frame.payload);
        let checksum = fcs(&body) ^ 0xFF;

        let mut raw = vec![0xFE];
        raw.extend_from_slice(&body);
        raw.push(checksum);
        self.framed.get_mut().write_all(&raw).await.expect("device write");
    }
}

pub struct Harness {
    pub znp: Znp,
    pub device: MockDevice,
    pub devices: mpsc::UnboundedReceiver<MockDevice>,
    pub transport: MockTransport,
    pub events: broadcast::Receiver<ZnpEvent>,
}

impl Harness {
    pub async fn start() -> Self {
        Self::with_config(EngineConfig::default()).await
    }

    pub async fn with_config(config: EngineConfig) -> Self {
        let znp = Znp::new(config);
        let events = znp.subscribe();
        let (transport, mut devices) = MockTransport::new();
        znp.init_with(transport.clone()).await.expect("init");
        let device = devices.recv().await.expect("device");
        Self {
            znp,
            device,
            devices,
            transport,
            events,
        }
    }

    /// Events received so far, without waiting
    pub fn drain_events(&mut self) -> Vec<ZnpEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn ping_reply() -> [u8; 2] {
    [0x79, 0x01]
}

/// Let spawned tasks run; the paused clock advances only once all are idle
pub async fn settle_tasks() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn nv_write_args() -> serde_json::Value {
    serde_json::json!({"id": 0x0F00, "offset": 0, "len": 2, "value": [0x01, 0x02]})
}

pub fn bind_args() -> serde_json::Value {
    serde_json::json!({
        "dstaddr": 0x0000,
        "srcaddr": "0x00124b0001020304",
        "srcendpoint": 1,
        "clusterid": 6,
        "dstaddrmode": 3,
        "addr_short_long": "0x00124b0005060708",
        "dstendpoint": 1
    })
}
