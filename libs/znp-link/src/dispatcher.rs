//! Event dispatcher
//!
//! Runs in the reader task. Each inbound frame is checked, published as a
//! `Data` event, decoded and then classified: synchronous replies and device
//! errors go to the engine, notifications go to subscribers.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::FramedRead;
use tracing::{debug, error, trace, warn};

use znp_protocol::constants::SYS_RESET_IND;
use znp_protocol::{CommandSchema, FrameType, InboundFrame, MtCodec, RpcError, RpcErrorCode, Subsystem};

use crate::engine::EngineMsg;
use crate::error::CorrelationKey;
use crate::events::ZnpEvent;

/// What the engine needs to know about an inbound frame
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inbound {
    SyncReply { key: CorrelationKey, value: Value },
    DeviceError { key: CorrelationKey, code: RpcErrorCode },
    ResetComplete,
}

pub(crate) struct Dispatcher {
    schema: Arc<dyn CommandSchema>,
    events: broadcast::Sender<ZnpEvent>,
    engine: mpsc::UnboundedSender<EngineMsg>,
    session: u64,
}

impl Dispatcher {
    pub fn new(
        schema: Arc<dyn CommandSchema>,
        events: broadcast::Sender<ZnpEvent>,
        engine: mpsc::UnboundedSender<EngineMsg>,
        session: u64,
    ) -> Self {
        Self {
            schema,
            events,
            engine,
            session,
        }
    }

    /// Publish events for one frame and return what the engine must see
    pub fn classify(&self, inbound: InboundFrame) -> Option<Inbound> {
        if !inbound.checksum_valid() {
            warn!(
                "RX FCS mismatch: {} got=0x{:02X} want=0x{:02X}",
                inbound.frame, inbound.checksum, inbound.expected_checksum
            );
            return None;
        }

        let frame = inbound.frame;
        trace!("RX: {}", frame);
        let _ = self.events.send(ZnpEvent::Data(frame.clone()));

        match frame.frame_type {
            FrameType::SyncReply => {
                if let Some(rpc) = RpcError::parse(&frame) {
                    let Some(subsystem) = Subsystem::from_code(rpc.subsystem) else {
                        warn!("RX rpcError: unknown subsys 0x{:02X}", rpc.subsystem);
                        return None;
                    };
                    let key = CorrelationKey::new(subsystem, rpc.command);
                    debug!("RX rpcError: {} on {}", rpc.code, key);
                    return Some(Inbound::DeviceError {
                        key,
                        code: rpc.code,
                    });
                }

                match self.schema.decode(&frame) {
                    Ok(msg) => Some(Inbound::SyncReply {
                        key: CorrelationKey::new(msg.subsystem, msg.command_id),
                        value: msg.data,
                    }),
                    Err(e) => {
                        warn!("RX decode: {} - {}", frame, e);
                        None
                    },
                }
            },
            FrameType::FireAndForget => match self.schema.decode(&frame) {
                Ok(msg) => {
                    debug!("RX ind: {}:{}", msg.subsystem, msg.command);
                    let reset = msg.subsystem == Subsystem::Sys && msg.command_id == SYS_RESET_IND;
                    let _ = self.events.send(ZnpEvent::Indication {
                        subsystem: msg.subsystem,
                        name: msg.command.to_string(),
                        data: msg.data,
                    });
                    reset.then_some(Inbound::ResetComplete)
                },
                Err(e) => {
                    warn!("RX decode: {} - {}", frame, e);
                    None
                },
            },
            FrameType::Poll | FrameType::SyncRequest => {
                debug!("RX ignored: {}", frame);
                None
            },
        }
    }

    /// Read frames until the stream ends or fails
    pub async fn run<R>(self, mut reader: FramedRead<R, MtCodec>)
    where
        R: AsyncRead + Unpin,
    {
        while let Some(item) = reader.next().await {
            match item {
                Ok(inbound) => {
                    if let Some(event) = self.classify(inbound) {
                        let msg = EngineMsg::Inbound {
                            session: self.session,
                            event,
                        };
                        if self.engine.send(msg).is_err() {
                            return;
                        }
                    }
                },
                Err(e) => {
                    error!("RX: {}", e);
                    let _ = self.engine.send(EngineMsg::TransportLost {
                        session: self.session,
                        reason: e.to_string(),
                    });
                    return;
                },
            }
        }

        debug!("RX closed");
        let _ = self.engine.send(EngineMsg::TransportLost {
            session: self.session,
            reason: "device stream closed".to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;
    use tracing_test::traced_test;
    use znp_protocol::{codec::fcs, MtFrame, ZnpSchema};

    fn dispatcher() -> (
        Dispatcher,
        broadcast::Receiver<ZnpEvent>,
        mpsc::UnboundedReceiver<EngineMsg>,
    ) {
        let (events, events_rx) = broadcast::channel(16);
        let (engine, engine_rx) = mpsc::unbounded_channel();
        (
            Dispatcher::new(Arc::new(ZnpSchema::new()), events, engine, 1),
            events_rx,
            engine_rx,
        )
    }

    fn inbound(frame: MtFrame) -> InboundFrame {
        let mut bytes = vec![frame.payload.len() as u8, frame.cmd0(), frame.command];
        bytes.extend_from_slice(&frame.payload);
        let checksum = fcs(&bytes);
        InboundFrame {
            frame,
            checksum,
            expected_checksum: checksum,
        }
    }

    #[test]
    fn test_sync_reply() {
        let (dispatcher, mut events, _engine) = dispatcher();
        let frame = MtFrame::new(
            FrameType::SyncReply,
            Subsystem::Sys,
            0x01,
            Bytes::from_static(&[0x79, 0x01]),
        );

        let result = dispatcher.classify(inbound(frame.clone()));
        assert_eq!(
            result,
            Some(Inbound::SyncReply {
                key: CorrelationKey::new(Subsystem::Sys, 0x01),
                value: json!({"capabilities": 0x0179}),
            })
        );
        assert_eq!(events.try_recv().unwrap(), ZnpEvent::Data(frame));
    }

    #[test]
    fn test_rpc_error_maps_to_key() {
        let (dispatcher, _events, _engine) = dispatcher();
        let frame = MtFrame::new(
            FrameType::SyncReply,
            Subsystem::Res0,
            0x00,
            Bytes::from_static(&[0x03, 0x21, 0x09]),
        );

        assert_eq!(
            dispatcher.classify(inbound(frame)),
            Some(Inbound::DeviceError {
                key: CorrelationKey::new(Subsystem::Sys, 0x09),
                code: RpcErrorCode::InvalidParameter,
            })
        );
    }

    #[test]
    fn test_reset_indication() {
        let (dispatcher, mut events, _engine) = dispatcher();
        let frame = MtFrame::new(
            FrameType::FireAndForget,
            Subsystem::Sys,
            SYS_RESET_IND,
            Bytes::from_static(&[0x00, 0x02, 0x01, 0x02, 0x07, 0x01]),
        );

        assert_eq!(dispatcher.classify(inbound(frame)), Some(Inbound::ResetComplete));
        assert!(matches!(events.try_recv().unwrap(), ZnpEvent::Data(_)));
        let event = events.try_recv().unwrap();
        assert!(event.is_indication(Subsystem::Sys, "resetInd"));
    }

    #[test]
    fn test_indication_not_sent_to_engine() {
        let (dispatcher, mut events, _engine) = dispatcher();
        let frame = MtFrame::new(
            FrameType::FireAndForget,
            Subsystem::Zdo,
            0xC0,
            Bytes::from_static(&[0x09]),
        );

        assert_eq!(dispatcher.classify(inbound(frame)), None);
        let _ = events.try_recv().unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            ZnpEvent::Indication {
                subsystem: Subsystem::Zdo,
                name: "stateChangeInd".to_string(),
                data: json!({"state": 9}),
            }
        );
    }

    #[test]
    #[traced_test]
    fn test_checksum_mismatch_dropped() {
        let (dispatcher, mut events, _engine) = dispatcher();
        let frame = MtFrame::new(FrameType::SyncReply, Subsystem::Sys, 0x01, Bytes::from_static(&[0x79, 0x01]));
        let mut bad = inbound(frame);
        bad.checksum ^= 0xFF;

        assert_eq!(dispatcher.classify(bad), None);
        assert!(events.try_recv().is_err());
        assert!(logs_contain("RX FCS mismatch"));
    }

    #[test]
    #[traced_test]
    fn test_undecodable_reply_dropped() {
        let (dispatcher, mut events, _engine) = dispatcher();
        // ping reply one byte short
        let frame = MtFrame::new(FrameType::SyncReply, Subsystem::Sys, 0x01, Bytes::from_static(&[0x79]));

        assert_eq!(dispatcher.classify(inbound(frame)), None);
        // Data is still published before decoding
        assert!(matches!(events.try_recv().unwrap(), ZnpEvent::Data(_)));
        assert!(logs_contain("RX decode"));
    }

    #[tokio::test]
    async fn test_run_reports_stream_end() {
        let (dispatcher, _events, mut engine) = dispatcher();
        let (host, device) = tokio::io::duplex(64);
        drop(device);

        dispatcher.run(FramedRead::new(host, MtCodec::new())).await;
        match engine.recv().await {
            Some(EngineMsg::TransportLost { session, .. }) => assert_eq!(session, 1),
            _ => panic!("expected TransportLost"),
        }
    }
}
