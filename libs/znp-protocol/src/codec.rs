//! MT UART frame codec
//!
//! Splits the serial byte stream into frames and back. The decoder resyncs on
//! the SOF marker and never fails the stream on line noise. Checksums are
//! computed but not enforced here: each frame carries both the received and
//! the expected FCS so the dispatcher can classify mismatches.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

use crate::constants::{FCS_LEN, HEADER_LEN, MAX_PAYLOAD_LEN, MIN_FRAME_LEN, SOF, TYPE_SHIFT};
use crate::error::ProtocolError;
use crate::frame::{FrameType, MtFrame};

/// XOR of every byte (LEN, CMD0, CMD1, DATA)
pub fn fcs(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// A decoded frame plus its checksum verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub frame: MtFrame,
    /// FCS byte received on the wire
    pub checksum: u8,
    /// FCS computed over the received bytes
    pub expected_checksum: u8,
}

impl InboundFrame {
    pub fn checksum_valid(&self) -> bool {
        self.checksum == self.expected_checksum
    }
}

/// Codec for the MT UART transport
#[derive(Debug, Default, Clone, Copy)]
pub struct MtCodec;

impl MtCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for MtCodec {
    type Item = InboundFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match src.iter().position(|&b| b == SOF) {
                Some(0) => {},
                Some(skip) => {
                    trace!("RX resync: dropped {}B", skip);
                    src.advance(skip);
                },
                None => {
                    if !src.is_empty() {
                        trace!("RX noise: dropped {}B", src.len());
                        src.clear();
                    }
                    return Ok(None);
                },
            }

            if src.len() < MIN_FRAME_LEN {
                return Ok(None);
            }

            let len = src[1] as usize;
            if len > MAX_PAYLOAD_LEN {
                warn!("RX bad len: {}", len);
                src.advance(1);
                continue;
            }

            let total = MIN_FRAME_LEN + len;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            let raw = src.split_to(total).freeze();
            let cmd0 = raw[2];
            let command = raw[3];
            let checksum = raw[total - FCS_LEN];
            let expected_checksum = fcs(&raw[1..total - FCS_LEN]);

            let Some(frame_type) = FrameType::from_code(cmd0 >> TYPE_SHIFT) else {
                warn!("RX bad type: CMD0={:02X}", cmd0);
                continue;
            };

            let frame = MtFrame {
                frame_type,
                subsystem: cmd0 & crate::constants::SUBSYSTEM_MASK,
                command,
                payload: raw.slice(HEADER_LEN..total - FCS_LEN),
            };
            trace!("RX {}", frame);

            return Ok(Some(InboundFrame {
                frame,
                checksum,
                expected_checksum,
            }));
        }
    }
}

impl Encoder<MtFrame> for MtCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: MtFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.payload.len();
        if len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::FrameTooLarge(len));
        }

        dst.reserve(MIN_FRAME_LEN + len);
        let start = dst.len();
        dst.put_u8(SOF);
        dst.put_u8(len as u8);
        dst.put_u8(item.cmd0());
        dst.put_u8(item.command);
        dst.extend_from_slice(&item.payload);
        let checksum = fcs(&dst[start + 1..]);
        dst.put_u8(checksum);

        trace!("TX {}", item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Subsystem;
    use bytes::Bytes;

    fn decode_all(bytes: &[u8]) -> Vec<InboundFrame> {
        let mut codec = MtCodec::new();
        let mut buf = BytesMut::from(bytes);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_encode_sys_ping() {
        let mut codec = MtCodec::new();
        let mut dst = BytesMut::new();
        let frame = MtFrame::new(FrameType::SyncRequest, Subsystem::Sys, 0x01, Bytes::new());
        codec.encode(frame, &mut dst).unwrap();
        assert_eq!(&dst[..], &[0xFE, 0x00, 0x21, 0x01, 0x20]);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let mut codec = MtCodec::new();
        let mut dst = BytesMut::new();
        let payload = Bytes::from(vec![0u8; MAX_PAYLOAD_LEN + 1]);
        let frame = MtFrame::new(FrameType::FireAndForget, Subsystem::Af, 0x01, payload);
        let err = codec.encode(frame, &mut dst).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge(251)));
        assert!(dst.is_empty());
    }

    #[test]
    fn test_decode_ping_reply() {
        let frames = decode_all(&[0xFE, 0x02, 0x61, 0x01, 0x79, 0x01, 0x1A]);
        assert_eq!(frames.len(), 1);
        let inbound = &frames[0];
        assert!(inbound.checksum_valid());
        assert_eq!(inbound.frame.frame_type, FrameType::SyncReply);
        assert_eq!(inbound.frame.subsystem(), Some(Subsystem::Sys));
        assert_eq!(inbound.frame.command, 0x01);
        assert_eq!(&inbound.frame.payload[..], &[0x79, 0x01]);
    }

    #[test]
    fn test_decode_waits_for_partial_frame() {
        let mut codec = MtCodec::new();
        let mut buf = BytesMut::from(&[0xFE, 0x02, 0x61][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[0x01, 0x79, 0x01]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[0x1A]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_resyncs_after_noise() {
        let frames = decode_all(&[
            0x00, 0x13, 0x37, // noise
            0xFE, 0x00, 0x21, 0x01, 0x20, // ping request
            0xAA, // noise
            0xFE, 0x02, 0x61, 0x01, 0x79, 0x01, 0x1A,
        ]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].frame.frame_type, FrameType::SyncRequest);
        assert_eq!(frames[1].frame.frame_type, FrameType::SyncReply);
    }

    #[test]
    fn test_decode_reports_checksum_mismatch() {
        let frames = decode_all(&[0xFE, 0x02, 0x61, 0x01, 0x79, 0x01, 0x00]);
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].checksum_valid());
        assert_eq!(frames[0].expected_checksum, 0x1A);
        assert_eq!(frames[0].checksum, 0x00);
    }

    #[test]
    fn test_decode_skips_invalid_type() {
        // CMD0 0x81 carries type code 4
        let frames = decode_all(&[0xFE, 0x00, 0x81, 0x01, 0x80, 0xFE, 0x00, 0x21, 0x01, 0x20]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame.frame_type, FrameType::SyncRequest);
    }

    #[test]
    fn test_framed_stream_roundtrip_over_duplex() {
        use futures::{SinkExt, StreamExt};
        use tokio_util::codec::{FramedRead, FramedWrite};

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let (a, b) = tokio::io::duplex(256);
            let mut writer = FramedWrite::new(a, MtCodec::new());
            let mut reader = FramedRead::new(b, MtCodec::new());

            let payload = Bytes::from_static(&[0x01, 0x02, 0x03]);
            let frame = MtFrame::new(FrameType::FireAndForget, Subsystem::Af, 0x81, payload);
            writer.send(frame.clone()).await.unwrap();

            let inbound = reader.next().await.unwrap().unwrap();
            assert!(inbound.checksum_valid());
            assert_eq!(inbound.frame, frame);
        });
    }
}
