//! MT frame model
//!
//! A frame is identified by its type, subsystem and command id. The payload is
//! opaque here; the schema gives it meaning.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{SUBSYSTEM_MASK, TYPE_SHIFT};
use crate::error::ProtocolError;

/// Frame type selector carried in the top bits of CMD0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameType {
    /// Reserved poll type, never produced or consumed by the engine
    Poll,
    /// Synchronous request, answered by exactly one `SyncReply`
    SyncRequest,
    /// Fire-and-forget request or asynchronous notification
    FireAndForget,
    /// Synchronous reply
    SyncReply,
}

impl FrameType {
    pub fn code(self) -> u8 {
        match self {
            FrameType::Poll => 0,
            FrameType::SyncRequest => 1,
            FrameType::FireAndForget => 2,
            FrameType::SyncReply => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FrameType::Poll),
            1 => Some(FrameType::SyncRequest),
            2 => Some(FrameType::FireAndForget),
            3 => Some(FrameType::SyncReply),
            _ => None,
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameType::Poll => write!(f, "POLL"),
            FrameType::SyncRequest => write!(f, "SREQ"),
            FrameType::FireAndForget => write!(f, "AREQ"),
            FrameType::SyncReply => write!(f, "SRSP"),
        }
    }
}

/// MT subsystem identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Subsystem {
    Res0,
    Sys,
    Mac,
    Nwk,
    Af,
    Zdo,
    Sapi,
    Util,
    Dbg,
    App,
    AppCnf,
    GreenPower,
}

impl Subsystem {
    pub const ALL: [Subsystem; 12] = [
        Subsystem::Res0,
        Subsystem::Sys,
        Subsystem::Mac,
        Subsystem::Nwk,
        Subsystem::Af,
        Subsystem::Zdo,
        Subsystem::Sapi,
        Subsystem::Util,
        Subsystem::Dbg,
        Subsystem::App,
        Subsystem::AppCnf,
        Subsystem::GreenPower,
    ];

    pub fn code(self) -> u8 {
        match self {
            Subsystem::Res0 => 0,
            Subsystem::Sys => 1,
            Subsystem::Mac => 2,
            Subsystem::Nwk => 3,
            Subsystem::Af => 4,
            Subsystem::Zdo => 5,
            Subsystem::Sapi => 6,
            Subsystem::Util => 7,
            Subsystem::Dbg => 8,
            Subsystem::App => 9,
            Subsystem::AppCnf => 15,
            Subsystem::GreenPower => 21,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Subsystem::Res0 => "RES0",
            Subsystem::Sys => "SYS",
            Subsystem::Mac => "MAC",
            Subsystem::Nwk => "NWK",
            Subsystem::Af => "AF",
            Subsystem::Zdo => "ZDO",
            Subsystem::Sapi => "SAPI",
            Subsystem::Util => "UTIL",
            Subsystem::Dbg => "DBG",
            Subsystem::App => "APP",
            Subsystem::AppCnf => "APP_CNF",
            Subsystem::GreenPower => "GREENPOWER",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Subsystem {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|sub| sub.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtocolError::UnknownSubsystem(s.to_string()))
    }
}

/// One MT frame without transport framing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtFrame {
    pub frame_type: FrameType,
    /// Raw subsystem code (kept raw so unknown subsystems still frame)
    pub subsystem: u8,
    pub command: u8,
    pub payload: Bytes,
}

impl MtFrame {
    pub fn new(frame_type: FrameType, subsystem: Subsystem, command: u8, payload: Bytes) -> Self {
        Self {
            frame_type,
            subsystem: subsystem.code(),
            command,
            payload,
        }
    }

    /// CMD0 byte: type in bits 5..7, subsystem in bits 0..4
    pub fn cmd0(&self) -> u8 {
        (self.frame_type.code() << TYPE_SHIFT) | (self.subsystem & SUBSYSTEM_MASK)
    }

    pub fn subsystem(&self) -> Option<Subsystem> {
        Subsystem::from_code(self.subsystem)
    }
}

impl fmt::Display for MtFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subsystem() {
            Some(sub) => write!(
                f,
                "{} {}:{:02X} len={}",
                self.frame_type,
                sub,
                self.command,
                self.payload.len()
            ),
            None => write!(
                f,
                "{} ?{:02X}:{:02X} len={}",
                self.frame_type,
                self.subsystem,
                self.command,
                self.payload.len()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd0_layout() {
        let frame = MtFrame::new(FrameType::SyncRequest, Subsystem::Sys, 0x01, Bytes::new());
        assert_eq!(frame.cmd0(), 0x21);

        let frame = MtFrame::new(FrameType::FireAndForget, Subsystem::Zdo, 0xC1, Bytes::new());
        assert_eq!(frame.cmd0(), 0x45);

        let frame = MtFrame::new(FrameType::SyncReply, Subsystem::Res0, 0x00, Bytes::new());
        assert_eq!(frame.cmd0(), 0x60);
    }

    #[test]
    fn test_subsystem_names() {
        assert_eq!("sys".parse::<Subsystem>().unwrap(), Subsystem::Sys);
        assert_eq!("APP_CNF".parse::<Subsystem>().unwrap(), Subsystem::AppCnf);
        assert!("BOGUS".parse::<Subsystem>().is_err());
        assert_eq!(Subsystem::from_code(21), Some(Subsystem::GreenPower));
        assert_eq!(Subsystem::from_code(14), None);
    }

    #[test]
    fn test_frame_type_codes() {
        for code in 0..4 {
            assert_eq!(FrameType::from_code(code).map(FrameType::code), Some(code));
        }
        assert_eq!(FrameType::from_code(4), None);
    }
}
