//! Public notifications
//!
//! Every `Znp` handle owns one broadcast channel. Slow subscribers lag and
//! lose the oldest events; the engine never blocks on them.

use serde_json::Value;
use znp_protocol::{MtFrame, Subsystem};

#[derive(Debug, Clone, PartialEq)]
pub enum ZnpEvent {
    /// Transport opened by `init`
    Ready,
    /// Transport closed, by `close` or after a transport error
    Close,
    /// Every inbound frame that passed its checksum, before dispatch
    Data(MtFrame),
    /// Device-originated AREQ notification
    Indication {
        subsystem: Subsystem,
        name: String,
        data: Value,
    },
}

impl ZnpEvent {
    pub fn is_indication(&self, subsystem: Subsystem, name: &str) -> bool {
        matches!(self, ZnpEvent::Indication { subsystem: s, name: n, .. } if *s == subsystem && n == name)
    }
}
