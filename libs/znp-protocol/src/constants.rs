//! MT protocol constants
//!
//! UART transport frame: `SOF | LEN | CMD0 | CMD1 | DATA[LEN] | FCS`

/// Start-of-frame marker
pub const SOF: u8 = 0xFE;

/// SOF + LEN + CMD0 + CMD1
pub const HEADER_LEN: usize = 4;

/// Frame check sequence trailer
pub const FCS_LEN: usize = 1;

/// Smallest possible frame (empty payload)
pub const MIN_FRAME_LEN: usize = HEADER_LEN + FCS_LEN;

/// Largest payload the device accepts in one frame
pub const MAX_PAYLOAD_LEN: usize = 250;

/// CMD0 bit layout
pub const TYPE_SHIFT: u8 = 5;
pub const SUBSYSTEM_MASK: u8 = 0x1F;

/// SYS command ids used by reset handling
pub const SYS_RESET_REQ: u8 = 0x00;
pub const SYS_RESET_IND: u8 = 0x80;

/// RES0 generic error response
pub const RES0_RPC_ERROR: u8 = 0x00;
