//! Tecan OEM Protocol
//!
//! Implements the Cavro OEM API framing used to address pumps on a shared
//! RS-232 / UART line.
//!
//! Frame layout: `STX | 0x31+address | payload | ETX | XOR checksum`.

pub mod commands;
mod error;
mod frame;
pub mod status;

pub use commands::ProbeCommand;
pub use error::DecodeError;
pub use frame::{checksum, decode, Decoded, Frame, FrameCodec, Response};
pub use status::{ErrorCode, Status};

/// Start-of-frame sentinel (STX)
pub const START_BYTE: u8 = 0x02;

/// End-of-frame sentinel (ETX)
pub const END_BYTE: u8 = 0x03;

/// Address byte for protocol address 0
pub const ADDRESS_BASE: u8 = 0x31;

/// Highest protocol address that keeps the address byte printable
pub const MAX_ADDRESS: u8 = 0x1F;

/// Address byte the pumps use when answering the host
pub const MASTER_ADDRESS_BYTE: u8 = 0x30;

/// Sequence byte sent ahead of every command (sequence 1, repeat flag clear)
pub const SEQUENCE_BYTE: u8 = 0x31;

/// Smallest well-formed frame: STX, address, status, ETX, checksum
pub const MIN_FRAME_LEN: usize = 5;

/// Default baud rate for Cavro pumps
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default per-attempt read timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Default number of send/receive attempts per command
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Maximum number of bytes read back for one reply
pub const MAX_READ_BYTES: usize = 50;
