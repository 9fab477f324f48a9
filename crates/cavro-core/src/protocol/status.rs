//! Status byte decoding
//!
//! Cavro pumps answer every command with a status byte laid out as
//! `0 1 R 0 E E E E`: bit 5 is set while the pump is ready and the low
//! nibble carries the error code. The layout follows the vendor OEM
//! documentation for the XCalibur family and should be confirmed against
//! the pump model in use.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bit set in the status byte while the pump is ready
pub const READY_BIT: u8 = 0x20;

/// Mask selecting the error code nibble
pub const ERROR_MASK: u8 = 0x0F;

/// Pump error codes reported in the status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    NoError,
    Initialization,
    InvalidCommand,
    InvalidOperand,
    InvalidCommandSequence,
    EepromFailure,
    DeviceNotInitialized,
    PlungerOverload,
    ValveOverload,
    PlungerMoveNotAllowed,
    CommandOverflow,
    /// A code outside the documented taxonomy
    Unknown(u8),
}

impl ErrorCode {
    /// Map the low nibble of a status byte to an error code
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ErrorCode::NoError,
            1 => ErrorCode::Initialization,
            2 => ErrorCode::InvalidCommand,
            3 => ErrorCode::InvalidOperand,
            4 => ErrorCode::InvalidCommandSequence,
            6 => ErrorCode::EepromFailure,
            7 => ErrorCode::DeviceNotInitialized,
            9 => ErrorCode::PlungerOverload,
            10 => ErrorCode::ValveOverload,
            11 => ErrorCode::PlungerMoveNotAllowed,
            15 => ErrorCode::CommandOverflow,
            other => ErrorCode::Unknown(other),
        }
    }

    /// Numeric code as reported by the pump
    pub fn code(&self) -> u8 {
        match self {
            ErrorCode::NoError => 0,
            ErrorCode::Initialization => 1,
            ErrorCode::InvalidCommand => 2,
            ErrorCode::InvalidOperand => 3,
            ErrorCode::InvalidCommandSequence => 4,
            ErrorCode::EepromFailure => 6,
            ErrorCode::DeviceNotInitialized => 7,
            ErrorCode::PlungerOverload => 9,
            ErrorCode::ValveOverload => 10,
            ErrorCode::PlungerMoveNotAllowed => 11,
            ErrorCode::CommandOverflow => 15,
            ErrorCode::Unknown(code) => *code,
        }
    }

    /// Whether this code signals a fault
    pub fn is_error(&self) -> bool {
        !matches!(self, ErrorCode::NoError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::NoError => write!(f, "no error"),
            ErrorCode::Initialization => write!(f, "initialization error"),
            ErrorCode::InvalidCommand => write!(f, "invalid command"),
            ErrorCode::InvalidOperand => write!(f, "invalid operand"),
            ErrorCode::InvalidCommandSequence => write!(f, "invalid command sequence"),
            ErrorCode::EepromFailure => write!(f, "EEPROM failure"),
            ErrorCode::DeviceNotInitialized => write!(f, "device not initialized"),
            ErrorCode::PlungerOverload => write!(f, "plunger overload"),
            ErrorCode::ValveOverload => write!(f, "valve overload"),
            ErrorCode::PlungerMoveNotAllowed => write!(f, "plunger move not allowed"),
            ErrorCode::CommandOverflow => write!(f, "command overflow"),
            ErrorCode::Unknown(code) => write!(f, "unknown error code {code}"),
        }
    }
}

/// Decoded status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status {
    raw: u8,
}

impl Status {
    /// Wrap a raw status byte. Every value is accepted.
    pub fn from_byte(raw: u8) -> Self {
        Self { raw }
    }

    /// Raw status byte
    pub fn raw(&self) -> u8 {
        self.raw
    }

    /// Pump is executing a command
    pub fn is_busy(&self) -> bool {
        self.raw & READY_BIT == 0
    }

    /// Error code from the low nibble
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_code(self.raw & ERROR_MASK)
    }

    /// Pump is idle and reports no error
    pub fn is_ready_for_next_command(&self) -> bool {
        !self.is_busy() && !self.error_code().is_error()
    }
}

impl From<u8> for Status {
    fn from(raw: u8) -> Self {
        Self::from_byte(raw)
    }
}
