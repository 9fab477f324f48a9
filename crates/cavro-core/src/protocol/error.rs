//! Frame decoding errors

use thiserror::Error;

/// Reasons a received byte sequence was rejected as a frame.
///
/// These are local to one decode attempt. The dispatcher retries on every
/// one of them and never hands them to its caller.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame truncated")]
    Truncated,

    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    BadChecksum { expected: u8, actual: u8 },

    #[error("Frame start/end markers missing or out of order")]
    MissingMarkers,

    #[error("Reply data is not ASCII")]
    NonAsciiData,
}
