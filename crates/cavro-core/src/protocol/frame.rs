//! Frame encoding/decoding
//!
//! Implements the OEM API byte frame with its XOR checksum.
//!
//! Frame format:
//! - 1 byte: STX (0x02)
//! - 1 byte: address (0x31 + protocol address from the host, 0x30 from a pump)
//! - 1 byte: sequence byte (host) or status byte (pump)
//! - N bytes: ASCII command or reply data
//! - 1 byte: ETX (0x03)
//! - 1 byte: XOR of every byte from STX through ETX

use std::fmt;

use super::{
    DecodeError, Status, ADDRESS_BASE, END_BYTE, MASTER_ADDRESS_BYTE, MAX_ADDRESS, MIN_FRAME_LEN,
    SEQUENCE_BYTE, START_BYTE,
};

/// XOR of all bytes in `bytes`
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// An encoded wire frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Encode a host-to-pump command frame.
    ///
    /// # Panics
    ///
    /// Panics if `address` is above [`MAX_ADDRESS`] or `command` is not ASCII.
    pub fn encode(address: u8, command: &str) -> Self {
        assert!(
            address <= MAX_ADDRESS,
            "protocol address {address:#04x} out of range (max {MAX_ADDRESS:#04x})"
        );
        assert!(command.is_ascii(), "command {command:?} is not ASCII");

        Self::assemble(ADDRESS_BASE + address, SEQUENCE_BYTE, command.as_bytes())
    }

    /// Encode a pump-to-host reply frame carrying `status_byte` and `data`.
    pub fn reply(status_byte: u8, data: &str) -> Self {
        Self::assemble(MASTER_ADDRESS_BYTE, status_byte, data.as_bytes())
    }

    fn assemble(address_byte: u8, control_byte: u8, body: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(MIN_FRAME_LEN + body.len());
        bytes.push(START_BYTE);
        bytes.push(address_byte);
        bytes.push(control_byte);
        bytes.extend_from_slice(body);
        bytes.push(END_BYTE);
        bytes.push(checksum(&bytes));
        Self { bytes }
    }

    /// Raw frame bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the frame, returning its bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Encoded length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Frames always contain at least the markers and checksum
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// A validated reply from a pump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Raw address byte
    pub address_byte: u8,
    /// Raw status byte
    pub status_byte: u8,
    /// ASCII payload between the status byte and ETX
    pub data: String,
}

impl Response {
    /// Protocol address encoded in the frame, if it is a device address
    pub fn address(&self) -> Option<u8> {
        self.address_byte
            .checked_sub(ADDRESS_BASE)
            .filter(|a| *a <= MAX_ADDRESS)
    }

    /// Decoded status byte
    pub fn status(&self) -> Status {
        Status::from_byte(self.status_byte)
    }

    /// Whether the pump reported itself busy
    pub fn is_busy(&self) -> bool {
        self.status().is_busy()
    }

    /// Error code carried by the status byte
    pub fn error_code(&self) -> super::ErrorCode {
        self.status().error_code()
    }
}

/// Outcome of decoding one read from the line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Nothing was received before the read timed out
    NoData,
    /// A frame passed marker and checksum validation
    Response(Response),
}

/// Decode raw bytes read from the line.
///
/// Noise ahead of STX and anything after the checksum byte is ignored.
pub fn decode(bytes: &[u8]) -> Result<Decoded, DecodeError> {
    if bytes.is_empty() {
        return Ok(Decoded::NoData);
    }

    let start = bytes
        .iter()
        .position(|&b| b == START_BYTE)
        .ok_or(DecodeError::MissingMarkers)?;
    let frame = &bytes[start..];

    let Some(end) = frame.iter().position(|&b| b == END_BYTE) else {
        return Err(if frame.len() < MIN_FRAME_LEN {
            DecodeError::Truncated
        } else {
            DecodeError::MissingMarkers
        });
    };

    let Some(&actual) = frame.get(end + 1) else {
        return Err(DecodeError::Truncated);
    };

    let expected = checksum(&frame[..=end]);
    if expected != actual {
        return Err(DecodeError::BadChecksum { expected, actual });
    }

    // STX, address and status must precede ETX
    if end < 3 {
        return Err(DecodeError::Truncated);
    }

    let data = &frame[3..end];
    if !data.is_ascii() {
        return Err(DecodeError::NonAsciiData);
    }

    Ok(Decoded::Response(Response {
        address_byte: frame[1],
        status_byte: frame[2],
        data: data.iter().map(|&b| char::from(b)).collect(),
    }))
}

/// Per-device encoder that remembers the last frame it produced.
///
/// Some firmware only accepts an identical resend after a timeout, so
/// retries go through [`FrameCodec::emit_repeat`] instead of re-encoding.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    address: u8,
    last: Option<Frame>,
}

impl FrameCodec {
    /// Create a codec for one protocol address.
    ///
    /// # Panics
    ///
    /// Panics if `address` is above [`MAX_ADDRESS`].
    pub fn new(address: u8) -> Self {
        assert!(
            address <= MAX_ADDRESS,
            "protocol address {address:#04x} out of range (max {MAX_ADDRESS:#04x})"
        );
        Self { address, last: None }
    }

    /// Protocol address this codec encodes for
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Encode `command` and remember it for repeats
    pub fn encode(&mut self, command: &str) -> &Frame {
        self.last.insert(Frame::encode(self.address, command))
    }

    /// The previously encoded frame, byte for byte
    pub fn emit_repeat(&self) -> Option<&Frame> {
        self.last.as_ref()
    }
}
