//! DNY frame codec.
//!
//! A DNY frame is a length-delimited binary record, little-endian throughout:
//!
//! ```text
//! "DNY" | Length(u16) | PhysicalID(u32) | MessageID(u16) | Command(u8) | Payload | Checksum(u16)
//! ```
//!
//! `Length` counts the bytes from `PhysicalID` through `Checksum` inclusive.
//! `Checksum` is the wrapping unsigned 16-bit sum of every byte from the
//! `DNY` magic through the byte preceding the checksum.

use bytes::{BufMut, Bytes};

use crate::errors::{ProtocolError, Result};

/// Complete DNY protocol frame.
///
/// Holds the decoded header fields and the raw payload bytes. Payload
/// semantics are command-specific; per-command decoders live in
/// [`crate::payloads`] and are invoked lazily by handlers.
///
/// # Invariants
///
/// - Round trip: for every legal wire frame `F`, `encode(decode(F)) == F`.
/// - The encoder always writes a correct length field and checksum; frames
///   built through [`DnyFrame::new`] cannot carry a stale trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnyFrame {
    /// 32-bit hardware identifier of the device.
    pub physical_id: u32,

    /// Request/response correlation id. Replies echo the request's id.
    pub message_id: u16,

    /// Command byte (see [`crate::command`]).
    pub command: u8,

    /// Raw payload bytes, command-specific.
    pub payload: Bytes,
}

/// Bytes before the payload: magic (3) + length (2) + physical id (4) +
/// message id (2) + command (1).
const PREFIX_LEN: usize = 12;

/// Trailing checksum size.
const CHECKSUM_LEN: usize = 2;

impl DnyFrame {
    /// The 3-byte frame magic.
    pub const MAGIC: [u8; 3] = *b"DNY";

    /// Minimum buffer size worth attempting to parse.
    pub const MIN_FRAME_LEN: usize = 12;

    /// Value of the length field for an empty payload.
    pub const MIN_BODY_LEN: usize = 9;

    /// Create a new frame.
    #[must_use]
    pub fn new(physical_id: u32, message_id: u16, command: u8, payload: impl Into<Bytes>) -> Self {
        Self { physical_id, message_id, command, payload: payload.into() }
    }

    /// Total size of this frame on the wire.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        PREFIX_LEN + self.payload.len() + CHECKSUM_LEN
    }

    /// Canonical 8-hex-uppercase form of the physical id.
    #[must_use]
    pub fn device_id(&self) -> String {
        format!("{:08X}", self.physical_id)
    }

    /// Serialize the frame, recomputing the length field and checksum.
    pub fn encode(&self, dst: &mut impl BufMut) {
        let body_len = (Self::MIN_BODY_LEN + self.payload.len()) as u16;

        let mut buf = Vec::with_capacity(self.wire_len());
        buf.extend_from_slice(&Self::MAGIC);
        buf.extend_from_slice(&body_len.to_le_bytes());
        buf.extend_from_slice(&self.physical_id.to_le_bytes());
        buf.extend_from_slice(&self.message_id.to_le_bytes());
        buf.push(self.command);
        buf.extend_from_slice(&self.payload);

        let sum = checksum(&buf);
        buf.extend_from_slice(&sum.to_le_bytes());

        dst.put_slice(&buf);
    }

    /// Serialize into a fresh byte vector.
    #[must_use]
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        self.encode(&mut buf);
        buf
    }

    /// Decode a frame from wire bytes, validating length and checksum.
    ///
    /// The buffer must contain exactly the bytes the length field claims;
    /// trailing data is a [`ProtocolError::LengthMismatch`]. Use
    /// [`DnyFrame::claimed_wire_len`] to split concatenated frames first.
    ///
    /// # Errors
    ///
    /// - `FrameTooShort` if fewer than 12 bytes are available
    /// - `BadHeader` if the magic is absent
    /// - `LengthMismatch` if the length field disagrees with the buffer
    /// - `InvalidChecksum` if the trailer does not match the computed sum
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let total = Self::claimed_wire_len(bytes)?;

        if bytes.len() != total {
            return Err(ProtocolError::LengthMismatch { claimed: total, actual: bytes.len() });
        }

        Self::parse_exact(bytes)
    }

    /// Decode a frame whose length field may overstate the wire size.
    ///
    /// Legacy devices have been observed sending frames with truncated
    /// trailers: the length field claims more bytes than were actually sent,
    /// but the checksum sits at the end of what arrived. This parses against
    /// the actual buffer end instead of the claimed length.
    ///
    /// # Errors
    ///
    /// Same as [`DnyFrame::decode`], except `LengthMismatch` is only raised
    /// when the buffer is too small to hold even an empty-payload frame.
    pub fn decode_lenient(bytes: &[u8]) -> Result<Self> {
        check_prefix(bytes)?;

        if bytes.len() < PREFIX_LEN + CHECKSUM_LEN {
            return Err(ProtocolError::LengthMismatch {
                claimed: PREFIX_LEN + CHECKSUM_LEN,
                actual: bytes.len(),
            });
        }

        Self::parse_exact(bytes)
    }

    /// Total wire size the length field claims, without parsing the body.
    ///
    /// # Errors
    ///
    /// - `FrameTooShort` if fewer than 12 bytes are available
    /// - `BadHeader` if the magic is absent
    /// - `LengthMismatch` if the length field is below the empty-payload
    ///   minimum
    pub fn claimed_wire_len(bytes: &[u8]) -> Result<usize> {
        check_prefix(bytes)?;

        let body_len = u16::from_le_bytes([bytes[3], bytes[4]]) as usize;
        if body_len < Self::MIN_BODY_LEN {
            return Err(ProtocolError::LengthMismatch {
                claimed: 5 + body_len,
                actual: bytes.len(),
            });
        }

        Ok(5 + body_len)
    }

    /// Parse a buffer that is known to span exactly one frame.
    fn parse_exact(bytes: &[u8]) -> Result<Self> {
        let checksum_at = bytes.len() - CHECKSUM_LEN;
        let carried = u16::from_le_bytes([bytes[checksum_at], bytes[checksum_at + 1]]);
        let computed = checksum(&bytes[..checksum_at]);

        if carried != computed {
            return Err(ProtocolError::InvalidChecksum { computed, carried });
        }

        let physical_id = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        let message_id = u16::from_le_bytes([bytes[9], bytes[10]]);
        let command = bytes[11];
        let payload = Bytes::copy_from_slice(&bytes[PREFIX_LEN..checksum_at]);

        Ok(Self { physical_id, message_id, command, payload })
    }

    /// Parse a frame from a hex string, ignoring ASCII whitespace.
    ///
    /// Debugging helper for captured frames.
    ///
    /// # Errors
    ///
    /// `BadHeader` on non-hex input, otherwise as [`DnyFrame::decode`].
    pub fn parse_hex(hex: &str) -> Result<Self> {
        let compact: String = hex.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        if !compact.is_ascii() || compact.len() % 2 != 0 {
            return Err(ProtocolError::BadHeader);
        }

        let mut bytes = Vec::with_capacity(compact.len() / 2);
        for i in (0..compact.len()).step_by(2) {
            let pair = &compact[i..i + 2];
            let byte = u8::from_str_radix(pair, 16).map_err(|_| ProtocolError::BadHeader)?;
            bytes.push(byte);
        }

        Self::decode(&bytes)
    }
}

/// Wrapping unsigned 16-bit sum of the given bytes.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// Validate the fixed prefix: minimum size and magic.
fn check_prefix(bytes: &[u8]) -> Result<()> {
    if bytes.len() < DnyFrame::MIN_FRAME_LEN {
        return Err(ProtocolError::FrameTooShort {
            expected: DnyFrame::MIN_FRAME_LEN,
            actual: bytes.len(),
        });
    }

    if bytes[..3] != DnyFrame::MAGIC {
        return Err(ProtocolError::BadHeader);
    }

    Ok(())
}
