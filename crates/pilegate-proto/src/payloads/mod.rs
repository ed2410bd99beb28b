//! Per-command payload codecs.
//!
//! DNY payloads are raw little-endian byte layouts, one module per command
//! family. Decoders are invoked lazily by handlers; the frame codec never
//! touches payload bytes.

pub mod charge;
pub mod locate;
pub mod modify;
pub mod register;
pub mod settlement;
pub mod status;
pub mod time;

use crate::errors::{ProtocolError, Result};

/// Read a fixed-width ASCII field, trimming NUL/space padding.
pub(crate) fn read_padded_str(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|&b| b != 0 && b != b' ').map_or(0, |i| i + 1);
    bytes[..end].iter().map(|&b| if b.is_ascii_graphic() { b as char } else { '.' }).collect()
}

/// Write an ASCII field zero-padded to `width`, truncating if longer.
pub(crate) fn write_padded_str(dst: &mut Vec<u8>, value: &str, width: usize) {
    let bytes = value.as_bytes();
    let take = bytes.len().min(width);
    dst.extend_from_slice(&bytes[..take]);
    dst.resize(dst.len() + (width - take), 0);
}

/// Require at least `need` payload bytes for `command`.
pub(crate) fn require_len(command: u8, payload: &[u8], need: usize) -> Result<()> {
    if payload.len() < need {
        return Err(ProtocolError::InvalidPayload {
            command,
            reason: format!("need {need} bytes, got {}", payload.len()),
        });
    }
    Ok(())
}

/// Read a `u16` little-endian at `at`. Caller has bounds-checked.
pub(crate) fn read_u16(payload: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([payload[at], payload[at + 1]])
}

/// Read a `u32` little-endian at `at`. Caller has bounds-checked.
pub(crate) fn read_u32(payload: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([payload[at], payload[at + 1], payload[at + 2], payload[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_str_round_trip() {
        let mut buf = Vec::new();
        write_padded_str(&mut buf, "ORDER_X", 16);
        assert_eq!(buf.len(), 16);
        assert_eq!(read_padded_str(&buf), "ORDER_X");
    }

    #[test]
    fn padded_str_truncates() {
        let mut buf = Vec::new();
        write_padded_str(&mut buf, "0123456789ABCDEF_OVERFLOW", 16);
        assert_eq!(buf.len(), 16);
        assert_eq!(read_padded_str(&buf), "0123456789ABCDEF");
    }

    #[test]
    fn padded_str_trims_spaces() {
        assert_eq!(read_padded_str(b"CARD01  \0\0"), "CARD01");
    }
}
