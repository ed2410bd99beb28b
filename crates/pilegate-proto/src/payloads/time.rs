//! Server-time payload (`0x12`/`0x22`).
//!
//! Stateless: the request carries no payload, the reply carries the current
//! Unix time as `u32` little-endian.

use super::{read_u32, require_len};
use crate::errors::Result;

/// Encode a server-time reply payload.
#[must_use]
pub fn encode_server_time(unix_secs: u32) -> Vec<u8> {
    unix_secs.to_le_bytes().to_vec()
}

/// Decode a server-time reply payload.
///
/// # Errors
///
/// `InvalidPayload` when fewer than 4 bytes arrive.
pub fn decode_server_time(payload: &[u8]) -> Result<u32> {
    require_len(0x12, payload, 4)?;
    Ok(read_u32(payload, 0))
}
