//! Register payload (`0x20`, device→server).
//!
//! The device announces its SIM identity and basic hardware description.
//! The gateway confirms with a single `0x00` status byte.

use super::{read_padded_str, read_u16, require_len};
use crate::errors::{ProtocolError, Result};

/// ACK payload sent back for a successful register.
pub const REGISTER_ACK: u8 = 0x00;

/// Decoded register payload.
///
/// Layout: `ICCID(20 ASCII)` then optionally `device_type(u16 LE)`,
/// `direct_mode(u8)`, and a trailing ASCII firmware version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterPayload {
    /// SIM ICCID, the first 20 printable bytes of the payload.
    pub iccid: String,

    /// Hardware model code. Zero when the device omits it.
    pub device_type: u16,

    /// True when the device reports direct (non-gateway) wiring.
    pub direct_mode: bool,

    /// Firmware version string. Empty when omitted.
    pub firmware_version: String,
}

impl RegisterPayload {
    /// Decode from raw payload bytes.
    ///
    /// # Errors
    ///
    /// `InvalidPayload` if fewer than 20 bytes arrive or the ICCID field
    /// contains non-printable bytes.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        require_len(0x20, payload, 20)?;

        let iccid_raw = &payload[..20];
        if !iccid_raw.iter().all(u8::is_ascii_graphic) {
            return Err(ProtocolError::InvalidPayload {
                command: 0x20,
                reason: "ICCID field contains non-printable bytes".to_string(),
            });
        }
        let iccid = read_padded_str(iccid_raw);

        let device_type = if payload.len() >= 22 { read_u16(payload, 20) } else { 0 };
        let direct_mode = payload.len() >= 23 && payload[22] == 0x01;
        let firmware_version =
            if payload.len() > 23 { read_padded_str(&payload[23..]) } else { String::new() };

        Ok(Self { iccid, device_type, direct_mode, firmware_version })
    }

    /// Encode to payload bytes (used by tests and simulated devices).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(23 + self.firmware_version.len());
        super::write_padded_str(&mut buf, &self.iccid, 20);
        buf.extend_from_slice(&self.device_type.to_le_bytes());
        buf.push(u8::from(self.direct_mode));
        buf.extend_from_slice(self.firmware_version.as_bytes());
        buf
    }
}
