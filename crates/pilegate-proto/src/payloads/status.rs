//! Main-status heartbeat payload (`0x11`, device→server, no reply).
//!
//! Carries the device's self-description: firmware, SIM, IMEI, module and
//! host types, signal strength, RTC presence, and the device clock.

use super::{read_padded_str, read_u32, require_len};
use crate::errors::Result;

/// Decoded `0x11` payload.
///
/// Layout: `firmware(16 ASCII)` | `iccid(20 ASCII)` | `imei(15 ASCII)` |
/// `module_type(u8)` | `host_type(u8)` | `signal_strength(u8)` | `rtc(u8)` |
/// `device_time(u32 LE, Unix seconds)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainStatusPayload {
    /// Firmware version string.
    pub firmware_version: String,
    /// SIM ICCID as reported in the status block.
    pub iccid: String,
    /// Cellular module IMEI.
    pub imei: String,
    /// Cellular module type code.
    pub module_type: u8,
    /// Host board type code.
    pub host_type: u8,
    /// Signal strength, vendor scale 0–31.
    pub signal_strength: u8,
    /// True when the device carries a battery-backed RTC.
    pub has_rtc: bool,
    /// Device wall clock, Unix seconds.
    pub device_time: u32,
}

const FIRMWARE_LEN: usize = 16;
const ICCID_LEN: usize = 20;
const IMEI_LEN: usize = 15;
const FIXED_LEN: usize = FIRMWARE_LEN + ICCID_LEN + IMEI_LEN + 4 + 4;

impl MainStatusPayload {
    /// Decode from raw payload bytes.
    ///
    /// # Errors
    ///
    /// `InvalidPayload` when the payload is shorter than the fixed layout.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        require_len(0x11, payload, FIXED_LEN)?;

        let mut at = 0;
        let firmware_version = read_padded_str(&payload[at..at + FIRMWARE_LEN]);
        at += FIRMWARE_LEN;
        let iccid = read_padded_str(&payload[at..at + ICCID_LEN]);
        at += ICCID_LEN;
        let imei = read_padded_str(&payload[at..at + IMEI_LEN]);
        at += IMEI_LEN;

        let module_type = payload[at];
        let host_type = payload[at + 1];
        let signal_strength = payload[at + 2];
        let has_rtc = payload[at + 3] == 0x01;
        let device_time = read_u32(payload, at + 4);

        Ok(Self {
            firmware_version,
            iccid,
            imei,
            module_type,
            host_type,
            signal_strength,
            has_rtc,
            device_time,
        })
    }

    /// Encode to payload bytes (used by tests and simulated devices).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FIXED_LEN);
        super::write_padded_str(&mut buf, &self.firmware_version, FIRMWARE_LEN);
        super::write_padded_str(&mut buf, &self.iccid, ICCID_LEN);
        super::write_padded_str(&mut buf, &self.imei, IMEI_LEN);
        buf.push(self.module_type);
        buf.push(self.host_type);
        buf.push(self.signal_strength);
        buf.push(u8::from(self.has_rtc));
        buf.extend_from_slice(&self.device_time.to_le_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MainStatusPayload {
        MainStatusPayload {
            firmware_version: "V1.3.9".to_string(),
            iccid: "89860429162390488290".to_string(),
            imei: "861234567890123".to_string(),
            module_type: 2,
            host_type: 1,
            signal_strength: 23,
            has_rtc: true,
            device_time: 1_700_000_000,
        }
    }

    #[test]
    fn round_trip() {
        let original = sample();
        let decoded = MainStatusPayload::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn reject_short_payload() {
        assert!(MainStatusPayload::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut bytes = sample().encode();
        bytes.extend_from_slice(&[0xDE, 0xAD]);
        let decoded = MainStatusPayload::decode(&bytes).unwrap();
        assert_eq!(decoded.signal_strength, 23);
    }
}
