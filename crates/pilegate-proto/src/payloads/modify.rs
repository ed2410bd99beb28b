//! Modify-charge payload (`0x8A`).
//!
//! Server→device request to change a running session's remaining time or
//! energy. The device replies with a 1-byte status.

use super::{read_padded_str, read_u32, require_len, write_padded_str};
use crate::errors::{ProtocolError, Result};

/// `modify_type`: adjust remaining time (minutes).
pub const MODIFY_TIME: u8 = 1;

/// `modify_type`: adjust remaining energy (watt-hours).
pub const MODIFY_ENERGY: u8 = 2;

/// Device status: accepted.
pub const MODIFY_OK: u8 = 0x00;

/// Device status: the port is not charging.
pub const MODIFY_NOT_CHARGING: u8 = 0x01;

/// Device status: bad port or modify mode.
pub const MODIFY_BAD_PORT: u8 = 0x03;

/// Server→device modify request.
///
/// Layout: `port(u8)` | `modify_type(u8)` | `new_value(u32 LE)` |
/// `order_id(16 ASCII)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyCharge {
    /// Target port, 1-based.
    pub port: u8,
    /// [`MODIFY_TIME`] or [`MODIFY_ENERGY`].
    pub modify_type: u8,
    /// New remaining quantity; must be non-zero.
    pub new_value: u32,
    /// Order being modified.
    pub order_id: String,
}

const ORDER_LEN: usize = 16;
const FIXED_LEN: usize = 1 + 1 + 4 + ORDER_LEN;

impl ModifyCharge {
    /// Encode to payload bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FIXED_LEN);
        buf.push(self.port);
        buf.push(self.modify_type);
        buf.extend_from_slice(&self.new_value.to_le_bytes());
        write_padded_str(&mut buf, &self.order_id, ORDER_LEN);
        buf
    }

    /// Decode from payload bytes.
    ///
    /// # Errors
    ///
    /// `InvalidPayload` when the payload is shorter than the fixed layout.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        require_len(0x8A, payload, FIXED_LEN)?;

        Ok(Self {
            port: payload[0],
            modify_type: payload[1],
            new_value: read_u32(payload, 2),
            order_id: read_padded_str(&payload[6..6 + ORDER_LEN]),
        })
    }

    /// Request validation before dispatch.
    ///
    /// # Errors
    ///
    /// `InvalidPayload` when the port is outside 1–16, the modify type is
    /// unknown, the value is zero, or the order id is empty.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| ProtocolError::InvalidPayload { command: 0x8A, reason };

        if !(1..=16).contains(&self.port) {
            return Err(fail(format!("port {} out of range 1-16", self.port)));
        }
        if self.modify_type != MODIFY_TIME && self.modify_type != MODIFY_ENERGY {
            return Err(fail(format!("unknown modify type {}", self.modify_type)));
        }
        if self.new_value == 0 {
            return Err(fail("zero value".to_string()));
        }
        if self.order_id.is_empty() {
            return Err(fail("empty order id".to_string()));
        }

        Ok(())
    }
}

/// Vendor modify status labels.
#[must_use]
pub fn modify_status_label(code: u8) -> &'static str {
    match code {
        MODIFY_OK => "成功",
        MODIFY_NOT_CHARGING => "未在充电",
        MODIFY_BAD_PORT => "端口或模式错误",
        _ => "未知错误",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ModifyCharge {
        ModifyCharge {
            port: 2,
            modify_type: MODIFY_TIME,
            new_value: 90,
            order_id: "ORDER_X".to_string(),
        }
    }

    #[test]
    fn round_trip() {
        let original = sample();
        let decoded = ModifyCharge::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn validation() {
        assert!(sample().validate().is_ok());

        let mut m = sample();
        m.port = 0;
        assert!(m.validate().is_err());

        let mut m = sample();
        m.modify_type = 3;
        assert!(m.validate().is_err());

        let mut m = sample();
        m.new_value = 0;
        assert!(m.validate().is_err());

        let mut m = sample();
        m.order_id = String::new();
        assert!(m.validate().is_err());
    }

    #[test]
    fn status_labels() {
        assert_eq!(modify_status_label(MODIFY_OK), "成功");
        assert_eq!(modify_status_label(MODIFY_NOT_CHARGING), "未在充电");
        assert_eq!(modify_status_label(MODIFY_BAD_PORT), "端口或模式错误");
    }
}
