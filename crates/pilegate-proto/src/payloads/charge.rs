//! Charge-control payload (`0x82`).
//!
//! Server→device carries the full start/stop request. The device's reply
//! reuses the same command byte with a 1–2 byte status payload; the
//! [`is_device_ack`] predicate is the single place that distinction lives.

use super::{read_padded_str, read_u16, read_u32, require_len, write_padded_str};
use crate::errors::{ProtocolError, Result};

/// `charge_cmd` value for starting a session.
pub const CHARGE_START: u8 = 0x01;

/// `charge_cmd` value for stopping a session.
pub const CHARGE_STOP: u8 = 0x00;

/// Server→device charge-control request.
///
/// Layout: `rate_mode(u8)` | `balance(u32 LE)` | `port(u8)` |
/// `charge_cmd(u8)` | `value(u16 LE)` | `order_no(16 ASCII)` |
/// `max_duration(u16 LE)` | `max_power(u16 LE)` | `qr_light(u8)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeControl {
    /// Rate plan selector.
    pub rate_mode: u8,
    /// Account balance shown on the device, vendor cents.
    pub balance: u32,
    /// Target port, 1-based.
    pub port: u8,
    /// [`CHARGE_START`] or [`CHARGE_STOP`].
    pub charge_cmd: u8,
    /// Purchased quantity: minutes or watt-hours depending on rate mode.
    pub value: u16,
    /// Order identifier, ASCII, zero-padded to 16 bytes on the wire.
    pub order_no: String,
    /// Hard session cap in minutes.
    pub max_duration: u16,
    /// Hard power cap in watts.
    pub max_power: u16,
    /// QR-code lamp behavior flag.
    pub qr_light: u8,
}

const ORDER_LEN: usize = 16;
const FIXED_LEN: usize = 1 + 4 + 1 + 1 + 2 + ORDER_LEN + 2 + 2 + 1;

impl ChargeControl {
    /// Encode to payload bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FIXED_LEN);
        buf.push(self.rate_mode);
        buf.extend_from_slice(&self.balance.to_le_bytes());
        buf.push(self.port);
        buf.push(self.charge_cmd);
        buf.extend_from_slice(&self.value.to_le_bytes());
        write_padded_str(&mut buf, &self.order_no, ORDER_LEN);
        buf.extend_from_slice(&self.max_duration.to_le_bytes());
        buf.extend_from_slice(&self.max_power.to_le_bytes());
        buf.push(self.qr_light);
        buf
    }

    /// Decode from payload bytes.
    ///
    /// # Errors
    ///
    /// `InvalidPayload` when the payload is shorter than the fixed layout.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        require_len(0x82, payload, FIXED_LEN)?;

        Ok(Self {
            rate_mode: payload[0],
            balance: read_u32(payload, 1),
            port: payload[5],
            charge_cmd: payload[6],
            value: read_u16(payload, 7),
            order_no: read_padded_str(&payload[9..9 + ORDER_LEN]),
            max_duration: read_u16(payload, 25),
            max_power: read_u16(payload, 27),
            qr_light: payload[29],
        })
    }
}

/// Device-initiated response detection.
///
/// A `0x82`/`0x8A`/`0x96` frame whose payload is at most 2 bytes is the
/// device answering a server command (status code only), never a server
/// request.
#[must_use]
pub fn is_device_ack(payload: &[u8]) -> bool {
    payload.len() <= 2
}

/// Device's status reply to a charge-control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeAck {
    /// Status code, see [`charge_status_label`].
    pub status: u8,
}

impl ChargeAck {
    /// Decode the 1–2 byte status payload.
    ///
    /// # Errors
    ///
    /// `InvalidPayload` on an empty payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Err(ProtocolError::InvalidPayload {
                command: 0x82,
                reason: "empty status payload".to_string(),
            });
        }
        Ok(Self { status: payload[0] })
    }

    /// True for the `0x00` success code.
    #[must_use]
    pub fn is_success(self) -> bool {
        self.status == 0x00
    }
}

/// Vendor charge-control status table. Reported verbatim in notifications.
#[must_use]
pub fn charge_status_label(code: u8) -> &'static str {
    match code {
        0x00 => "成功",
        0x01 => "端口未插枪",
        0x02 => "余额不足",
        0x03 => "端口或费率不存在",
        0x04 => "端口故障",
        0x05 => "功率过载",
        0x06 => "存储器损坏",
        0x07 => "多端口冲突",
        0x08 => "继电器故障",
        0x09 => "继电器粘连",
        0x0A => "短路",
        0x0B => "烟雾报警",
        0x0C => "过压",
        0x0D => "欠压",
        0x0E => "无响应",
        _ => "未知错误",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ChargeControl {
        ChargeControl {
            rate_mode: 0,
            balance: 1_010,
            port: 1,
            charge_cmd: CHARGE_START,
            value: 60,
            order_no: "ORDER_X".to_string(),
            max_duration: 600,
            max_power: 2_200,
            qr_light: 0,
        }
    }

    #[test]
    fn round_trip() {
        let original = sample();
        let decoded = ChargeControl::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn encode_layout() {
        let wire = sample().encode();
        assert_eq!(wire.len(), 30);
        assert_eq!(wire[0], 0); // rate_mode
        assert_eq!(u32::from_le_bytes([wire[1], wire[2], wire[3], wire[4]]), 1_010);
        assert_eq!(wire[5], 1); // port
        assert_eq!(wire[6], CHARGE_START);
        assert_eq!(u16::from_le_bytes([wire[7], wire[8]]), 60);
        assert_eq!(&wire[9..16], b"ORDER_X");
        assert_eq!(wire[16], 0); // zero padding
    }

    #[test]
    fn ack_predicate() {
        assert!(is_device_ack(&[0x00]));
        assert!(is_device_ack(&[0x02, 0x01]));
        assert!(!is_device_ack(&sample().encode()));
    }

    #[test]
    fn ack_decode() {
        assert!(ChargeAck::decode(&[0x00]).unwrap().is_success());
        assert!(!ChargeAck::decode(&[0x02]).unwrap().is_success());
        assert!(ChargeAck::decode(&[]).is_err());
    }

    #[test]
    fn status_labels() {
        assert_eq!(charge_status_label(0x00), "成功");
        assert_eq!(charge_status_label(0x02), "余额不足");
        assert_eq!(charge_status_label(0x0E), "无响应");
        assert_eq!(charge_status_label(0x77), "未知错误");
    }
}
