//! Settlement payload (`0x03`, device→server).
//!
//! Uploaded at the end of a charging session with metering and the stop
//! reason. The gateway replies with a single `0x00` status byte.

use super::{read_padded_str, read_u32, require_len, write_padded_str};
use crate::errors::{ProtocolError, Result};

/// ACK payload sent back for an accepted settlement.
pub const SETTLEMENT_ACK: u8 = 0x00;

/// Longest charging session the firmware can report, in seconds.
pub const MAX_DURATION_SECS: u32 = 86_400;

/// Largest credible energy reading, in watt-hours.
pub const MAX_ENERGY_WH: u32 = 100_000;

/// Decoded `0x03` payload.
///
/// Layout: `order_id(16 ASCII)` | `gun_number(u8)` | `start_time(u32 LE)` |
/// `end_time(u32 LE)` | `electric_energy(u32 LE, Wh)` | `card_number(16
/// ASCII)` | `stop_reason(u8)` | `charge_fee(u32 LE)` | `service_fee(u32
/// LE)` | `total_fee(u32 LE)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPayload {
    /// Order identifier assigned when charging started.
    pub order_id: String,
    /// Port (gun) number, 1-based.
    pub gun_number: u8,
    /// Session start, Unix seconds.
    pub start_time: u32,
    /// Session end, Unix seconds.
    pub end_time: u32,
    /// Energy delivered, watt-hours.
    pub electric_energy: u32,
    /// Card used to pay, empty for app-initiated sessions.
    pub card_number: String,
    /// Why charging stopped (1–28, see [`stop_reason_label`]).
    pub stop_reason: u8,
    /// Energy fee, vendor cents.
    pub charge_fee: u32,
    /// Service fee, vendor cents.
    pub service_fee: u32,
    /// Total fee, vendor cents.
    pub total_fee: u32,
}

const ORDER_LEN: usize = 16;
const CARD_LEN: usize = 16;
const FIXED_LEN: usize = ORDER_LEN + 1 + 4 + 4 + 4 + CARD_LEN + 1 + 4 + 4 + 4;

impl SettlementPayload {
    /// Decode from raw payload bytes.
    ///
    /// Structural decode only; business validation is [`Self::validate`].
    ///
    /// # Errors
    ///
    /// `InvalidPayload` when the payload is shorter than the fixed layout.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        require_len(0x03, payload, FIXED_LEN)?;

        let order_id = read_padded_str(&payload[..ORDER_LEN]);
        let mut at = ORDER_LEN;
        let gun_number = payload[at];
        at += 1;
        let start_time = read_u32(payload, at);
        at += 4;
        let end_time = read_u32(payload, at);
        at += 4;
        let electric_energy = read_u32(payload, at);
        at += 4;
        let card_number = read_padded_str(&payload[at..at + CARD_LEN]);
        at += CARD_LEN;
        let stop_reason = payload[at];
        at += 1;
        let charge_fee = read_u32(payload, at);
        at += 4;
        let service_fee = read_u32(payload, at);
        at += 4;
        let total_fee = read_u32(payload, at);

        Ok(Self {
            order_id,
            gun_number,
            start_time,
            end_time,
            electric_energy,
            card_number,
            stop_reason,
            charge_fee,
            service_fee,
            total_fee,
        })
    }

    /// Encode to payload bytes (used by tests and simulated devices).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FIXED_LEN);
        write_padded_str(&mut buf, &self.order_id, ORDER_LEN);
        buf.push(self.gun_number);
        buf.extend_from_slice(&self.start_time.to_le_bytes());
        buf.extend_from_slice(&self.end_time.to_le_bytes());
        buf.extend_from_slice(&self.electric_energy.to_le_bytes());
        write_padded_str(&mut buf, &self.card_number, CARD_LEN);
        buf.push(self.stop_reason);
        buf.extend_from_slice(&self.charge_fee.to_le_bytes());
        buf.extend_from_slice(&self.service_fee.to_le_bytes());
        buf.extend_from_slice(&self.total_fee.to_le_bytes());
        buf
    }

    /// Business validation of a decoded settlement.
    ///
    /// # Errors
    ///
    /// `InvalidPayload` when the order id is empty, the port is outside
    /// 1–16, the stop reason outside 1–28, the duration above 24 h, or the
    /// energy above 100 kWh.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| ProtocolError::InvalidPayload { command: 0x03, reason };

        if self.order_id.is_empty() {
            return Err(fail("empty order id".to_string()));
        }
        if !(1..=16).contains(&self.gun_number) {
            return Err(fail(format!("port {} out of range 1-16", self.gun_number)));
        }
        if !(1..=28).contains(&self.stop_reason) {
            return Err(fail(format!("stop reason {} out of range 1-28", self.stop_reason)));
        }
        if self.duration_secs() > MAX_DURATION_SECS {
            return Err(fail(format!("duration {}s exceeds 24h", self.duration_secs())));
        }
        if self.electric_energy > MAX_ENERGY_WH {
            return Err(fail(format!("energy {}Wh exceeds 100kWh", self.electric_energy)));
        }

        Ok(())
    }

    /// Session length in seconds (zero when timestamps are inverted).
    #[must_use]
    pub fn duration_secs(&self) -> u32 {
        self.end_time.saturating_sub(self.start_time)
    }

    /// Energy delivered in kilowatt-hours.
    #[must_use]
    pub fn energy_kwh(&self) -> f64 {
        f64::from(self.electric_energy) / 1000.0
    }

    /// Human-readable stop reason.
    #[must_use]
    pub fn stop_reason_desc(&self) -> &'static str {
        stop_reason_label(self.stop_reason)
    }
}

/// Vendor stop-reason table, codes 1–28. Reported verbatim in notifications.
#[must_use]
pub fn stop_reason_label(code: u8) -> &'static str {
    match code {
        1 => "满充自停",
        2 => "时间用完",
        3 => "电量用完",
        4 => "金额用完",
        5 => "用户拔出",
        6 => "用户手动停止",
        7 => "远程停止",
        8 => "功率超限",
        9 => "电流超限",
        10 => "设备故障",
        11 => "端口温度过高",
        12 => "环境温度过高",
        13 => "烟雾报警",
        14 => "继电器故障",
        15 => "继电器粘连",
        16 => "短路保护",
        17 => "漏电保护",
        18 => "浮充超时",
        19 => "空载自停",
        20 => "刷卡停止",
        21 => "余额不足",
        22 => "断电重启",
        23 => "端口故障",
        24 => "通信超时",
        25 => "系统升级",
        26 => "过压",
        27 => "欠压",
        28 => "其他原因",
        _ => "未知原因",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SettlementPayload {
        SettlementPayload {
            order_id: "ORDER_X".to_string(),
            gun_number: 1,
            start_time: 1_700_000_000,
            end_time: 1_700_003_600,
            electric_energy: 12_000,
            card_number: String::new(),
            stop_reason: 5,
            charge_fee: 800,
            service_fee: 210,
            total_fee: 1_010,
        }
    }

    #[test]
    fn round_trip() {
        let original = sample();
        let decoded = SettlementPayload::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn valid_settlement_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn reject_empty_order() {
        let mut s = sample();
        s.order_id = String::new();
        assert!(s.validate().is_err());
    }

    #[test]
    fn reject_bad_port() {
        let mut s = sample();
        s.gun_number = 0;
        assert!(s.validate().is_err());
        s.gun_number = 17;
        assert!(s.validate().is_err());
    }

    #[test]
    fn reject_bad_stop_reason() {
        let mut s = sample();
        s.stop_reason = 29;
        assert!(s.validate().is_err());
    }

    #[test]
    fn reject_marathon_session() {
        let mut s = sample();
        s.end_time = s.start_time + 86_401;
        assert!(s.validate().is_err());
    }

    #[test]
    fn reject_implausible_energy() {
        let mut s = sample();
        s.electric_energy = 100_001;
        assert!(s.validate().is_err());
    }

    #[test]
    fn stop_reason_labels() {
        assert_eq!(stop_reason_label(1), "满充自停");
        assert_eq!(stop_reason_label(5), "用户拔出");
        assert_eq!(stop_reason_label(11), "端口温度过高");
        assert_eq!(stop_reason_label(27), "欠压");
        assert_eq!(stop_reason_label(99), "未知原因");
    }

    #[test]
    fn energy_in_kwh() {
        assert!((sample().energy_kwh() - 12.0).abs() < f64::EPSILON);
    }
}
