//! Command registry.
//!
//! Static table of command byte → name/category/priority. Consumed by the
//! dispatcher's send ordering, logging, and sampling. Lookups are O(1) and
//! total: unknown bytes yield `{unknown, 4}`.

/// Known DNY commands as a typed enum.
///
/// Only bytes with a dedicated handler are represented; use
/// [`CommandInfo::lookup`] for the total mapping over all 256 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// `0x01` device→server legacy heartbeat
    HeartbeatLegacy,
    /// `0x03` device→server settlement upload
    Settlement,
    /// `0x11` device→server main-status heartbeat (no reply)
    MainStatus,
    /// `0x12` device→server server-time request
    TimeRequest,
    /// `0x20` device→server register (ACK required)
    Register,
    /// `0x21` device→server heartbeat
    Heartbeat,
    /// `0x22` device→server server-time request (alternate byte)
    TimeRequestAlt,
    /// `0x82` server→device start/stop charging
    ChargeControl,
    /// `0x8A` server→device modify running charge session
    ModifyCharge,
    /// `0x96` server→device locate (beep/flash)
    Locate,
}

impl Command {
    /// Decode a command byte. `None` for unregistered bytes.
    #[must_use]
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::HeartbeatLegacy),
            0x03 => Some(Self::Settlement),
            0x11 => Some(Self::MainStatus),
            0x12 => Some(Self::TimeRequest),
            0x20 => Some(Self::Register),
            0x21 => Some(Self::Heartbeat),
            0x22 => Some(Self::TimeRequestAlt),
            0x82 => Some(Self::ChargeControl),
            0x8A => Some(Self::ModifyCharge),
            0x96 => Some(Self::Locate),
            _ => None,
        }
    }

    /// Wire byte for this command.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::HeartbeatLegacy => 0x01,
            Self::Settlement => 0x03,
            Self::MainStatus => 0x11,
            Self::TimeRequest => 0x12,
            Self::Register => 0x20,
            Self::Heartbeat => 0x21,
            Self::TimeRequestAlt => 0x22,
            Self::ChargeControl => 0x82,
            Self::ModifyCharge => 0x8A,
            Self::Locate => 0x96,
        }
    }

    /// True for the DNY heartbeat family (`0x01`, `0x11`, `0x21`).
    #[must_use]
    pub fn is_heartbeat(self) -> bool {
        matches!(self, Self::HeartbeatLegacy | Self::MainStatus | Self::Heartbeat)
    }
}

/// Functional grouping of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCategory {
    /// Keep-alive traffic
    Heartbeat,
    /// Device identity establishment
    Registration,
    /// Charging session control and settlement
    Charging,
    /// Parameter read/write
    Configuration,
    /// Firmware upgrade flow
    Upgrade,
    /// Status queries
    Query,
    /// Physical-device control (locate, lights)
    Control,
    /// Clock synchronization
    Time,
    /// Unregistered command byte
    Unknown,
}

/// Registry entry for one command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandInfo {
    /// Human-readable command name for logs.
    pub name: &'static str,
    /// Functional category.
    pub category: CommandCategory,
    /// Send priority: 0 highest (registration) through 5 lowest (heartbeat).
    pub priority: u8,
}

impl CommandInfo {
    /// Total lookup over all 256 command bytes.
    #[must_use]
    pub const fn lookup(byte: u8) -> Self {
        match byte {
            0x01 => Self { name: "heartbeat_legacy", category: CommandCategory::Heartbeat, priority: 5 },
            0x03 => Self { name: "settlement", category: CommandCategory::Charging, priority: 1 },
            0x11 => Self { name: "main_status", category: CommandCategory::Heartbeat, priority: 5 },
            0x12 => Self { name: "time_request", category: CommandCategory::Time, priority: 4 },
            0x20 => Self { name: "register", category: CommandCategory::Registration, priority: 0 },
            0x21 => Self { name: "heartbeat", category: CommandCategory::Heartbeat, priority: 5 },
            0x22 => Self { name: "time_request", category: CommandCategory::Time, priority: 4 },
            0x82 => Self { name: "charge_control", category: CommandCategory::Charging, priority: 1 },
            0x8A => Self { name: "modify_charge", category: CommandCategory::Charging, priority: 1 },
            0x96 => Self { name: "locate", category: CommandCategory::Control, priority: 2 },
            _ => Self { name: "unknown", category: CommandCategory::Unknown, priority: 4 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_round_trip() {
        for byte in [0x01u8, 0x03, 0x11, 0x12, 0x20, 0x21, 0x22, 0x82, 0x8A, 0x96] {
            let cmd = Command::from_u8(byte).unwrap();
            assert_eq!(cmd.to_u8(), byte);
        }
    }

    #[test]
    fn unknown_bytes_have_no_enum_variant() {
        assert_eq!(Command::from_u8(0x00), None);
        assert_eq!(Command::from_u8(0x55), None);
        assert_eq!(Command::from_u8(0xFF), None);
    }

    #[test]
    fn lookup_is_total() {
        for byte in 0..=u8::MAX {
            let info = CommandInfo::lookup(byte);
            assert!(info.priority <= 5);
            assert!(!info.name.is_empty());
        }
    }

    #[test]
    fn registration_outranks_heartbeat() {
        let register = CommandInfo::lookup(0x20);
        let heartbeat = CommandInfo::lookup(0x21);

        assert_eq!(register.priority, 0);
        assert_eq!(register.category, CommandCategory::Registration);
        assert_eq!(heartbeat.priority, 5);
        assert_eq!(heartbeat.category, CommandCategory::Heartbeat);
    }

    #[test]
    fn unknown_default() {
        let info = CommandInfo::lookup(0xEE);
        assert_eq!(info.category, CommandCategory::Unknown);
        assert_eq!(info.priority, 4);
        assert_eq!(info.name, "unknown");
    }

    #[test]
    fn heartbeat_family() {
        assert!(Command::HeartbeatLegacy.is_heartbeat());
        assert!(Command::MainStatus.is_heartbeat());
        assert!(Command::Heartbeat.is_heartbeat());
        assert!(!Command::Register.is_heartbeat());
        assert!(!Command::Settlement.is_heartbeat());
    }
}
