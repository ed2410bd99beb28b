//! Notification event value types.
//!
//! Events are plain values: once emitted by a handler they are owned by the
//! fan-out. The event-type set is closed; webhook endpoints subscribe to
//! subsets of it by name.

use serde::{Deserialize, Serialize};

/// The closed set of notification event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Device transitioned to `Online`.
    DeviceOnline,
    /// Device transitioned to `Offline` (timeout or disconnect).
    DeviceOffline,
    /// Device completed registration.
    DeviceRegistered,
    /// Device entered `Error` state.
    DeviceError,
    /// Periodic device telemetry (main-status report).
    DeviceHeartbeat,
    /// A charging session started on a port.
    ChargingStart,
    /// A charging session ended on a port.
    ChargingEnd,
    /// The device rejected or failed a charging session.
    ChargingFailed,
    /// Device acknowledged a charge-control command.
    ChargingCommandSuccess,
    /// Device rejected a charge-control command.
    ChargingCommandFailed,
    /// Device accepted a modify-charge command.
    ChargeModifySuccess,
    /// Device rejected a modify-charge command.
    ChargeModifyFailed,
    /// A running session's time/energy budget changed.
    ChargeModified,
    /// End-of-session settlement upload.
    Settlement,
    /// Device acknowledged a locate command.
    DeviceLocateSuccess,
    /// Device rejected a locate command.
    DeviceLocateFailed,
    /// A port changed status.
    PortStatusChange,
    /// A port reported a fault.
    PortError,
    /// A port became usable.
    PortOnline,
    /// A port became unusable.
    PortOffline,
    /// Per-port heartbeat telemetry.
    PortHeartbeat,
    /// Power metering telemetry.
    PowerHeartbeat,
    /// Generic session status change.
    StatusChange,
}

impl EventType {
    /// Stable snake_case name, matching the serde form and endpoint
    /// subscription strings.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeviceOnline => "device_online",
            Self::DeviceOffline => "device_offline",
            Self::DeviceRegistered => "device_registered",
            Self::DeviceError => "device_error",
            Self::DeviceHeartbeat => "device_heartbeat",
            Self::ChargingStart => "charging_start",
            Self::ChargingEnd => "charging_end",
            Self::ChargingFailed => "charging_failed",
            Self::ChargingCommandSuccess => "charging_command_success",
            Self::ChargingCommandFailed => "charging_command_failed",
            Self::ChargeModifySuccess => "charge_modify_success",
            Self::ChargeModifyFailed => "charge_modify_failed",
            Self::ChargeModified => "charge_modified",
            Self::Settlement => "settlement",
            Self::DeviceLocateSuccess => "device_locate_success",
            Self::DeviceLocateFailed => "device_locate_failed",
            Self::PortStatusChange => "port_status_change",
            Self::PortError => "port_error",
            Self::PortOnline => "port_online",
            Self::PortOffline => "port_offline",
            Self::PortHeartbeat => "port_heartbeat",
            Self::PowerHeartbeat => "power_heartbeat",
            Self::StatusChange => "status_change",
        }
    }
}

/// One notification event.
///
/// `event_id` and `timestamp` are stamped by the fan-out on submission when
/// the emitter left them empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique event id; assigned by the fan-out if empty.
    #[serde(default)]
    pub event_id: String,

    /// Event type.
    pub event_type: EventType,

    /// Canonical device id the event concerns.
    pub device_id: String,

    /// Port number for port-scoped events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_number: Option<u8>,

    /// Wall-clock time of the event, Unix seconds; stamped on submission if
    /// zero.
    #[serde(default)]
    pub timestamp: u64,

    /// Event-specific details.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Notification {
    /// New event with id/timestamp left for the fan-out to stamp.
    #[must_use]
    pub fn new(event_type: EventType, device_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_id: String::new(),
            event_type,
            device_id: device_id.into(),
            port_number: None,
            timestamp: 0,
            data,
        }
    }

    /// Attach a port number.
    #[must_use]
    pub fn with_port(mut self, port: u8) -> Self {
        self.port_number = Some(port);
        self
    }
}
