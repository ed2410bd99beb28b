//! Gateway driver.
//!
//! Ties together the session registry, heartbeat tracking, reconnect
//! statistics, and the per-command handlers. Follows the action pattern:
//! the runtime feeds [`GatewayEvent`]s in, the driver returns
//! [`GatewayAction`]s to execute. No I/O happens inside; time and
//! randomness come from the [`Environment`].

use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use pilegate_proto::{DnyFrame, Packet, ProtocolError};
use serde::Serialize;
use serde_json::json;

use crate::{
    env::Environment,
    error::{DispatchError, SessionError},
    event::{EventType, Notification},
    heartbeat::{HeartbeatConfig, HeartbeatSnapshot, HeartbeatTracker},
    reconnect::{ReconnectConfig, ReconnectSnapshot, ReconnectTracker},
    registry::{DEFAULT_MAX_SESSIONS, SessionRegistry},
    session::{DeviceState, SessionSnapshot},
};

/// Gateway configuration (timeouts, limits, heartbeat cadence).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Maximum concurrent sessions.
    pub max_sessions: usize,
    /// Read deadline per connection; enforced by the runtime's read loop.
    pub read_deadline: Duration,
    /// Per-send write timeout; enforced by the runtime's writer task.
    pub write_timeout: Duration,
    /// Heartbeat cadence and supervisor timeout.
    pub heartbeat: HeartbeatConfig,
    /// How often the runtime delivers `Tick`.
    pub cleanup_interval: Duration,
    /// Idle budget for sessions that are not `Online`/`Offline`.
    pub max_idle: Duration,
    /// How long an `Offline` session is kept before its connection closes.
    pub offline_grace: Duration,
    /// Consecutive decode failures before the connection escalates to
    /// `Error` and closes.
    pub max_decode_failures: u32,
    /// Reconnect observability window.
    pub reconnect: ReconnectConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            read_deadline: Duration::from_secs(300),
            write_timeout: Duration::from_secs(30),
            heartbeat: HeartbeatConfig::default(),
            cleanup_interval: Duration::from_secs(60),
            max_idle: Duration::from_secs(300),
            offline_grace: Duration::from_secs(300),
            max_decode_failures: 16,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Events the gateway driver processes.
///
/// Produced by the runtime (production TCP loop or tests).
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// A new TCP connection was accepted.
    ConnectionAccepted {
        /// Unique connection id assigned by the runtime.
        conn_id: u64,
        /// Peer address.
        remote_addr: String,
    },

    /// A classified message arrived on a connection.
    PacketReceived {
        /// Source connection.
        conn_id: u64,
        /// The classified message.
        packet: Packet,
    },

    /// The classifier rejected inbound bytes.
    DecodeFailed {
        /// Source connection.
        conn_id: u64,
        /// What was wrong.
        error: ProtocolError,
    },

    /// A connection was closed (by peer or I/O error).
    ConnectionClosed {
        /// Closed connection.
        conn_id: u64,
        /// Reason for closure.
        reason: String,
    },

    /// Periodic maintenance tick.
    Tick,
}

/// Actions the driver asks the runtime to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayAction {
    /// Serialize and send a frame on a connection's write path.
    SendFrame {
        /// Target connection.
        conn_id: u64,
        /// Frame to send.
        frame: DnyFrame,
    },

    /// Close a connection.
    CloseConnection {
        /// Connection to close.
        conn_id: u64,
        /// Reason for closure.
        reason: String,
    },

    /// Submit a notification event to the fan-out.
    Notify(Notification),

    /// Log a message.
    Log {
        /// Severity.
        level: LogLevel,
        /// Message to log.
        message: String,
    },
}

/// Log levels for driver actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information.
    Debug,
    /// Informational message.
    Info,
    /// Warning.
    Warn,
    /// Error.
    Error,
}

/// Control-plane commands routed to a device's live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Start a charging session.
    StartCharging {
        /// Device id, decimal or 8-hex.
        device_id: String,
        /// Target port, 1-based.
        port: u8,
        /// Rate plan selector.
        rate_mode: u8,
        /// Balance shown on the device, vendor cents.
        balance: u32,
        /// Purchased minutes or watt-hours.
        value: u16,
        /// Order identifier, at most 16 ASCII bytes.
        order_no: String,
        /// Hard session cap, minutes.
        max_duration: u16,
        /// Hard power cap, watts.
        max_power: u16,
        /// QR-lamp behavior flag.
        qr_light: u8,
    },

    /// Stop a running charging session.
    StopCharging {
        /// Device id, decimal or 8-hex.
        device_id: String,
        /// Target port, 1-based.
        port: u8,
        /// Order being stopped.
        order_no: String,
    },

    /// Modify a running session's remaining time or energy.
    ModifyCharge {
        /// Device id, decimal or 8-hex.
        device_id: String,
        /// Target port, 1-based.
        port: u8,
        /// 1 = time, 2 = energy.
        modify_type: u8,
        /// New remaining quantity; non-zero.
        new_value: u32,
        /// Order being modified.
        order_id: String,
    },

    /// Make the device beep/flash.
    Locate {
        /// Device id, decimal or 8-hex.
        device_id: String,
        /// Signal duration; 0 selects the 5 s default.
        seconds: u8,
    },
}

/// Aggregate traffic counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GatewayCounters {
    /// DNY frames received.
    pub frames_in: u64,
    /// DNY frames sent.
    pub frames_out: u64,
    /// Inbound frames per command byte.
    pub commands_in: BTreeMap<u8, u64>,
    /// Outbound frames per command byte.
    pub commands_out: BTreeMap<u8, u64>,
    /// Bytes received (all message kinds).
    pub bytes_in: u64,
    /// Bytes sent.
    pub bytes_out: u64,
    /// Notifications emitted toward the fan-out.
    pub notifications: u64,
    /// Inbound messages the classifier rejected.
    pub decode_failures: u64,
    /// Frames carrying an unregistered command byte.
    pub unknown_commands: u64,
}

/// Status-surface snapshot of the whole gateway.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    /// Live session count.
    pub sessions: usize,
    /// Session count per state name.
    pub sessions_by_state: BTreeMap<&'static str, usize>,
    /// Traffic counters.
    pub counters: GatewayCounters,
}

/// A server command awaiting the device's status reply.
#[derive(Debug, Clone)]
pub(crate) struct PendingCommand<I> {
    pub(crate) command: u8,
    pub(crate) port: u8,
    pub(crate) order_no: String,
    pub(crate) kind: PendingKind,
    pub(crate) issued: I,
}

/// What the pending command was trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingKind {
    Start,
    Stop,
    Modify,
    Locate,
}

/// How long a pending command waits for its reply before being forgotten.
const PENDING_TTL: Duration = Duration::from_secs(120);

/// Action-based gateway driver.
pub struct GatewayDriver<E: Environment> {
    pub(crate) env: E,
    pub(crate) config: GatewayConfig,
    pub(crate) registry: SessionRegistry<E::Instant>,
    pub(crate) heartbeats: HashMap<String, HeartbeatTracker<E::Instant>>,
    pub(crate) reconnects: ReconnectTracker<E::Instant>,
    pub(crate) pending: HashMap<u64, HashMap<u16, PendingCommand<E::Instant>>>,
    pub(crate) counters: GatewayCounters,
    next_message_id: u16,
}

impl<E: Environment> GatewayDriver<E> {
    /// Create a new driver.
    pub fn new(env: E, config: GatewayConfig) -> Self {
        let next_message_id = (env.wall_clock_secs() & 0xFFFF) as u16;
        let registry = SessionRegistry::new(config.max_sessions);
        let reconnects = ReconnectTracker::new(config.reconnect.clone());

        Self {
            env,
            config,
            registry,
            heartbeats: HashMap::new(),
            reconnects,
            pending: HashMap::new(),
            counters: GatewayCounters::default(),
            next_message_id,
        }
    }

    /// Process one event and return the actions to execute.
    ///
    /// # Errors
    ///
    /// `SessionError` when an event references an unknown connection or a
    /// handler hits a state-machine violation. Frame-level errors never
    /// surface here; they become log actions and failure counts.
    pub fn process_event(
        &mut self,
        event: GatewayEvent,
    ) -> Result<Vec<GatewayAction>, SessionError> {
        match event {
            GatewayEvent::ConnectionAccepted { conn_id, remote_addr } => {
                self.handle_connection_accepted(conn_id, remote_addr)
            },
            GatewayEvent::PacketReceived { conn_id, packet } => {
                self.handle_packet(conn_id, packet)
            },
            GatewayEvent::DecodeFailed { conn_id, error } => {
                Ok(self.note_decode_failure(conn_id, &error.to_string()))
            },
            GatewayEvent::ConnectionClosed { conn_id, reason } => {
                Ok(self.handle_connection_closed(conn_id, &reason))
            },
            GatewayEvent::Tick => Ok(self.handle_tick()),
        }
    }

    fn handle_connection_accepted(
        &mut self,
        conn_id: u64,
        remote_addr: String,
    ) -> Result<Vec<GatewayAction>, SessionError> {
        let now = self.env.now();
        let now_secs = self.env.wall_clock_secs();
        let session_id = format!("{:016x}", self.env.random_u64());

        match self.registry.create(conn_id, remote_addr.clone(), session_id, now, now_secs) {
            Ok(_) => Ok(vec![GatewayAction::Log {
                level: LogLevel::Debug,
                message: format!("connection {conn_id} accepted from {remote_addr}"),
            }]),
            Err(SessionError::CapacityExceeded { limit }) => Ok(vec![
                GatewayAction::CloseConnection {
                    conn_id,
                    reason: format!("capacity exceeded ({limit} sessions)"),
                },
                GatewayAction::Log {
                    level: LogLevel::Warn,
                    message: format!(
                        "refusing connection {conn_id} from {remote_addr}: capacity exceeded"
                    ),
                },
            ]),
            Err(e) => Err(e),
        }
    }

    fn handle_packet(
        &mut self,
        conn_id: u64,
        packet: Packet,
    ) -> Result<Vec<GatewayAction>, SessionError> {
        let wire_bytes = match &packet {
            Packet::Frame(frame) => frame.wire_len() as u64,
            Packet::Iccid(_) => 20,
            Packet::Link => 4,
            Packet::Garbage(bytes) => bytes.len() as u64,
        };

        {
            let session = self
                .registry
                .get_mut(conn_id)
                .ok_or(SessionError::SessionNotFound { conn_id })?;
            session.add_bytes_in(wire_bytes);
        }
        self.counters.bytes_in += wire_bytes;

        match packet {
            Packet::Iccid(iccid) => Ok(self.handle_iccid(conn_id, &iccid)),
            Packet::Link => self.handle_link(conn_id),
            Packet::Frame(frame) => self.handle_frame(conn_id, &frame),
            Packet::Garbage(bytes) => {
                Ok(self.note_decode_failure(conn_id, &format!("{} bytes of garbage", bytes.len())))
            },
        }
    }

    fn handle_iccid(&mut self, conn_id: u64, iccid: &str) -> Vec<GatewayAction> {
        let now = self.env.now();
        let now_secs = self.env.wall_clock_secs();
        let mut actions = Vec::new();

        if let Some(session) = self.registry.get_mut(conn_id) {
            session.touch(now, now_secs);
            session.reset_decode_failures();

            // Cannot fail from Connected; the result is still checked to
            // honor the no-mutation-on-error rule.
            if session.state() == DeviceState::Connected
                && session
                    .transition(DeviceState::IccidReceived, now, now_secs, "iccid announced")
                    .unwrap_or(false)
            {
                actions.push(GatewayAction::Log {
                    level: LogLevel::Debug,
                    message: format!("connection {conn_id} announced ICCID {iccid}"),
                });
            }
        }

        self.registry.bind_iccid(conn_id, iccid);
        actions
    }

    fn handle_link(&mut self, conn_id: u64) -> Result<Vec<GatewayAction>, SessionError> {
        // `link` is a heartbeat without a reply.
        self.heartbeat_received(conn_id, "link heartbeat")
    }

    /// Shared heartbeat semantics for the DNY heartbeat family and `link`.
    ///
    /// Returns the `device_online` notification actions when this beat
    /// flipped the session online.
    pub(crate) fn heartbeat_received(
        &mut self,
        conn_id: u64,
        reason: &str,
    ) -> Result<Vec<GatewayAction>, SessionError> {
        let now = self.env.now();
        let now_secs = self.env.wall_clock_secs();
        let mut actions = Vec::new();

        let session =
            self.registry.get_mut(conn_id).ok_or(SessionError::SessionNotFound { conn_id })?;
        session.reset_decode_failures();
        session.record_heartbeat(now, now_secs);

        let Some(device_id) = session.device_id().map(str::to_string) else {
            // Heartbeat before registration maintains the read deadline but
            // carries no session semantics.
            return Ok(vec![GatewayAction::Log {
                level: LogLevel::Debug,
                message: format!("connection {conn_id} heartbeat before register"),
            }]);
        };

        let became_online = match session.state() {
            DeviceState::Registered | DeviceState::Offline => {
                session.transition(DeviceState::Online, now, now_secs, reason)?
            },
            _ => false,
        };

        if let Some(tracker) = self.heartbeats.get_mut(&device_id) {
            tracker.record_beat(now);
        }

        if became_online {
            self.push_notify(
                &mut actions,
                Notification::new(
                    EventType::DeviceOnline,
                    device_id.clone(),
                    json!({ "reason": reason }),
                ),
            );
            actions.push(GatewayAction::Log {
                level: LogLevel::Info,
                message: format!("device {device_id} online ({reason})"),
            });
        }

        Ok(actions)
    }

    /// Count a decode failure; escalate to `Error` and close at the limit.
    fn note_decode_failure(&mut self, conn_id: u64, detail: &str) -> Vec<GatewayAction> {
        let now = self.env.now();
        let now_secs = self.env.wall_clock_secs();
        self.counters.decode_failures += 1;

        let mut actions = vec![GatewayAction::Log {
            level: LogLevel::Warn,
            message: format!("connection {conn_id} decode failure: {detail}"),
        }];

        let Some(session) = self.registry.get_mut(conn_id) else {
            return actions;
        };
        session.touch(now, now_secs);

        let streak = session.record_decode_failure();
        if streak < self.config.max_decode_failures {
            return actions;
        }

        let device_id = session.device_id().map(str::to_string);
        let escalated = session
            .transition(DeviceState::Error, now, now_secs, "repeated decode failures")
            .unwrap_or(false);

        if escalated && let Some(device_id) = device_id {
            self.push_notify(
                &mut actions,
                Notification::new(
                    EventType::DeviceError,
                    device_id,
                    json!({ "error": "repeated decode failures", "streak": streak }),
                ),
            );
        }

        actions.push(GatewayAction::CloseConnection {
            conn_id,
            reason: format!("{streak} consecutive decode failures"),
        });
        actions
    }

    fn handle_connection_closed(&mut self, conn_id: u64, reason: &str) -> Vec<GatewayAction> {
        let now = self.env.now();
        let now_secs = self.env.wall_clock_secs();
        let mut actions = Vec::new();

        self.pending.remove(&conn_id);

        let Some(mut session) = self.registry.remove(conn_id) else {
            return actions;
        };

        let _ = session.transition(DeviceState::Disconnected, now, now_secs, reason);

        if let Some(device_id) = session.device_id() {
            let device_id = device_id.to_string();

            // A displaced session's device lives on through its newer
            // connection; only the last binding's close means offline. A
            // flapping device re-registers before its old socket dies, so
            // its reconnect history survives through the displacement path.
            if self.registry.conn_by_device(&device_id).is_none() {
                self.heartbeats.remove(&device_id);
                self.reconnects.forget(&device_id);
                self.push_notify(
                    &mut actions,
                    Notification::new(
                        EventType::DeviceOffline,
                        device_id.clone(),
                        json!({ "reason": "disconnect", "detail": reason }),
                    ),
                );
                actions.push(GatewayAction::Log {
                    level: LogLevel::Info,
                    message: format!("device {device_id} disconnected: {reason}"),
                });
            } else {
                actions.push(GatewayAction::Log {
                    level: LogLevel::Debug,
                    message: format!(
                        "stale connection {conn_id} for device {device_id} closed: {reason}"
                    ),
                });
            }
        } else {
            actions.push(GatewayAction::Log {
                level: LogLevel::Debug,
                message: format!("connection {conn_id} closed: {reason}"),
            });
        }

        actions
    }

    fn handle_tick(&mut self) -> Vec<GatewayAction> {
        let now = self.env.now();
        let now_secs = self.env.wall_clock_secs();
        let mut actions = Vec::new();

        for conn_id in self.registry.conn_ids() {
            let Some(session) = self.registry.get_mut(conn_id) else { continue };

            match session.state() {
                DeviceState::Online => {
                    let device_id = session.device_id().map(str::to_string);
                    let budget = device_id
                        .as_deref()
                        .and_then(|id| self.heartbeats.get(id))
                        .map_or(self.config.heartbeat.timeout, HeartbeatTracker::timeout_budget);

                    let last = session.last_heartbeat().unwrap_or_else(|| session.last_activity());
                    if now - last <= budget {
                        continue;
                    }

                    let went_offline = session
                        .transition(DeviceState::Offline, now, now_secs, "heartbeat timeout")
                        .unwrap_or(false);

                    if let Some(device_id) = device_id {
                        if let Some(tracker) = self.heartbeats.get_mut(&device_id) {
                            tracker.record_missed();
                        }
                        if went_offline {
                            self.push_notify(
                                &mut actions,
                                Notification::new(
                                    EventType::DeviceOffline,
                                    device_id.clone(),
                                    json!({ "reason": "timeout" }),
                                ),
                            );
                            actions.push(GatewayAction::Log {
                                level: LogLevel::Warn,
                                message: format!("device {device_id} offline: heartbeat timeout"),
                            });
                        }
                    }
                },

                DeviceState::Offline => {
                    if now - session.state_changed_at() > self.config.offline_grace {
                        actions.push(GatewayAction::CloseConnection {
                            conn_id,
                            reason: "offline grace expired".to_string(),
                        });
                    }
                },

                DeviceState::Connected
                | DeviceState::IccidReceived
                | DeviceState::Registered
                | DeviceState::Error => {
                    if now - session.last_activity() > self.config.max_idle {
                        actions.push(GatewayAction::CloseConnection {
                            conn_id,
                            reason: "idle timeout".to_string(),
                        });
                    }
                },

                DeviceState::Disconnected => {},
            }
        }

        for pending in self.pending.values_mut() {
            pending.retain(|_, cmd| now - cmd.issued <= PENDING_TTL);
        }

        actions
    }

    /// Route a control-plane command to the device's live connection.
    ///
    /// # Errors
    ///
    /// - `BadRequest` for malformed ids or parameters
    /// - `DeviceNotFound` when no live session carries the device id
    /// - `DeviceNotOnline` when the session is not in `Online`
    pub fn dispatch(
        &mut self,
        command: ControlCommand,
    ) -> Result<Vec<GatewayAction>, DispatchError> {
        use pilegate_proto::payloads::{charge, locate as locate_payload, modify};

        let now = self.env.now();

        let raw_device_id = match &command {
            ControlCommand::StartCharging { device_id, .. }
            | ControlCommand::StopCharging { device_id, .. }
            | ControlCommand::ModifyCharge { device_id, .. }
            | ControlCommand::Locate { device_id, .. } => device_id.clone(),
        };

        let device_id = crate::device_id::canonical_device_id(&raw_device_id)
            .map_err(|e| DispatchError::BadRequest(e.to_string()))?;

        let conn_id = self
            .registry
            .conn_by_device(&device_id)
            .ok_or_else(|| DispatchError::DeviceNotFound(device_id.clone()))?;

        let (physical_id, state) = {
            let session = self
                .registry
                .get(conn_id)
                .ok_or_else(|| DispatchError::Internal("index desync".to_string()))?;
            (session.physical_id(), session.state())
        };

        if state != DeviceState::Online {
            return Err(DispatchError::DeviceNotOnline { device_id, state });
        }

        let physical_id =
            physical_id.ok_or_else(|| DispatchError::Internal("session has no physical id".to_string()))?;

        let (command_byte, payload, pending) = match command {
            ControlCommand::StartCharging {
                port,
                rate_mode,
                balance,
                value,
                order_no,
                max_duration,
                max_power,
                qr_light,
                ..
            } => {
                if !(1..=16).contains(&port) {
                    return Err(DispatchError::BadRequest(format!(
                        "port {port} out of range 1-16"
                    )));
                }
                if order_no.is_empty() || order_no.len() > 16 {
                    return Err(DispatchError::BadRequest("order_no must be 1-16 bytes".to_string()));
                }
                if value == 0 {
                    return Err(DispatchError::BadRequest("zero charge value".to_string()));
                }

                let payload = charge::ChargeControl {
                    rate_mode,
                    balance,
                    port,
                    charge_cmd: charge::CHARGE_START,
                    value,
                    order_no: order_no.clone(),
                    max_duration,
                    max_power,
                    qr_light,
                }
                .encode();

                (
                    0x82,
                    payload,
                    PendingCommand {
                        command: 0x82,
                        port,
                        order_no,
                        kind: PendingKind::Start,
                        issued: now,
                    },
                )
            },

            ControlCommand::StopCharging { port, order_no, .. } => {
                if !(1..=16).contains(&port) {
                    return Err(DispatchError::BadRequest(format!(
                        "port {port} out of range 1-16"
                    )));
                }
                if order_no.is_empty() || order_no.len() > 16 {
                    return Err(DispatchError::BadRequest("order_no must be 1-16 bytes".to_string()));
                }

                let payload = charge::ChargeControl {
                    rate_mode: 0,
                    balance: 0,
                    port,
                    charge_cmd: charge::CHARGE_STOP,
                    value: 0,
                    order_no: order_no.clone(),
                    max_duration: 0,
                    max_power: 0,
                    qr_light: 0,
                }
                .encode();

                (
                    0x82,
                    payload,
                    PendingCommand {
                        command: 0x82,
                        port,
                        order_no,
                        kind: PendingKind::Stop,
                        issued: now,
                    },
                )
            },

            ControlCommand::ModifyCharge { port, modify_type, new_value, order_id, .. } => {
                let request = modify::ModifyCharge {
                    port,
                    modify_type,
                    new_value,
                    order_id: order_id.clone(),
                };
                request.validate().map_err(|e| DispatchError::BadRequest(e.to_string()))?;

                (
                    0x8A,
                    request.encode(),
                    PendingCommand {
                        command: 0x8A,
                        port,
                        order_no: order_id,
                        kind: PendingKind::Modify,
                        issued: now,
                    },
                )
            },

            ControlCommand::Locate { seconds, .. } => {
                let seconds =
                    if seconds == 0 { locate_payload::DEFAULT_LOCATE_SECS } else { seconds };

                (
                    0x96,
                    locate_payload::LocatePayload { seconds }.encode(),
                    PendingCommand {
                        command: 0x96,
                        port: 0,
                        order_no: String::new(),
                        kind: PendingKind::Locate,
                        issued: now,
                    },
                )
            },
        };

        let message_id = self.alloc_message_id();
        let frame = DnyFrame::new(physical_id, message_id, command_byte, payload);

        self.pending.entry(conn_id).or_default().insert(message_id, pending);

        let mut actions = vec![GatewayAction::Log {
            level: LogLevel::Debug,
            message: format!(
                "dispatching {:#04x} to device {device_id} (message {message_id})",
                command_byte
            ),
        }];
        self.push_send(&mut actions, conn_id, frame);
        Ok(actions)
    }

    /// Append a send action and account for the outbound frame.
    pub(crate) fn push_send(
        &mut self,
        actions: &mut Vec<GatewayAction>,
        conn_id: u64,
        frame: DnyFrame,
    ) {
        self.counters.frames_out += 1;
        *self.counters.commands_out.entry(frame.command).or_insert(0) += 1;
        self.counters.bytes_out += frame.wire_len() as u64;
        if let Some(session) = self.registry.get_mut(conn_id) {
            session.add_bytes_out(frame.wire_len() as u64);
        }
        actions.push(GatewayAction::SendFrame { conn_id, frame });
    }

    /// Append a notify action, counting it.
    pub(crate) fn push_notify(&mut self, actions: &mut Vec<GatewayAction>, event: Notification) {
        self.counters.notifications += 1;
        actions.push(GatewayAction::Notify(event));
    }

    /// Take the pending command matched by a device reply, with a
    /// same-command fallback for devices that do not echo message ids.
    pub(crate) fn take_pending(
        &mut self,
        conn_id: u64,
        message_id: u16,
        command: u8,
    ) -> Option<PendingCommand<E::Instant>> {
        let pending = self.pending.get_mut(&conn_id)?;

        if let Some(cmd) = pending.remove(&message_id) {
            return Some(cmd);
        }

        let key = pending
            .iter()
            .filter(|(_, cmd)| cmd.command == command)
            .min_by_key(|(_, cmd)| cmd.issued)
            .map(|(&k, _)| k)?;
        pending.remove(&key)
    }

    fn alloc_message_id(&mut self) -> u16 {
        self.next_message_id = self.next_message_id.wrapping_add(1);
        if self.next_message_id == 0 {
            self.next_message_id = 1;
        }
        self.next_message_id
    }

    /// Number of live sessions.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Snapshot of one session by canonical device id.
    #[must_use]
    pub fn session_by_device(&self, device_id: &str) -> Option<SessionSnapshot> {
        self.registry.snapshot_by_device(device_id)
    }

    /// Snapshots of all live sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        self.registry.snapshots()
    }

    /// Heartbeat statistics for a device with a live session.
    #[must_use]
    pub fn heartbeat_stats(&self, device_id: &str) -> Option<HeartbeatSnapshot> {
        self.heartbeats.get(device_id).map(HeartbeatTracker::snapshot)
    }

    /// Reconnect statistics for a device.
    #[must_use]
    pub fn reconnect_stats(&self, device_id: &str) -> ReconnectSnapshot {
        self.reconnects.snapshot(device_id, self.env.now())
    }

    /// Whole-gateway status snapshot.
    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            sessions: self.registry.len(),
            sessions_by_state: self.registry.counts_by_state(),
            counters: self.counters.clone(),
        }
    }
}

impl<E: Environment> std::fmt::Debug for GatewayDriver<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayDriver")
            .field("sessions", &self.registry.len())
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}
