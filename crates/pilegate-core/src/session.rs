//! Per-connection device session state machine.
//!
//! One session per live TCP connection. The connection id is immutable for
//! the session's lifetime; the device id is set exactly once, by a
//! successful register, and never cleared (the session is removed instead).
//!
//! # State Machine
//!
//! ```text
//! ┌───────────┐ ICCID ┌───────────────┐ register ┌────────────┐ heartbeat ┌────────┐
//! │ Connected │──────>│ IccidReceived │─────────>│ Registered │──────────>│ Online │
//! └───────────┘       └───────────────┘          └────────────┘           └────────┘
//!       │ register (ICCID in payload)                  ↑                    ↑    │ timeout
//!       └──────────────────────────────────────────────┘          heartbeat │    ↓
//!                                                                         ┌─────────┐
//!   any non-terminal ──> Error ──> Disconnected <───────────────────────── │ Offline │
//!                                  (terminal)                              └─────────┘
//! ```
//!
//! Transitions outside the table are rejected without mutating the session.
//! Transitioning to the current state is an idempotent no-op.

use std::{
    collections::{BTreeMap, VecDeque},
    time::Duration,
};

use serde::Serialize;

use crate::error::SessionError;

/// Bounded status-change history per session.
pub const HISTORY_CAPACITY: usize = 10;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// TCP accepted, nothing received yet.
    Connected,
    /// Valid ICCID announcement received.
    IccidReceived,
    /// Register frame accepted; device identity assigned.
    Registered,
    /// Heartbeats arriving within budget.
    Online,
    /// Heartbeat budget exceeded; session kept for the grace window.
    Offline,
    /// Unrecoverable protocol error; supervisor decides closure.
    Error,
    /// Terminal. The session is removed from all indices.
    Disconnected,
}

impl DeviceState {
    /// True for the terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Lifecycle table: is `self -> to` a legal transition?
    ///
    /// Self-transitions are not in the table; callers treat them as
    /// idempotent no-ops.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        use DeviceState as S;
        match self {
            S::Connected => {
                matches!(to, S::IccidReceived | S::Registered | S::Error | S::Disconnected)
            },
            S::IccidReceived => matches!(to, S::Registered | S::Error | S::Disconnected),
            S::Registered => matches!(to, S::Online | S::Error | S::Disconnected),
            S::Online => matches!(to, S::Offline | S::Error | S::Disconnected),
            S::Offline => matches!(to, S::Online | S::Error | S::Disconnected),
            S::Error => matches!(to, S::Disconnected),
            S::Disconnected => false,
        }
    }

    /// Stable lowercase name, matching the serde form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::IccidReceived => "iccid_received",
            Self::Registered => "registered",
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Error => "error",
            Self::Disconnected => "disconnected",
        }
    }
}

/// One recorded state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    /// State before the transition.
    pub from: DeviceState,
    /// State after the transition.
    pub to: DeviceState,
    /// Wall-clock time of the transition, Unix seconds.
    pub at_secs: u64,
    /// Why the transition happened.
    pub reason: String,
}

/// Per-connection session record.
///
/// Generic over the instant type so tests can drive a virtual clock.
/// Monotonic instants feed timeout arithmetic; the parallel `_secs` fields
/// feed snapshots and notifications.
#[derive(Debug, Clone)]
pub struct DeviceSession<I>
where
    I: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>,
{
    conn_id: u64,
    session_id: String,
    remote_addr: String,

    device_id: Option<String>,
    physical_id: Option<u32>,
    iccid: Option<String>,
    device_type: u16,
    device_version: String,
    direct_mode: bool,

    state: DeviceState,
    state_changed_at: I,
    history: VecDeque<StateChange>,

    connected_at_secs: u64,
    registered_at_secs: Option<u64>,
    last_heartbeat: Option<I>,
    last_heartbeat_secs: Option<u64>,
    last_activity: I,
    last_activity_secs: u64,

    heartbeat_count: u64,
    command_count: u64,
    bytes_in: u64,
    bytes_out: u64,
    consecutive_decode_failures: u32,

    properties: BTreeMap<String, String>,
    active_orders: BTreeMap<u8, String>,
}

impl<I> DeviceSession<I>
where
    I: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>,
{
    /// Create a session in `Connected` state.
    pub fn new(
        conn_id: u64,
        remote_addr: String,
        session_id: String,
        now: I,
        now_secs: u64,
    ) -> Self {
        Self {
            conn_id,
            session_id,
            remote_addr,
            device_id: None,
            physical_id: None,
            iccid: None,
            device_type: 0,
            device_version: String::new(),
            direct_mode: false,
            state: DeviceState::Connected,
            state_changed_at: now,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            connected_at_secs: now_secs,
            registered_at_secs: None,
            last_heartbeat: None,
            last_heartbeat_secs: None,
            last_activity: now,
            last_activity_secs: now_secs,
            heartbeat_count: 0,
            command_count: 0,
            bytes_in: 0,
            bytes_out: 0,
            consecutive_decode_failures: 0,
            properties: BTreeMap::new(),
            active_orders: BTreeMap::new(),
        }
    }

    /// Connection id. Immutable for the session's lifetime.
    #[must_use]
    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// Opaque unique session id.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Canonical device id. `None` until registered.
    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Physical hardware id. `None` until registered.
    #[must_use]
    pub fn physical_id(&self) -> Option<u32> {
        self.physical_id
    }

    /// SIM ICCID. `None` until announced or registered.
    #[must_use]
    pub fn iccid(&self) -> Option<&str> {
        self.iccid.as_deref()
    }

    /// Monotonic instant of the last state change.
    #[must_use]
    pub fn state_changed_at(&self) -> I {
        self.state_changed_at
    }

    /// Monotonic instant of the last heartbeat, if any.
    #[must_use]
    pub fn last_heartbeat(&self) -> Option<I> {
        self.last_heartbeat
    }

    /// Monotonic instant of the last inbound activity.
    #[must_use]
    pub fn last_activity(&self) -> I {
        self.last_activity
    }

    /// Order id currently charging on `port`, if any.
    #[must_use]
    pub fn order_on_port(&self, port: u8) -> Option<&str> {
        self.active_orders.get(&port).map(String::as_str)
    }

    /// Attempt a state transition.
    ///
    /// Returns `Ok(true)` when the state changed, `Ok(false)` for an
    /// idempotent same-state request. Invalid transitions do not mutate the
    /// session.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` when the lifecycle table forbids `state -> to`.
    pub fn transition(
        &mut self,
        to: DeviceState,
        now: I,
        now_secs: u64,
        reason: &str,
    ) -> Result<bool, SessionError> {
        if self.state == to {
            return Ok(false);
        }

        if !self.state.can_transition_to(to) {
            return Err(SessionError::InvalidTransition { from: self.state, to });
        }

        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(StateChange {
            from: self.state,
            to,
            at_secs: now_secs,
            reason: reason.to_string(),
        });

        self.state = to;
        self.state_changed_at = now;
        Ok(true)
    }

    /// Record inbound activity.
    pub fn touch(&mut self, now: I, now_secs: u64) {
        self.last_activity = now;
        self.last_activity_secs = now_secs;
    }

    /// Record a heartbeat (DNY heartbeat family or `link`).
    pub fn record_heartbeat(&mut self, now: I, now_secs: u64) {
        self.touch(now, now_secs);
        self.last_heartbeat = Some(now);
        self.last_heartbeat_secs = Some(now_secs);
        self.heartbeat_count += 1;
    }

    /// Store the announced ICCID.
    pub fn set_iccid(&mut self, iccid: String) {
        self.iccid = Some(iccid);
    }

    /// Assign the device identity from a successful register.
    ///
    /// The device id is write-once; later registers for the same identity
    /// are idempotent refreshes handled by the caller.
    pub fn assign_identity(
        &mut self,
        device_id: String,
        physical_id: u32,
        device_type: u16,
        device_version: String,
        direct_mode: bool,
        now_secs: u64,
    ) {
        self.device_id = Some(device_id);
        self.physical_id = Some(physical_id);
        self.device_type = device_type;
        self.device_version = device_version;
        self.direct_mode = direct_mode;
        self.registered_at_secs = Some(now_secs);
    }

    /// Add inbound byte count.
    pub fn add_bytes_in(&mut self, n: u64) {
        self.bytes_in += n;
    }

    /// Add outbound byte count.
    pub fn add_bytes_out(&mut self, n: u64) {
        self.bytes_out += n;
    }

    /// Count one handled command frame.
    pub fn count_command(&mut self) {
        self.command_count += 1;
    }

    /// Set a free-form property.
    pub fn set_property(&mut self, key: &str, value: String) {
        self.properties.insert(key.to_string(), value);
    }

    /// Begin a charging order on a port.
    pub fn start_order(&mut self, port: u8, order_no: String) {
        self.active_orders.insert(port, order_no);
    }

    /// Finish the charging order on a port. Returns the order id if one ran.
    pub fn end_order(&mut self, port: u8) -> Option<String> {
        self.active_orders.remove(&port)
    }

    /// Count one decode failure; returns the consecutive total.
    pub fn record_decode_failure(&mut self) -> u32 {
        self.consecutive_decode_failures += 1;
        self.consecutive_decode_failures
    }

    /// A well-formed inbound message resets the failure streak.
    pub fn reset_decode_failures(&mut self) {
        self.consecutive_decode_failures = 0;
    }

    /// Copy of the session for queries and iteration.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            conn_id: self.conn_id,
            session_id: self.session_id.clone(),
            remote_addr: self.remote_addr.clone(),
            device_id: self.device_id.clone(),
            physical_id: self.physical_id,
            iccid: self.iccid.clone(),
            device_type: self.device_type,
            device_version: self.device_version.clone(),
            direct_mode: self.direct_mode,
            state: self.state,
            connected_at_secs: self.connected_at_secs,
            registered_at_secs: self.registered_at_secs,
            last_heartbeat_secs: self.last_heartbeat_secs,
            last_activity_secs: self.last_activity_secs,
            heartbeat_count: self.heartbeat_count,
            command_count: self.command_count,
            bytes_in: self.bytes_in,
            bytes_out: self.bytes_out,
            properties: self.properties.clone(),
            active_orders: self.active_orders.clone(),
            history: self.history.iter().cloned().collect(),
        }
    }
}

/// Immutable copy of a session, safe to hold across await points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    /// Connection id.
    pub conn_id: u64,
    /// Opaque session id.
    pub session_id: String,
    /// Peer address.
    pub remote_addr: String,
    /// Canonical device id, if registered.
    pub device_id: Option<String>,
    /// Physical hardware id, if registered.
    pub physical_id: Option<u32>,
    /// SIM ICCID, if announced.
    pub iccid: Option<String>,
    /// Hardware model code.
    pub device_type: u16,
    /// Firmware version string.
    pub device_version: String,
    /// Direct-wiring flag.
    pub direct_mode: bool,
    /// Lifecycle state.
    pub state: DeviceState,
    /// When the TCP connection was accepted, Unix seconds.
    pub connected_at_secs: u64,
    /// When the device registered, Unix seconds.
    pub registered_at_secs: Option<u64>,
    /// Last heartbeat, Unix seconds.
    pub last_heartbeat_secs: Option<u64>,
    /// Last inbound activity, Unix seconds.
    pub last_activity_secs: u64,
    /// Heartbeats received.
    pub heartbeat_count: u64,
    /// Command frames handled.
    pub command_count: u64,
    /// Bytes received.
    pub bytes_in: u64,
    /// Bytes sent.
    pub bytes_out: u64,
    /// Free-form properties (firmware details, signal strength, ...).
    pub properties: BTreeMap<String, String>,
    /// Port → order id for running charge sessions.
    pub active_orders: BTreeMap<u8, String>,
    /// Most recent state transitions, oldest first, capped at 10.
    pub history: Vec<StateChange>,
}
