//! Error types for the gateway core.
//!
//! Session errors cover the state machine and registry; dispatch errors are
//! the control-plane-facing classification consumed by the API adapter.

use thiserror::Error;

use crate::session::DeviceState;

/// Errors from session and registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// State transition outside the lifecycle table.
    ///
    /// Rejected at the handler boundary; the session is not mutated.
    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// State the session was in
        from: DeviceState,
        /// Requested target state
        to: DeviceState,
    },

    /// Session limit reached; the new connection is refused.
    #[error("capacity exceeded: {limit} sessions")]
    CapacityExceeded {
        /// Configured maximum
        limit: usize,
    },

    /// A connection id was registered twice.
    ///
    /// Logic bug in the runtime's id allocation.
    #[error("duplicate connection id: {conn_id}")]
    DuplicateConnection {
        /// Offending connection id
        conn_id: u64,
    },

    /// No session for the given connection id.
    #[error("session not found for connection {conn_id}")]
    SessionNotFound {
        /// Connection id that was looked up
        conn_id: u64,
    },

    /// No live session for the given device id.
    #[error("device not found: {device_id}")]
    DeviceNotFound {
        /// Canonical device id
        device_id: String,
    },

    /// The device has a session but is not in `Online` state.
    #[error("device {device_id} not online (state {state:?})")]
    DeviceNotOnline {
        /// Canonical device id
        device_id: String,
        /// State the session is actually in
        state: DeviceState,
    },
}

/// Control-plane dispatch failures, pre-classified for the API adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Malformed request (bad device id, invalid command parameters).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The device has no live session.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The device is connected but not online.
    #[error("device {device_id} not online (state {state:?})")]
    DeviceNotOnline {
        /// Canonical device id
        device_id: String,
        /// Current session state
        state: DeviceState,
    },

    /// Internal dispatch failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SessionError> for DispatchError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::DeviceNotFound { device_id } => Self::DeviceNotFound(device_id),
            SessionError::DeviceNotOnline { device_id, state } => {
                Self::DeviceNotOnline { device_id, state }
            },
            other => Self::Internal(other.to_string()),
        }
    }
}
