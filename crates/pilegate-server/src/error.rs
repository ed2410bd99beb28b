//! Server error types.

use std::fmt;

use pilegate_core::SessionError;

/// Errors that can occur in the server runtime.
#[derive(Debug)]
pub enum GatewayServerError {
    /// Configuration error (invalid bind address, unreadable config file).
    ///
    /// Fatal at startup; fix configuration and restart.
    Config(String),

    /// Transport/network error (bind failure, I/O error).
    ///
    /// Bind failures are fatal; per-connection I/O errors only end that
    /// connection.
    Transport(String),

    /// Protocol error surfaced from the driver.
    ///
    /// Fatal for the offending connection, never for the server.
    Protocol(String),

    /// Internal error (unexpected state, logic bug).
    Internal(String),

    /// Driver error (session registry, state machine).
    Driver(SessionError),
}

impl fmt::Display for GatewayServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::Driver(err) => write!(f, "driver error: {err}"),
        }
    }
}

impl std::error::Error for GatewayServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Driver(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SessionError> for GatewayServerError {
    fn from(err: SessionError) -> Self {
        Self::Driver(err)
    }
}

impl From<std::io::Error> for GatewayServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
