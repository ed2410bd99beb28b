//! Error types for the DNY wire protocol.
//!
//! Frame-level errors never close a connection by themselves; the supervisor
//! decides escalation. `UnknownCommand` is deliberately non-fatal: unknown
//! command bytes pass through as extended messages.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while parsing or serializing DNY frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer is shorter than the minimum legal frame.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum number of bytes required
        expected: usize,
        /// Number of bytes available
        actual: usize,
    },

    /// First three bytes are not the `DNY` magic.
    #[error("bad header: missing DNY magic")]
    BadHeader,

    /// The length field is inconsistent with the buffer.
    #[error("length mismatch: header claims {claimed} bytes, buffer holds {actual}")]
    LengthMismatch {
        /// Total frame size the length field implies
        claimed: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Checksum verification failed.
    #[error("invalid checksum: computed {computed:#06x}, frame carries {carried:#06x}")]
    InvalidChecksum {
        /// Sum computed over the received bytes
        computed: u16,
        /// Sum carried in the frame trailer
        carried: u16,
    },

    /// Command byte has no registered handler.
    ///
    /// Non-fatal: the frame is structurally valid and passes through as an
    /// extended message.
    #[error("unknown command: {0:#04x}")]
    UnknownCommand(u8),

    /// Payload does not decode as the command's documented layout.
    #[error("invalid payload for command {command:#04x}: {reason}")]
    InvalidPayload {
        /// Command whose payload failed to decode
        command: u8,
        /// What was wrong
        reason: String,
    },
}

impl ProtocolError {
    /// True if the error leaves the connection usable.
    ///
    /// Only `UnknownCommand` is recoverable at the frame level without
    /// counting toward the consecutive-failure escalation budget.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnknownCommand(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_command_is_recoverable() {
        assert!(ProtocolError::UnknownCommand(0x77).is_recoverable());
        assert!(!ProtocolError::BadHeader.is_recoverable());
        assert!(
            !ProtocolError::InvalidChecksum { computed: 1, carried: 2 }.is_recoverable()
        );
    }

    #[test]
    fn display_formats() {
        let err = ProtocolError::FrameTooShort { expected: 12, actual: 4 };
        assert_eq!(err.to_string(), "frame too short: expected at least 12 bytes, got 4");

        let err = ProtocolError::InvalidChecksum { computed: 0x01ff, carried: 0x0200 };
        assert_eq!(err.to_string(), "invalid checksum: computed 0x01ff, frame carries 0x0200");
    }
}
