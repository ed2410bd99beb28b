//! Locate payload (`0x96`).
//!
//! Server→device request to beep/flash so a technician can find the pile.
//! The device answers with a 1-byte status.

use crate::errors::{ProtocolError, Result};

/// Default locate duration when the control plane omits one.
pub const DEFAULT_LOCATE_SECS: u8 = 5;

/// Server→device locate request: one byte of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatePayload {
    /// How long the device should signal, in seconds.
    pub seconds: u8,
}

impl LocatePayload {
    /// Encode to payload bytes.
    #[must_use]
    pub fn encode(self) -> Vec<u8> {
        vec![self.seconds]
    }

    /// Decode from payload bytes.
    ///
    /// # Errors
    ///
    /// `InvalidPayload` on an empty payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Err(ProtocolError::InvalidPayload {
                command: 0x96,
                reason: "empty locate payload".to_string(),
            });
        }
        Ok(Self { seconds: payload[0] })
    }
}

impl Default for LocatePayload {
    fn default() -> Self {
        Self { seconds: DEFAULT_LOCATE_SECS }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let original = LocatePayload { seconds: 10 };
        assert_eq!(LocatePayload::decode(&original.encode()).unwrap(), original);
    }

    #[test]
    fn default_duration() {
        assert_eq!(LocatePayload::default().seconds, 5);
    }

    #[test]
    fn reject_empty() {
        assert!(LocatePayload::decode(&[]).is_err());
    }
}
