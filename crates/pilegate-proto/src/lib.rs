//! DNY wire protocol for the charging-pile gateway.
//!
//! Three concerns, no I/O:
//!
//! - [`frame`]: the length-delimited, checksummed DNY frame codec
//! - [`packet`]: classification of the shared TCP stream (DNY frames, ICCID
//!   announcements, `link` keep-alives) and cross-chunk reassembly
//! - [`command`]: the static command registry (name/category/priority)
//!
//! Per-command payload layouts live in [`payloads`] and are decoded lazily
//! by handlers.

#![forbid(unsafe_code)]

mod command;
mod errors;
mod frame;
mod packet;
pub mod payloads;

pub use command::{Command, CommandCategory, CommandInfo};
pub use errors::{ProtocolError, Result};
pub use frame::{DnyFrame, checksum};
pub use packet::{Packet, PacketAssembler, classify};

#[cfg(test)]
mod tests {
    use super::{Command, CommandInfo, DnyFrame};

    #[test]
    fn public_surface_smoke() {
        let frame = DnyFrame::new(0x0400_0001, 1, Command::Heartbeat.to_u8(), vec![0x00]);
        let wire = frame.encode_to_vec();
        assert_eq!(DnyFrame::decode(&wire).unwrap(), frame);
        assert_eq!(CommandInfo::lookup(frame.command).name, "heartbeat");
    }
}
