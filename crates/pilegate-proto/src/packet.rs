//! Inbound byte classification and stream reassembly.
//!
//! Devices share one TCP stream between three message kinds: DNY frames, a
//! 20-byte ASCII ICCID announcement, and the 4-byte `link` keep-alive.
//! Side-channel messages are only recognized at read-chunk granularity (they
//! carry no length prefix); DNY frames may arrive split or merged and are
//! reassembled across chunks.

use bytes::{Bytes, BytesMut};

use crate::{
    errors::{ProtocolError, Result},
    frame::DnyFrame,
};

/// One classified inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// A complete DNY frame.
    Frame(DnyFrame),

    /// 20-byte ICCID announcement (ITU-T E.118, hex digits, `89` prefix).
    Iccid(String),

    /// The literal `link` lightweight heartbeat.
    Link,

    /// Bytes that match none of the known formats.
    Garbage(Bytes),
}

/// Classify a single read chunk.
///
/// - ICCID: exactly 20 bytes, all ASCII hex, first two bytes `89`
/// - `link`: exactly the 4 bytes `l`,`i`,`n`,`k`
/// - DNY: at least 9 bytes starting with the magic; parsed strictly when the
///   length field matches, leniently when the trailer was truncated
/// - anything else is garbage
///
/// # Errors
///
/// A DNY-prefixed chunk that fails structural or checksum validation is an
/// error (so the caller can count decode failures); non-DNY chunks never
/// error, they classify as garbage.
pub fn classify(chunk: &[u8]) -> Result<Packet> {
    if let Some(iccid) = as_iccid(chunk) {
        return Ok(Packet::Iccid(iccid));
    }

    if chunk == b"link" {
        return Ok(Packet::Link);
    }

    if chunk.len() >= 9 && chunk.starts_with(&DnyFrame::MAGIC) {
        let frame = match DnyFrame::decode(chunk) {
            Ok(frame) => frame,
            // Legacy truncated trailers: the length field disagrees with
            // what actually arrived. Still attempt to parse.
            Err(ProtocolError::LengthMismatch { .. }) => DnyFrame::decode_lenient(chunk)?,
            Err(e) => return Err(e),
        };
        return Ok(Packet::Frame(frame));
    }

    Ok(Packet::Garbage(Bytes::copy_from_slice(chunk)))
}

/// Position of the first `DNY` magic in `bytes`, if any.
fn find_magic(bytes: &[u8]) -> Option<usize> {
    bytes.windows(DnyFrame::MAGIC.len()).position(|w| w == DnyFrame::MAGIC)
}

/// ICCID format check: 20 ASCII hex characters beginning `89`.
fn as_iccid(chunk: &[u8]) -> Option<String> {
    if chunk.len() != 20 || !chunk.starts_with(b"89") {
        return None;
    }

    if !chunk.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }

    String::from_utf8(chunk.to_vec()).ok()
}

/// Streaming reassembler for one connection.
///
/// Side-channel messages are classified per chunk. DNY bytes are buffered:
/// complete frames (by the length field) are extracted eagerly, even several
/// per chunk; a partial frame waits for the next chunk. If a partial frame's
/// trailer never arrives but its checksum closes at a chunk boundary, the
/// lenient parse recovers it.
#[derive(Debug, Default)]
pub struct PacketAssembler {
    buf: BytesMut,
}

impl PacketAssembler {
    /// Create an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered bytes awaiting more data.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Feed one read chunk; returns every message completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Packet>> {
        let mut out = Vec::new();
        let mut rest = chunk;

        // Side channels only exist at chunk granularity and never interleave
        // with a partially received frame. A chunk that is itself a prefix of
        // the magic is a frame split inside the header, not a side channel.
        // A coalesced read (side channel immediately followed by a frame)
        // splits at the first magic.
        if self.buf.is_empty()
            && !rest.starts_with(&DnyFrame::MAGIC)
            && !DnyFrame::MAGIC.starts_with(rest)
        {
            match find_magic(rest) {
                Some(at) => {
                    out.push(classify(&rest[..at]));
                    rest = &rest[at..];
                },
                None => {
                    out.push(classify(rest));
                    return out;
                },
            }
        }

        self.buf.extend_from_slice(rest);

        loop {
            if self.buf.is_empty() {
                break;
            }

            if !self.buf.starts_with(&DnyFrame::MAGIC) {
                // Desynchronized: surface the junk and resync at the next
                // magic, if one is already buffered.
                match find_magic(&self.buf) {
                    Some(at) => {
                        let garbage = self.buf.split_to(at).freeze();
                        out.push(Ok(Packet::Garbage(garbage)));
                        continue;
                    },
                    None => {
                        let garbage = self.buf.split().freeze();
                        out.push(Ok(Packet::Garbage(garbage)));
                        break;
                    },
                }
            }

            if self.buf.len() < DnyFrame::MIN_FRAME_LEN {
                break;
            }

            match DnyFrame::claimed_wire_len(&self.buf) {
                Ok(total) if self.buf.len() >= total => {
                    let wire = self.buf.split_to(total);
                    out.push(DnyFrame::decode(&wire).map(Packet::Frame));
                },
                Ok(total) => {
                    // Partial frame. A length field that overstates the
                    // buffer by more than 10 bytes is the legacy
                    // truncated-trailer pattern: the checksum closes the
                    // frame at the chunk boundary. Smaller deficits are
                    // in-flight splits and wait for the next chunk.
                    if total - self.buf.len() > 10 {
                        if let Ok(frame) = DnyFrame::decode_lenient(&self.buf) {
                            self.buf.clear();
                            out.push(Ok(Packet::Frame(frame)));
                        }
                    }
                    break;
                },
                Err(e) => {
                    self.buf.clear();
                    out.push(Err(e));
                    break;
                },
            }
        }

        out
    }
}
