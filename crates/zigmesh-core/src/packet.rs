//! Application packet header
//!
//! Every data frame exchanged between mesh devices starts with a fixed
//! 16-byte header, followed by a fill region standing in for the
//! application payload:
//!
//! ```text
//! 0        4          8                   16
//! +--------+----------+-------------------+---------------
//! | source | sequence | origin time (us)  | fill ...
//! +--------+----------+-------------------+---------------
//! ```
//!
//! All fields are big-endian.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::PacketError;
use crate::types::DeviceId;

/// Size of the application header in bytes
pub const HEADER_LEN: usize = 16;

/// Header of a sequenced application packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedPacket {
    /// Device that originated the packet
    pub source: DeviceId,
    /// Run-wide sequence number
    pub sequence: u32,
    /// Virtual time at which the packet was sent
    pub origin: Duration,
}

impl SequencedPacket {
    pub fn new(source: DeviceId, sequence: u32, origin: Duration) -> Self {
        Self {
            source,
            sequence,
            origin,
        }
    }

    /// Encode the header into a buffer of `payload_len` bytes, padding the
    /// remainder with `fill`
    pub fn encode(&self, payload_len: usize, fill: u8) -> Result<Bytes, PacketError> {
        if payload_len < HEADER_LEN {
            return Err(PacketError::PayloadTooSmall {
                requested: payload_len,
                minimum: HEADER_LEN,
            });
        }
        let micros = self.origin.as_micros();
        let origin = u64::try_from(micros).map_err(|_| PacketError::TimestampOverflow(micros))?;

        let mut buf = BytesMut::with_capacity(payload_len);
        buf.put_u32(self.source.0);
        buf.put_u32(self.sequence);
        buf.put_u64(origin);
        buf.put_bytes(fill, payload_len - HEADER_LEN);
        Ok(buf.freeze())
    }

    /// Parse the header from the front of a received payload
    pub fn parse(payload: &[u8]) -> Result<Self, PacketError> {
        if payload.len() < HEADER_LEN {
            return Err(PacketError::Truncated {
                expected: HEADER_LEN,
                actual: payload.len(),
            });
        }

        let mut buf = payload;
        let source = DeviceId(buf.get_u32());
        let sequence = buf.get_u32();
        let origin = Duration::from_micros(buf.get_u64());
        Ok(Self {
            source,
            sequence,
            origin,
        })
    }
}
