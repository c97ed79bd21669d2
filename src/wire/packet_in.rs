//! # Packet in
//!
//! ```no_rust
//!  0      7        15       23       31
//! +--------+--------+--------+--------+
//! |           buffer id               |
//! +--------+--------+--------+--------+
//! |   total length  | reason |table_id|
//! +--------+--------+--------+--------+
//! |               cookie              |
//! |                                   |
//! +--------+--------+--------+--------+
//! |       flow match fields           |
//! | (variable length, 8 bytes aligned)|
//! +--------+--------+--------+--------+
//! |     padding     |      frame      |
//! +--------+--------+                 +
//! |       (variable length)           |
//! +--------+--------+--------+--------+
//! ```

use byteorder::{ByteOrder, NetworkEndian};

use super::flow_match;
use crate::{Error, Repr, Result};

enum_with_unknown! {
    pub doc enum Reason(u8) {
        /// No matching flow (table-miss flow entry).
        NoMatch = 0,
        /// Output to controller in an action.
        Action = 1,
        /// Packet has invalid TTL.
        InvalidTtl = 2
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

mod field {
    #![allow(non_snake_case)]
    use crate::field::*;

    pub const BUFFER_ID: Field = 0..4;
    pub const TOTAL_LEN: Field = 4..6;
    pub const REASON: usize = 6;
    pub const TABLE_ID: usize = 7;
    pub const COOKIE: Field = 8..16;

    // The flow match length is only known after parsing it, so the
    // padding and frame offsets are functions of it.
    pub const MATCH_AND_AFTER: Rest = 16..;

    pub fn PADDING(flow_match_len: usize) -> Field {
        (COOKIE.end + flow_match_len)..(COOKIE.end + flow_match_len + 2)
    }

    pub fn FRAME(flow_match_len: usize) -> Rest {
        PADDING(flow_match_len).end..
    }
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub fn new(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    pub fn check_len(&self, flow_match_len: usize) -> Result<()> {
        if self.buffer.as_ref().len() < field::FRAME(flow_match_len).start {
            return Err(Error::Truncated);
        }
        Ok(())
    }

    /// Return the `buffer_id` field.
    pub fn buffer_id(&self) -> u32 {
        NetworkEndian::read_u32(&self.buffer.as_ref()[field::BUFFER_ID])
    }

    /// Return the `total_len` field.
    pub fn total_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::TOTAL_LEN])
    }

    /// Return the `reason` field.
    pub fn reason(&self) -> Reason {
        Reason::from(self.buffer.as_ref()[field::REASON])
    }

    /// Return the `table_id` field.
    pub fn table_id(&self) -> u8 {
        self.buffer.as_ref()[field::TABLE_ID]
    }

    /// Return the `cookie` field.
    pub fn cookie(&self) -> u64 {
        NetworkEndian::read_u64(&self.buffer.as_ref()[field::COOKIE])
    }

    /// Return the whole buffer after the `cookie` field: the flow
    /// match, the padding and the frame.
    pub fn match_and_after(&self) -> &[u8] {
        &self.buffer.as_ref()[field::MATCH_AND_AFTER]
    }

    /// Return the `frame` field.
    pub fn frame(&self, flow_match_len: usize) -> &[u8] {
        &self.buffer.as_ref()[field::FRAME(flow_match_len)]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_buffer_id(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::BUFFER_ID], value)
    }

    pub fn set_total_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::TOTAL_LEN], value)
    }

    pub fn set_reason(&mut self, value: Reason) {
        self.buffer.as_mut()[field::REASON] = value.into();
    }

    pub fn set_table_id(&mut self, value: u8) {
        self.buffer.as_mut()[field::TABLE_ID] = value;
    }

    pub fn set_cookie(&mut self, value: u64) {
        NetworkEndian::write_u64(&mut self.buffer.as_mut()[field::COOKIE], value)
    }

    pub fn match_and_after_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[field::MATCH_AND_AFTER]
    }

    pub fn set_padding(&mut self, flow_match_len: usize) {
        self.buffer.as_mut()[field::PADDING(flow_match_len)].fill(0)
    }

    pub fn set_frame(&mut self, flow_match_len: usize, value: &[u8]) {
        self.buffer.as_mut()[field::FRAME(flow_match_len)].copy_from_slice(value)
    }
}

/// A high-level representation of a packet-in message.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PacketRepr {
    /// An opaque id for the copy of the packet buffered on the switch,
    /// or [`OFP_NO_BUFFER`](crate::wire::OFP_NO_BUFFER).
    pub buffer_id: u32,
    /// The full length of the packet that triggered this message; the
    /// `frame` field may carry less after truncation.
    pub total_len: u16,
    /// The context that triggered this message.
    pub reason: Reason,
    pub table_id: u8,
    /// The cookie of the flow entry that sent the packet here, or all
    /// ones if none can be attributed.
    pub cookie: u64,
    /// The pipeline fields of the packet, notably `in_port`.
    pub flow_match: flow_match::PacketRepr,
    /// The (possibly truncated) frame.
    pub frame: Vec<u8>,
}

impl Repr for PacketRepr {
    fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < field::PADDING(0).end {
            return Err(Error::Truncated);
        }
        let packet = Packet::new(buffer);
        let flow_match = flow_match::PacketRepr::parse(packet.match_and_after())?;
        let flow_match_len = flow_match.buffer_len();
        packet.check_len(flow_match_len)?;
        Ok(PacketRepr {
            buffer_id: packet.buffer_id(),
            total_len: packet.total_len(),
            reason: packet.reason(),
            table_id: packet.table_id(),
            cookie: packet.cookie(),
            flow_match,
            frame: packet.frame(flow_match_len).to_vec(),
        })
    }

    fn buffer_len(&self) -> usize {
        field::COOKIE.end + self.flow_match.buffer_len() + 2 + self.frame.len()
    }

    fn emit(&self, buffer: &mut [u8]) -> Result<()> {
        if buffer.len() < self.buffer_len() {
            return Err(Error::Exhausted);
        }
        let mut packet = Packet::new(buffer);
        packet.set_buffer_id(self.buffer_id);
        packet.set_total_len(self.total_len);
        packet.set_reason(self.reason);
        packet.set_table_id(self.table_id);
        packet.set_cookie(self.cookie);
        let flow_match_len = self.flow_match.buffer_len();
        self.flow_match
            .emit(&mut packet.match_and_after_mut()[..flow_match_len])?;
        packet.set_padding(flow_match_len);
        packet.set_frame(flow_match_len, &self.frame);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::oxm::basic::IN_PORT;
    use crate::wire::OFP_NO_BUFFER;

    #[test]
    fn test_roundtrip() {
        let repr = PacketRepr {
            buffer_id: OFP_NO_BUFFER,
            total_len: 4,
            reason: Reason::NoMatch,
            table_id: 0,
            cookie: 0xffff_ffff_ffff_ffff,
            flow_match: flow_match::PacketRepr(
                [IN_PORT.value_of(3).to_exact_field()].into_iter().collect(),
            ),
            frame: vec![0x68, 0x6f, 0x67, 0x65],
        };
        let mut buf = vec![0; repr.buffer_len()];
        repr.emit(&mut buf).unwrap();
        assert_eq!(PacketRepr::parse(&buf).unwrap(), repr);
    }
}
