//! # Flow removed
//!
//! ```no_rust
//!  0      7        15       23       31
//! +--------+--------+--------+--------+
//! |               cookie              |
//! |                                   |
//! +--------+--------+--------+--------+
//! |     priority    | reason |table_id|
//! +--------+--------+--------+--------+
//! |           duration (sec)          |
//! +--------+--------+--------+--------+
//! |           duration (nsec)         |
//! +--------+--------+--------+--------+
//! |   idle timeout  |   hard timeout  |
//! +--------+--------+--------+--------+
//! |            packet count           |
//! |                                   |
//! +--------+--------+--------+--------+
//! |             byte count            |
//! |                                   |
//! +--------+--------+--------+--------+
//! |       flow match (variable)       |
//! +--------+--------+--------+--------+
//! ```

use byteorder::{ByteOrder, NetworkEndian};

use super::flow_match;
use crate::{Error, Repr, Result};

enum_with_unknown! {
    /// Why the flow entry went away
    pub doc enum Reason(u8) {
        /// No traffic within the idle timeout.
        IdleTimeout = 0,
        /// The hard timeout elapsed.
        HardTimeout = 1,
        /// An explicit flow-mod delete.
        Delete = 2,
        /// The owning group was deleted.
        GroupDelete = 3,
        /// The owning meter was deleted.
        MeterDelete = 4
    }
}

mod field {
    use crate::field::*;

    pub const COOKIE: Field = 0..8;
    pub const PRIORITY: Field = 8..10;
    pub const REASON: usize = 10;
    pub const TABLE_ID: usize = 11;
    pub const DURATION_SEC: Field = 12..16;
    pub const DURATION_NSEC: Field = 16..20;
    pub const IDLE_TIMEOUT: Field = 20..22;
    pub const HARD_TIMEOUT: Field = 22..24;
    pub const PACKET_COUNT: Field = 24..32;
    pub const BYTE_COUNT: Field = 32..40;
    pub const MATCH: Rest = 40..;
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub fn new(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    pub fn check_len(&self) -> Result<()> {
        if self.buffer.as_ref().len() < field::MATCH.start {
            return Err(Error::Truncated);
        }
        Ok(())
    }

    pub fn cookie(&self) -> u64 {
        NetworkEndian::read_u64(&self.buffer.as_ref()[field::COOKIE])
    }

    pub fn priority(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::PRIORITY])
    }

    pub fn reason(&self) -> Reason {
        Reason::from(self.buffer.as_ref()[field::REASON])
    }

    pub fn table_id(&self) -> u8 {
        self.buffer.as_ref()[field::TABLE_ID]
    }

    pub fn duration_sec(&self) -> u32 {
        NetworkEndian::read_u32(&self.buffer.as_ref()[field::DURATION_SEC])
    }

    pub fn duration_nsec(&self) -> u32 {
        NetworkEndian::read_u32(&self.buffer.as_ref()[field::DURATION_NSEC])
    }

    pub fn idle_timeout(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::IDLE_TIMEOUT])
    }

    pub fn hard_timeout(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::HARD_TIMEOUT])
    }

    pub fn packet_count(&self) -> u64 {
        NetworkEndian::read_u64(&self.buffer.as_ref()[field::PACKET_COUNT])
    }

    pub fn byte_count(&self) -> u64 {
        NetworkEndian::read_u64(&self.buffer.as_ref()[field::BYTE_COUNT])
    }

    pub fn flow_match(&self) -> &[u8] {
        &self.buffer.as_ref()[field::MATCH]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_cookie(&mut self, value: u64) {
        NetworkEndian::write_u64(&mut self.buffer.as_mut()[field::COOKIE], value)
    }

    pub fn set_priority(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::PRIORITY], value)
    }

    pub fn set_reason(&mut self, value: Reason) {
        self.buffer.as_mut()[field::REASON] = value.into();
    }

    pub fn set_table_id(&mut self, value: u8) {
        self.buffer.as_mut()[field::TABLE_ID] = value;
    }

    pub fn set_duration_sec(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::DURATION_SEC], value)
    }

    pub fn set_duration_nsec(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::DURATION_NSEC], value)
    }

    pub fn set_idle_timeout(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::IDLE_TIMEOUT], value)
    }

    pub fn set_hard_timeout(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::HARD_TIMEOUT], value)
    }

    pub fn set_packet_count(&mut self, value: u64) {
        NetworkEndian::write_u64(&mut self.buffer.as_mut()[field::PACKET_COUNT], value)
    }

    pub fn set_byte_count(&mut self, value: u64) {
        NetworkEndian::write_u64(&mut self.buffer.as_mut()[field::BYTE_COUNT], value)
    }

    pub fn flow_match_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[field::MATCH]
    }
}

/// A high-level representation of a flow-removed message.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PacketRepr {
    pub cookie: u64,
    pub priority: u16,
    pub reason: Reason,
    pub table_id: u8,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub packet_count: u64,
    pub byte_count: u64,
    pub flow_match: flow_match::PacketRepr,
}

impl Repr for PacketRepr {
    fn parse(buffer: &[u8]) -> Result<Self> {
        let packet = Packet::new(buffer);
        packet.check_len()?;
        Ok(PacketRepr {
            cookie: packet.cookie(),
            priority: packet.priority(),
            reason: packet.reason(),
            table_id: packet.table_id(),
            duration_sec: packet.duration_sec(),
            duration_nsec: packet.duration_nsec(),
            idle_timeout: packet.idle_timeout(),
            hard_timeout: packet.hard_timeout(),
            packet_count: packet.packet_count(),
            byte_count: packet.byte_count(),
            flow_match: flow_match::PacketRepr::parse(packet.flow_match())?,
        })
    }

    fn buffer_len(&self) -> usize {
        field::MATCH.start + self.flow_match.buffer_len()
    }

    fn emit(&self, buffer: &mut [u8]) -> Result<()> {
        if buffer.len() < self.buffer_len() {
            return Err(Error::Exhausted);
        }
        let mut packet = Packet::new(buffer);
        packet.set_cookie(self.cookie);
        packet.set_priority(self.priority);
        packet.set_reason(self.reason);
        packet.set_table_id(self.table_id);
        packet.set_duration_sec(self.duration_sec);
        packet.set_duration_nsec(self.duration_nsec);
        packet.set_idle_timeout(self.idle_timeout);
        packet.set_hard_timeout(self.hard_timeout);
        packet.set_packet_count(self.packet_count);
        packet.set_byte_count(self.byte_count);
        self.flow_match.emit(packet.flow_match_mut())?;
        Ok(())
    }
}
