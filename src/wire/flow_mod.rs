//! # Flow mod
//!
//! ```no_rust
//!  0      7        15       23       31
//! +--------+--------+--------+--------+
//! |              cookie               |
//! |                                   |
//! +--------+--------+--------+--------+
//! |           cookie mask             |
//! |                                   |
//! +--------+--------+--------+--------+
//! |table_id|command |  idle timeout   |
//! +--------+--------+--------+--------+
//! |  hard timeout   |    priority     |
//! +--------+--------+--------+--------+
//! |            buffer id              |
//! +--------+--------+--------+--------+
//! |             out port              |
//! +--------+--------+--------+--------+
//! |             out group             |
//! +--------+--------+--------+--------+
//! |      flags      |     padding     |
//! +--------+--------+--------+--------+
//! |       flow match (variable)       |
//! +--------+--------+--------+--------+
//! |      instructions (variable)      |
//! +--------+--------+--------+--------+
//! ```

use bitflags::bitflags;
use byteorder::{ByteOrder, NetworkEndian};

use super::actions::{self, Instruction};
use super::flow_match;
use crate::{Error, Repr, Result};

enum_with_unknown! {
    /// What a flow-mod does to the flow table
    pub doc enum Command(u8) {
        /// Add a new flow entry.
        Add = 0,
        /// Modify all matching entries.
        Modify = 1,
        /// Modify entries strictly matching priority and match.
        ModifyStrict = 2,
        /// Delete all matching entries.
        Delete = 3,
        /// Delete entries strictly matching priority and match.
        DeleteStrict = 4
    }
}

bitflags! {
    /// Flow-mod option flags.
    #[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
    pub struct Flags: u16 {
        /// Send a flow-removed message when the entry expires or is
        /// deleted.
        const SEND_FLOW_REM = 1 << 0;
        /// Check for overlapping entries on add.
        const CHECK_OVERLAP = 1 << 1;
        const RESET_COUNTS = 1 << 2;
        const NO_PACKET_COUNTS = 1 << 3;
        const NO_BYTE_COUNTS = 1 << 4;
    }
}

mod field {
    use crate::field::*;

    pub const COOKIE: Field = 0..8;
    pub const COOKIE_MASK: Field = 8..16;
    pub const TABLE_ID: usize = 16;
    pub const COMMAND: usize = 17;
    pub const IDLE_TIMEOUT: Field = 18..20;
    pub const HARD_TIMEOUT: Field = 20..22;
    pub const PRIORITY: Field = 22..24;
    pub const BUFFER_ID: Field = 24..28;
    pub const OUT_PORT: Field = 28..32;
    pub const OUT_GROUP: Field = 32..36;
    pub const FLAGS: Field = 36..38;
    pub const PAD: Field = 38..40;
    pub const MATCH_AND_AFTER: Rest = 40..;
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
        if self.buffer.as_ref().len() < field::MATCH_AND_AFTER.start {
            return Err(Error::Truncated);
        }
        Ok(())
    }

    pub fn cookie(&self) -> u64 {
        NetworkEndian::read_u64(&self.buffer.as_ref()[field::COOKIE])
    }

    pub fn cookie_mask(&self) -> u64 {
        NetworkEndian::read_u64(&self.buffer.as_ref()[field::COOKIE_MASK])
    }

    pub fn table_id(&self) -> u8 {
        self.buffer.as_ref()[field::TABLE_ID]
    }

    pub fn command(&self) -> Command {
        Command::from(self.buffer.as_ref()[field::COMMAND])
    }

    pub fn idle_timeout(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::IDLE_TIMEOUT])
    }

    pub fn hard_timeout(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::HARD_TIMEOUT])
    }

    pub fn priority(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::PRIORITY])
    }

    pub fn buffer_id(&self) -> u32 {
        NetworkEndian::read_u32(&self.buffer.as_ref()[field::BUFFER_ID])
    }

    pub fn out_port(&self) -> u32 {
        NetworkEndian::read_u32(&self.buffer.as_ref()[field::OUT_PORT])
    }

    pub fn out_group(&self) -> u32 {
        NetworkEndian::read_u32(&self.buffer.as_ref()[field::OUT_GROUP])
    }

    pub fn flags(&self) -> Flags {
        Flags::from_bits_truncate(NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLAGS]))
    }

    pub fn match_and_after(&self) -> &[u8] {
        &self.buffer.as_ref()[field::MATCH_AND_AFTER]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_cookie(&mut self, value: u64) {
        NetworkEndian::write_u64(&mut self.buffer.as_mut()[field::COOKIE], value)
    }

    pub fn set_cookie_mask(&mut self, value: u64) {
        NetworkEndian::write_u64(&mut self.buffer.as_mut()[field::COOKIE_MASK], value)
    }

    pub fn set_table_id(&mut self, value: u8) {
        self.buffer.as_mut()[field::TABLE_ID] = value;
    }

    pub fn set_command(&mut self, value: Command) {
        self.buffer.as_mut()[field::COMMAND] = value.into();
    }

    pub fn set_idle_timeout(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::IDLE_TIMEOUT], value)
    }

    pub fn set_hard_timeout(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::HARD_TIMEOUT], value)
    }

    pub fn set_priority(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::PRIORITY], value)
    }

    pub fn set_buffer_id(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::BUFFER_ID], value)
    }

    pub fn set_out_port(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::OUT_PORT], value)
    }

    pub fn set_out_group(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::OUT_GROUP], value)
    }

    pub fn set_flags(&mut self, value: Flags) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::FLAGS], value.bits())
    }

    pub fn set_pad(&mut self) {
        self.buffer.as_mut()[field::PAD].fill(0)
    }

    pub fn match_and_after_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[field::MATCH_AND_AFTER]
    }
}

/// A high-level representation of a flow-mod message.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PacketRepr {
    pub cookie: u64,
    pub cookie_mask: u64,
    pub table_id: u8,
    pub command: Command,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub priority: u16,
    pub buffer_id: u32,
    pub out_port: u32,
    pub out_group: u32,
    pub flags: Flags,
    pub flow_match: flow_match::PacketRepr,
    pub instructions: Vec<Instruction>,
}

impl Repr for PacketRepr {
    fn parse(buffer: &[u8]) -> Result<Self> {
        let packet = Packet::new(buffer);
        packet.check_len()?;
        let rest = packet.match_and_after();
        let flow_match = flow_match::PacketRepr::parse(rest)?;
        let instructions = actions::parse_instructions(&rest[flow_match.buffer_len()..])?;
        Ok(PacketRepr {
            cookie: packet.cookie(),
            cookie_mask: packet.cookie_mask(),
            table_id: packet.table_id(),
            command: packet.command(),
            idle_timeout: packet.idle_timeout(),
            hard_timeout: packet.hard_timeout(),
            priority: packet.priority(),
            buffer_id: packet.buffer_id(),
            out_port: packet.out_port(),
            out_group: packet.out_group(),
            flags: packet.flags(),
            flow_match,
            instructions,
        })
    }

    fn buffer_len(&self) -> usize {
        field::MATCH_AND_AFTER.start
            + self.flow_match.buffer_len()
            + self
                .instructions
                .iter()
                .map(|i| i.buffer_len())
                .sum::<usize>()
    }

    fn emit(&self, buffer: &mut [u8]) -> Result<()> {
        if buffer.len() < self.buffer_len() {
            return Err(Error::Exhausted);
        }
        let mut packet = Packet::new(buffer);
        packet.set_cookie(self.cookie);
        packet.set_cookie_mask(self.cookie_mask);
        packet.set_table_id(self.table_id);
        packet.set_command(self.command);
        packet.set_idle_timeout(self.idle_timeout);
        packet.set_hard_timeout(self.hard_timeout);
        packet.set_priority(self.priority);
        packet.set_buffer_id(self.buffer_id);
        packet.set_out_port(self.out_port);
        packet.set_out_group(self.out_group);
        packet.set_flags(self.flags);
        packet.set_pad();

        let rest = packet.match_and_after_mut();
        let match_len = self.flow_match.buffer_len();
        self.flow_match.emit(&mut rest[..match_len])?;
        let mut offset = match_len;
        for instruction in &self.instructions {
            instruction.emit(&mut rest[offset..offset + instruction.buffer_len()])?;
            offset += instruction.buffer_len();
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::oxm::basic::ETH_DST;
    use crate::port::PortNumber;
    use crate::wire::actions::{Action, ActionList};
    use crate::wire::{OFP_NO_BUFFER, OFPCML_NO_BUFFER};

    fn sample() -> PacketRepr {
        PacketRepr {
            cookie: 0x1_0000_0001,
            cookie_mask: 0,
            table_id: 0,
            command: Command::Add,
            idle_timeout: 60,
            hard_timeout: 0,
            priority: 32767,
            buffer_id: OFP_NO_BUFFER,
            out_port: PortNumber::Any.into(),
            out_group: 0xffff_ffff,
            flags: Flags::CHECK_OVERLAP | Flags::SEND_FLOW_REM,
            flow_match: flow_match::PacketRepr(
                [ETH_DST.value_of(0x1122_3344_5566).to_exact_field()]
                    .into_iter()
                    .collect(),
            ),
            instructions: vec![Instruction::ApplyActions(
                [Action::Output {
                    port: PortNumber::Controller,
                    max_len: OFPCML_NO_BUFFER,
                }]
                .into_iter()
                .collect::<ActionList>(),
            )],
        }
    }

    #[test]
    fn test_roundtrip() {
        let repr = sample();
        let mut buf = vec![0; repr.buffer_len()];
        repr.emit(&mut buf).unwrap();
        assert_eq!(PacketRepr::parse(&buf).unwrap(), repr);
    }

    #[test]
    fn test_header_layout() {
        let repr = sample();
        let mut buf = vec![0; repr.buffer_len()];
        repr.emit(&mut buf).unwrap();
        // cookie, big-endian
        assert_eq!(
            &buf[0..8],
            &[0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01]
        );
        // table and command
        assert_eq!(buf[16], 0);
        assert_eq!(buf[17], 0);
        // priority
        assert_eq!(&buf[22..24], &[0x7f, 0xff]);
        // flags
        assert_eq!(&buf[36..38], &[0x00, 0x03]);
    }
}
