//! # Packet out
//!
//! ```no_rust
//!  0      7        15       23       31
//! +--------+--------+--------+--------+
//! |            buffer id              |
//! +--------+--------+--------+--------+
//! |             in port               |
//! +--------+--------+--------+--------+
//! |   actions len   |     padding     |
//! +--------+--------+--------+--------+
//! |     padding     |    actions      |
//! +--------+--------+   (variable)    |
//! +--------+--------+--------+--------+
//! |        frame (variable)           |
//! +--------+--------+--------+--------+
//! ```
//!
//! The frame is present only when `buffer_id` is
//! [`OFP_NO_BUFFER`](crate::wire::OFP_NO_BUFFER).

use byteorder::{ByteOrder, NetworkEndian};

use super::actions::ActionList;
use crate::{Error, Repr, Result};

mod field {
    #![allow(non_snake_case)]
    use crate::field::*;

    pub const BUFFER_ID: Field = 0..4;
    pub const IN_PORT: Field = 4..8;
    pub const ACTIONS_LEN: Field = 8..10;
    pub const PAD: Field = 10..16;

    pub fn ACTIONS(actions_len: usize) -> Field {
        PAD.end..(PAD.end + actions_len)
    }

    pub fn FRAME(actions_len: usize) -> Rest {
        ACTIONS(actions_len).end..
    }
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
        if self.buffer.as_ref().len() < field::PAD.end {
            return Err(Error::Truncated);
        }
        if self.buffer.as_ref().len() < field::ACTIONS(self.actions_len() as usize).end {
            return Err(Error::Truncated);
        }
        Ok(())
    }

    pub fn buffer_id(&self) -> u32 {
        NetworkEndian::read_u32(&self.buffer.as_ref()[field::BUFFER_ID])
    }

    pub fn in_port(&self) -> u32 {
        NetworkEndian::read_u32(&self.buffer.as_ref()[field::IN_PORT])
    }

    pub fn actions_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::ACTIONS_LEN])
    }

    pub fn actions(&self) -> &[u8] {
        &self.buffer.as_ref()[field::ACTIONS(self.actions_len() as usize)]
    }

    pub fn frame(&self) -> &[u8] {
        &self.buffer.as_ref()[field::FRAME(self.actions_len() as usize)]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_buffer_id(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::BUFFER_ID], value)
    }

    pub fn set_in_port(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::IN_PORT], value)
    }

    pub fn set_actions_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::ACTIONS_LEN], value)
    }

    pub fn set_pad(&mut self) {
        self.buffer.as_mut()[field::PAD].fill(0)
    }

    pub fn actions_mut(&mut self, actions_len: usize) -> &mut [u8] {
        &mut self.buffer.as_mut()[field::ACTIONS(actions_len)]
    }

    pub fn set_frame(&mut self, actions_len: usize, value: &[u8]) {
        self.buffer.as_mut()[field::FRAME(actions_len)].copy_from_slice(value)
    }
}

/// A high-level representation of a packet-out message.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PacketRepr {
    pub buffer_id: u32,
    pub in_port: u32,
    pub actions: ActionList,
    pub frame: Vec<u8>,
}

impl Repr for PacketRepr {
    fn parse(buffer: &[u8]) -> Result<Self> {
        let packet = Packet::new(buffer);
        packet.check_len()?;
        Ok(PacketRepr {
            buffer_id: packet.buffer_id(),
            in_port: packet.in_port(),
            actions: ActionList::parse_all(packet.actions())?,
            frame: packet.frame().to_vec(),
        })
    }

    fn buffer_len(&self) -> usize {
        field::PAD.end + self.actions.buffer_len() + self.frame.len()
    }

    fn emit(&self, buffer: &mut [u8]) -> Result<()> {
        if buffer.len() < self.buffer_len() {
            return Err(Error::Exhausted);
        }
        let actions_len = self.actions.buffer_len();
        let mut packet = Packet::new(buffer);
        packet.set_buffer_id(self.buffer_id);
        packet.set_in_port(self.in_port);
        packet.set_actions_len(actions_len as u16);
        packet.set_pad();
        self.actions.emit(packet.actions_mut(actions_len))?;
        packet.set_frame(actions_len, &self.frame);
        Ok(())
    }
}
