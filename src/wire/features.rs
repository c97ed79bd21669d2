//! # Features reply
//!
//! ```no_rust
//!  0      7        15       23       31
//! +--------+--------+--------+--------+
//! |            datapath id            |
//! |                                   |
//! +--------+--------+--------+--------+
//! |             n buffers             |
//! +--------+--------+--------+--------+
//! |n tables| aux id |     padding     |
//! +--------+--------+--------+--------+
//! |           capabilities            |
//! +--------+--------+--------+--------+
//! |             reserved              |
//! +--------+--------+--------+--------+
//! ```
//!
//! The features request has no body.

use bitflags::bitflags;
use byteorder::{ByteOrder, NetworkEndian};

use crate::{Error, Repr, Result};

bitflags! {
    /// Datapath capabilities.
    #[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
    pub struct Capabilities: u32 {
        const FLOW_STATS = 1 << 0;
        const TABLE_STATS = 1 << 1;
        const PORT_STATS = 1 << 2;
        const GROUP_STATS = 1 << 3;
        const IP_REASM = 1 << 5;
        const QUEUE_STATS = 1 << 6;
        const PORT_BLOCKED = 1 << 8;
    }
}

mod field {
    use crate::field::*;

    pub const DATAPATH_ID: Field = 0..8;
    pub const N_BUFFERS: Field = 8..12;
    pub const N_TABLES: usize = 12;
    pub const AUXILIARY_ID: usize = 13;
    pub const PAD: Field = 14..16;
    pub const CAPABILITIES: Field = 16..20;
    pub const RESERVED: Field = 20..24;
}

/// A high-level representation of a features reply.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PacketRepr {
    pub datapath_id: u64,
    pub n_buffers: u32,
    pub n_tables: u8,
    pub auxiliary_id: u8,
    pub capabilities: Capabilities,
    pub reserved: u32,
}

impl Repr for PacketRepr {
    fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < field::RESERVED.end {
            return Err(Error::Truncated);
        }
        Ok(PacketRepr {
            datapath_id: NetworkEndian::read_u64(&buffer[field::DATAPATH_ID]),
            n_buffers: NetworkEndian::read_u32(&buffer[field::N_BUFFERS]),
            n_tables: buffer[field::N_TABLES],
            auxiliary_id: buffer[field::AUXILIARY_ID],
            capabilities: Capabilities::from_bits_truncate(NetworkEndian::read_u32(
                &buffer[field::CAPABILITIES],
            )),
            reserved: NetworkEndian::read_u32(&buffer[field::RESERVED]),
        })
    }

    fn buffer_len(&self) -> usize {
        field::RESERVED.end
    }

    fn emit(&self, buffer: &mut [u8]) -> Result<()> {
        if buffer.len() < self.buffer_len() {
            return Err(Error::Exhausted);
        }
        NetworkEndian::write_u64(&mut buffer[field::DATAPATH_ID], self.datapath_id);
        NetworkEndian::write_u32(&mut buffer[field::N_BUFFERS], self.n_buffers);
        buffer[field::N_TABLES] = self.n_tables;
        buffer[field::AUXILIARY_ID] = self.auxiliary_id;
        buffer[field::PAD].fill(0);
        NetworkEndian::write_u32(&mut buffer[field::CAPABILITIES], self.capabilities.bits());
        NetworkEndian::write_u32(&mut buffer[field::RESERVED], self.reserved);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let repr = PacketRepr {
            datapath_id: 0xb,
            n_buffers: 255,
            n_tables: 254,
            auxiliary_id: 0,
            capabilities: Capabilities::FLOW_STATS | Capabilities::TABLE_STATS,
            reserved: 0,
        };
        let mut buf = vec![0; repr.buffer_len()];
        repr.emit(&mut buf).unwrap();
        assert_eq!(PacketRepr::parse(&buf).unwrap(), repr);
    }
}
