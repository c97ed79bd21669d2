//! # Error message
//!
//! ```no_rust
//!  0      7        15       23       31
//! +--------+--------+--------+--------+
//! |      type       |      code       |
//! +--------+--------+--------+--------+
//! |          data (variable)          |
//! +--------+--------+--------+--------+
//! ```
//!
//! The `data` carries at least 64 bytes of the offending request.

use byteorder::{ByteOrder, NetworkEndian};

use crate::{Error, Repr, Result};

enum_with_unknown! {
    /// High-level error families
    pub doc enum Kind(u16) {
        /// Hello protocol failed.
        HelloFailed = 0,
        /// Request was not understood.
        BadRequest = 1,
        /// Error in action description.
        BadAction = 2,
        /// Error in instruction list.
        BadInstruction = 3,
        /// Error in match.
        BadMatch = 4,
        /// Problem modifying a flow entry.
        FlowModFailed = 5,
        /// Problem modifying a group entry.
        GroupModFailed = 6,
        /// Port mod request failed.
        PortModFailed = 7,
        /// Table mod request failed.
        TableModFailed = 8,
        /// Queue operation failed.
        QueueOpFailed = 9,
        /// Switch config request failed.
        SwitchConfigFailed = 10,
        /// Controller role request failed.
        RoleRequestFailed = 11,
        /// Error in meter.
        MeterModFailed = 12,
        /// Setting table features failed.
        TableFeaturesFailed = 13,
        /// Experimenter error.
        Experimenter = 0xffff
    }
}

mod field {
    use crate::field::*;

    pub const KIND: Field = 0..2;
    pub const CODE: Field = 2..4;
    pub const DATA: Rest = 4..;
}

/// A high-level representation of an error message.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PacketRepr {
    pub kind: Kind,
    pub code: u16,
    pub data: Vec<u8>,
}

impl Repr for PacketRepr {
    fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < field::DATA.start {
            return Err(Error::Truncated);
        }
        Ok(PacketRepr {
            kind: Kind::from(NetworkEndian::read_u16(&buffer[field::KIND])),
            code: NetworkEndian::read_u16(&buffer[field::CODE]),
            data: buffer[field::DATA.start..].to_vec(),
        })
    }

    fn buffer_len(&self) -> usize {
        field::DATA.start + self.data.len()
    }

    fn emit(&self, buffer: &mut [u8]) -> Result<()> {
        if buffer.len() < self.buffer_len() {
            return Err(Error::Exhausted);
        }
        NetworkEndian::write_u16(&mut buffer[field::KIND], self.kind.into());
        NetworkEndian::write_u16(&mut buffer[field::CODE], self.code);
        buffer[field::DATA.start..self.buffer_len()].copy_from_slice(&self.data);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let repr = PacketRepr {
            kind: Kind::BadMatch,
            code: 6,
            data: vec![0x06, 0x0e, 0x00, 0x08],
        };
        let mut buf = vec![0; repr.buffer_len()];
        repr.emit(&mut buf).unwrap();
        assert_eq!(PacketRepr::parse(&buf).unwrap(), repr);
    }
}
