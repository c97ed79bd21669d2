//! # Multipart request/reply framing
//!
//! ```no_rust
//!  0      7        15       23       31
//! +--------+--------+--------+--------+
//! |   mpart type    |      flags      |
//! +--------+--------+--------+--------+
//! |              padding              |
//! +--------+--------+--------+--------+
//! |          body (variable)          |
//! +--------+--------+--------+--------+
//! ```
//!
//! Only the framing is interpreted here; the body layout depends on the
//! `mpart type` and consumers must reparse it accordingly.

use byteorder::{ByteOrder, NetworkEndian};

use crate::{Error, Repr, Result};

enum_with_unknown! {
    /// What the body of a multipart message carries
    pub doc enum Kind(u16) {
        /// Switch description.
        Desc = 0,
        /// Individual flow statistics.
        Flow = 1,
        /// Aggregate flow statistics.
        Aggregate = 2,
        /// Flow table statistics.
        Table = 3,
        /// Port statistics.
        PortStats = 4,
        /// Queue statistics.
        QueueStats = 5,
        /// Group counters.
        Group = 6,
        /// Group descriptions.
        GroupDesc = 7,
        /// Group features.
        GroupFeatures = 8,
        /// Meter statistics.
        Meter = 9,
        /// Meter configuration.
        MeterConfig = 10,
        /// Meter features.
        MeterFeatures = 11,
        /// Table features.
        TableFeatures = 12,
        /// Port descriptions.
        PortDesc = 13,
        /// Experimenter extension.
        Experimenter = 0xffff
    }
}

/// The reply-has-more-parts flag.
pub const FLAG_MORE: u16 = 1;

mod field {
    use crate::field::*;

    pub const KIND: Field = 0..2;
    pub const FLAGS: Field = 2..4;
    pub const PAD: Field = 4..8;
    pub const BODY: Rest = 8..;
}

/// A high-level representation of a multipart message, request or
/// reply.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PacketRepr {
    pub kind: Kind,
    pub flags: u16,
    pub body: Vec<u8>,
}

impl Repr for PacketRepr {
    fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < field::BODY.start {
            return Err(Error::Truncated);
        }
        Ok(PacketRepr {
            kind: Kind::from(NetworkEndian::read_u16(&buffer[field::KIND])),
            flags: NetworkEndian::read_u16(&buffer[field::FLAGS]),
            body: buffer[field::BODY.start..].to_vec(),
        })
    }

    fn buffer_len(&self) -> usize {
        field::BODY.start + self.body.len()
    }

    fn emit(&self, buffer: &mut [u8]) -> Result<()> {
        if buffer.len() < self.buffer_len() {
            return Err(Error::Exhausted);
        }
        NetworkEndian::write_u16(&mut buffer[field::KIND], self.kind.into());
        NetworkEndian::write_u16(&mut buffer[field::FLAGS], self.flags);
        buffer[field::PAD].fill(0);
        buffer[field::BODY.start..self.buffer_len()].copy_from_slice(&self.body);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let repr = PacketRepr {
            kind: Kind::PortDesc,
            flags: FLAG_MORE,
            body: vec![1, 2, 3, 4],
        };
        let mut buf = vec![0; repr.buffer_len()];
        repr.emit(&mut buf).unwrap();
        assert_eq!(PacketRepr::parse(&buf).unwrap(), repr);
    }
}
