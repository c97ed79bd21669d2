//! The OXM flow match container used in flow-mods, packet-ins and
//! flow-removed messages.
//!
//! ```no_rust
//! +---------------+---------------+
//! |   match type  |     length    |
//! +---------------+---------------+
//! |          oxm fields           |
//! |   (variable       +-----------+
//! |     length)       |  padding  |
//! +-------------------+-----------+
//! ```
//!
//! - The `match type` must be 1 (OXM).
//! - The `length` covers the 4-byte header and the OXM fields, but not
//!   the padding.
//! - The `padding` aligns the whole structure to 8 bytes.

use byteorder::{ByteOrder, NetworkEndian};

use super::oxm;
use crate::oxm::{Field, FieldSet};
use crate::{Error, Repr, Result};

mod field {
    #![allow(non_snake_case)]

    use crate::field::*;

    pub const MATCH_TYPE: Field = 0..2;
    pub const LENGTH: Field = 2..4;

    pub fn OXM_FIELDS(length: usize) -> Field {
        LENGTH.end..length
    }

    pub fn PADDING(length: usize) -> Field {
        length..(((length + 7) / 8) * 8)
    }
}

enum_with_unknown! {
    /// Flow match encoding
    pub doc enum MatchType(u16) {
        /// Deprecated
        STANDARD = 0,
        /// OpenFlow eXtensible Match
        OXM = 1
    }
}

/// A wrapper to read and write a buffer representing a flow match.
#[derive(Debug, PartialEq, Eq, Clone)]
struct Packet<T> {
    inner: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    fn new(buf: T) -> Self {
        Packet { inner: buf }
    }

    fn new_checked(buf: T) -> Result<Self> {
        let packet = Packet { inner: buf };
        packet.check_len()?;
        Ok(packet)
    }

    fn check_len(&self) -> Result<()> {
        if self.inner.as_ref().len() < field::LENGTH.end {
            return Err(Error::Exhausted);
        }
        if self.inner.as_ref().len() < field::PADDING(self.length() as usize).end {
            return Err(Error::Exhausted);
        }
        Ok(())
    }

    /// Return the `match_type` field.
    fn match_type(&self) -> MatchType {
        NetworkEndian::read_u16(&self.inner.as_ref()[field::MATCH_TYPE]).into()
    }

    /// Return the `length` field.
    fn length(&self) -> u16 {
        NetworkEndian::read_u16(&self.inner.as_ref()[field::LENGTH])
    }

    /// Parse and return the OXM fields.
    fn oxm_fields(&self) -> Result<FieldSet> {
        let length = self.length() as usize;
        let bytes = &self.inner.as_ref()[field::OXM_FIELDS(length)];
        let mut fields = FieldSet::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let (parsed, consumed) = oxm::parse(&bytes[offset..])?;
            fields.modify(&parsed);
            offset += consumed;
        }
        Ok(fields)
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    /// Setter for the `match_type` field.
    fn set_match_type(&mut self, value: MatchType) {
        NetworkEndian::write_u16(&mut self.inner.as_mut()[field::MATCH_TYPE], value.into());
    }

    /// Setter for the `length` field.
    fn set_length(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.inner.as_mut()[field::LENGTH], value);
    }

    /// Emit the OXM fields. The length field must be set already.
    fn set_oxm_fields(&mut self, fields: &[&Field]) -> Result<()> {
        let length = self.length() as usize;
        let buf = &mut self.inner.as_mut()[field::OXM_FIELDS(length)];
        let mut offset = 0;
        for f in fields {
            oxm::emit(f, &mut buf[offset..offset + oxm::buffer_len(f)])?;
            offset += oxm::buffer_len(f);
        }
        Ok(())
    }

    /// Zero the padding. The length field must be set already.
    fn set_padding(&mut self) {
        let len = self.length() as usize;
        let buf = &mut self.inner.as_mut()[field::PADDING(len)];
        for byte in buf {
            *byte = 0;
        }
    }
}

/// A flow match: a [`FieldSet`] on the wire. Wildcard fields are not
/// encoded, and the fields are emitted ordered by `(class, id)` so equal
/// sets serialize identically.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct PacketRepr(pub FieldSet);

impl PacketRepr {
    fn sorted_fields(&self) -> Vec<&Field> {
        let mut fields: Vec<&Field> = self.0.iter().filter(|f| !f.is_wildcard()).collect();
        fields.sort_by_key(|f| (f.field_type().ns(), f.field_type().id()));
        fields
    }

    fn fields_len(&self) -> usize {
        self.sorted_fields()
            .iter()
            .fold(0, |acc, f| acc + oxm::buffer_len(f))
    }

    /// The `length` header field: header plus OXM fields, no padding.
    fn length(&self) -> usize {
        field::LENGTH.end + self.fields_len()
    }
}

impl Repr for PacketRepr {
    fn parse(buffer: &[u8]) -> Result<Self> {
        let packet = Packet::new_checked(buffer)?;
        match packet.match_type() {
            MatchType::OXM => Ok(PacketRepr(packet.oxm_fields()?)),
            other => Err(Error::BadMatchType(other.into())),
        }
    }

    fn buffer_len(&self) -> usize {
        field::PADDING(self.length()).end
    }

    fn emit(&self, buffer: &mut [u8]) -> Result<()> {
        if buffer.len() < self.buffer_len() {
            return Err(Error::Exhausted);
        }
        let mut packet = Packet::new(buffer);
        packet.set_match_type(MatchType::OXM);
        packet.set_length(self.length() as u16);
        packet.set_oxm_fields(&self.sorted_fields())?;
        packet.set_padding();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::oxm::basic::{ETH_TYPE, IN_PORT, VLAN_VID};

    #[cfg_attr(rustfmt, rustfmt_skip)]
    static BYTES: [u8; 24] = [
        // header
        0x00, 0x01,             // match type (1 = oxm)
        0x00, 0x18,             // length = 24, already 8-byte aligned

        // first oxm tlv (len = 8)
        0x80, 0x00,             // class = 0x8000 = openflow basic
        0x00,                   // field (0 = in_port), no mask
        0x04,                   // value length = 4
        0x00, 0x00, 0xab, 0xcd, // value = 43981

        // second oxm tlv (len = 6)
        0x80, 0x00,             // class
        5 << 1,                 // field = 5 = eth_type, no mask
        0x02,                   // length = 2
        0x08, 0x00,             // value = ipv4

        // third oxm tlv (len = 6)
        0x80, 0x00,             // class
        6 << 1,                 // field = 6 = vlan id, no mask
        0x02,                   // length = 2
        0x07, 0x77,             // value = 0x777
    ];

    fn sample() -> PacketRepr {
        PacketRepr(
            [
                IN_PORT.value_of(0xabcd).to_exact_field(),
                ETH_TYPE.value_of(0x0800).to_exact_field(),
                VLAN_VID.value_of(0x777).to_exact_field(),
            ]
            .into_iter()
            .collect(),
        )
    }

    #[test]
    fn test_padding_field() {
        assert_eq!(field::PADDING(4), 4..8);
        assert_eq!(field::PADDING(8), 8..8);
        assert_eq!(field::PADDING(15), 15..16);
        assert_eq!(field::PADDING(24), 24..24);
        assert_eq!(field::PADDING(25), 25..32);
    }

    #[test]
    fn test_parse() {
        assert_eq!(PacketRepr::parse(&BYTES).unwrap(), sample());
    }

    #[test]
    fn test_emit() {
        let repr = sample();
        assert_eq!(repr.buffer_len(), 24);
        let mut bytes = [0xff; 24];
        repr.emit(&mut bytes).unwrap();
        assert_eq!(&bytes[..], &BYTES[..]);
    }

    #[test]
    fn test_empty_match() {
        let repr = PacketRepr::default();
        assert_eq!(repr.buffer_len(), 8);
        let mut bytes = [0xff; 8];
        repr.emit(&mut bytes).unwrap();
        assert_eq!(&bytes[..4], &[0x00, 0x01, 0x00, 0x04]);
        assert_eq!(&bytes[4..], &[0x00; 4]);
        assert_eq!(PacketRepr::parse(&bytes).unwrap(), repr);
    }
}
