//! OXM TLV encoding of match fields.
//!
//! An OXM TLV is made of a 4-byte header and a variable size value:
//!
//! ```no_rust
//! 0                       16             23  24             32
//! +------------------------+-------------+----+-------------+
//! |       oxm_class        |  oxm_field  | HM |  oxm_length |
//! +------------------------+-------------+----+-------------+
//! |                     value and/or mask                   |
//! |                      (variable size)                    |
//! +---------------------------------------------------------+
//! ```
//!
//! When `HM` is set, half the payload is the value and half a mask;
//! otherwise the whole payload is the value. `oxm_length` counts the
//! payload bytes only.

use byteorder::{ByteOrder, NetworkEndian};

use crate::bits::Bits;
use crate::oxm::consts::ns;
use crate::oxm::{basic, Field};
use crate::{Error, Result};

mod field {
    use crate::field::*;
    pub const CLASS: Field = 0..2;
    pub const FIELD: usize = 2;
    pub const MASK: usize = 2;
    pub const LENGTH: usize = 3;
    pub const VALUE: Rest = 4..;
}

pub const OXM_HEADER_LEN: usize = 4;

/// A wrapper to read and write a buffer representing one OXM TLV.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet<T> {
    inner: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    /// Return a new OXM TLV parser/encoder for the given buffer.
    pub fn new(buf: T) -> Self {
        Packet { inner: buf }
    }

    /// Return a new OXM TLV parser/encoder for the given buffer, and
    /// make sure no getter or setter will panic.
    pub fn new_checked(buf: T) -> Result<Self> {
        let packet = Packet { inner: buf };
        packet.check_len()?;
        Ok(packet)
    }

    /// Return the `oxm_class` field.
    pub fn class(&self) -> u16 {
        NetworkEndian::read_u16(&self.inner.as_ref()[field::CLASS])
    }

    /// Return the `oxm_field` field.
    pub fn field(&self) -> u8 {
        (self.inner.as_ref()[field::FIELD] & 0xfe) >> 1
    }

    /// Return `true` if the payload carries a mask.
    pub fn has_mask(&self) -> bool {
        self.inner.as_ref()[field::MASK] & 0x01 == 1
    }

    /// Return the `oxm_length` field.
    pub fn length(&self) -> u8 {
        self.inner.as_ref()[field::LENGTH]
    }

    /// Check whether any getter may panic because the underlying buffer
    /// is too small.
    pub fn check_len(&self) -> Result<()> {
        let len = self.inner.as_ref().len();
        if len < OXM_HEADER_LEN || len < OXM_HEADER_LEN + self.length() as usize {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Packet<&'a T> {
    /// Return the OXM payload.
    pub fn value(&self) -> &'a [u8] {
        &self.inner.as_ref()[field::VALUE]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    /// Setter for the `oxm_class` field.
    pub fn set_class(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.inner.as_mut()[field::CLASS], value);
    }

    /// Setter for the `oxm_field` field. Only the low 7 bits are used.
    pub fn set_field(&mut self, value: u8) {
        self.inner.as_mut()[field::FIELD] =
            value << 1 | (self.inner.as_ref()[field::FIELD] & 1);
    }

    /// Set the `HM` field.
    pub fn set_mask(&mut self) {
        self.inner.as_mut()[field::MASK] |= 1;
    }

    /// Unset the `HM` field.
    pub fn unset_mask(&mut self) {
        self.inner.as_mut()[field::MASK] &= 0xfe;
    }

    /// Setter for the `oxm_length` field.
    pub fn set_length(&mut self, value: u8) {
        self.inner.as_mut()[field::LENGTH] = value;
    }

    /// Get a mutable pointer to the OXM payload.
    pub fn value_mut(&mut self) -> &mut [u8] {
        &mut self.inner.as_mut()[field::VALUE]
    }
}

/// The encoded size of one match field.
pub fn buffer_len(f: &Field) -> usize {
    let nbytes = f.field_type().nbytes();
    OXM_HEADER_LEN + if f.is_fuzzy() { 2 * nbytes } else { nbytes }
}

/// Emit one match field as an OXM TLV.
pub fn emit(f: &Field, buffer: &mut [u8]) -> Result<()> {
    if buffer.len() < buffer_len(f) {
        return Err(Error::Exhausted);
    }
    let t = f.field_type();
    let nbytes = t.nbytes();
    let mut packet = Packet::new(buffer);
    packet.set_class(t.ns());
    packet.set_field(t.id());
    if f.is_fuzzy() {
        packet.set_mask();
        packet.set_length((2 * nbytes) as u8);
    } else {
        packet.unset_mask();
        packet.set_length(nbytes as u8);
    }
    let value = packet.value_mut();
    f.value_bits().write_to(&mut value[..nbytes]);
    if f.is_fuzzy() {
        f.mask_bits().write_to(&mut value[nbytes..2 * nbytes]);
    }
    Ok(())
}

/// Parse one match field from the head of `buffer`; returns the field
/// and the number of bytes consumed.
pub fn parse(buffer: &[u8]) -> Result<(Field, usize)> {
    let packet = Packet::new_checked(buffer)?;
    let t = match packet.class() {
        ns::OPENFLOW_BASIC => {
            basic::type_of(packet.field()).ok_or(Error::BadOxmField(packet.field()))?
        }
        class @ (ns::NXM0 | ns::NXM1 | ns::EXPERIMENTER) => {
            return Err(Error::UnsupportedOxmClass(class))
        }
        class => return Err(Error::BadOxmClass(class)),
    };

    let nbytes = t.nbytes();
    let expected = if packet.has_mask() { 2 * nbytes } else { nbytes };
    if packet.length() as usize != expected {
        return Err(Error::Malformed);
    }

    let payload = &buffer[field::VALUE.start..field::VALUE.start + expected];
    let value = Bits::from_buffer(t.nbits(), &payload[..nbytes])?;
    let mask = if packet.has_mask() {
        Bits::from_buffer(t.nbits(), &payload[nbytes..])?
    } else {
        Bits::ones(t.nbits())
    };
    Ok((Field::new(t, value, mask)?, OXM_HEADER_LEN + expected))
}
