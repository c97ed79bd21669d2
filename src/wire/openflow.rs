//! A read/write wrapper around an OpenFlow packet buffer.
//!
//! ```no_rust
//! +--------+--------+--------+--------+
//! |version |  type  |     length      |
//! +--------+--------+--------+--------+
//! |                xid                |
//! +--------+--------+--------+--------+
//! |              payload              |
//! +--------+--------+--------+--------+
//! ```
//!
//! - The version field indicates the version of OpenFlow which this message belongs
//! - The length field gives the message length, including the header itself.
//! - The xid, or transaction identifier, is a unique value used to match requests to responses.

use byteorder::{ByteOrder, NetworkEndian};

use super::{error_msg, features, flow_mod, flow_removed, multipart, packet_in, packet_out};
use crate::{Error, Repr, Result};

enum_with_unknown! {
    /// OpenFlow version
    pub doc enum Version(u8) {
        /// OpenFlow 1.0
        OpenFlow1Dot0 = 1,
        /// OpenFlow 1.1
        OpenFlow1Dot1 = 2,
        /// OpenFlow 1.2
        OpenFlow1Dot2 = 3,
        /// OpenFlow 1.3
        OpenFlow1Dot3 = 4,
        /// OpenFlow 1.4
        OpenFlow1Dot4 = 5,
        /// OpenFlow 1.5
        OpenFlow1Dot5 = 6
    }
}

enum_with_unknown! {
    /// OpenFlow message type
    pub doc enum Kind(u8) {
        ///
        Hello               = 0,
        ///
        Error               = 1,
        ///
        EchoRequest         = 2,
        ///
        EchoReply           = 3,
        ///
        Experimenter        = 4,

        ///
        FeaturesRequest     = 5,
        ///
        FeaturesReply       = 6,
        ///
        GetConfigRequest    = 7,
        ///
        GetConfigReply      = 8,
        ///
        SetConfig           = 9,

        ///
        PacketIn            = 10,
        ///
        FlowRemoved         = 11,
        ///
        PortStatus          = 12,

        ///
        PacketOut           = 13,
        ///
        FlowMod             = 14,
        ///
        GroupMod            = 15,
        ///
        PortMod             = 16,
        ///
        TableMod            = 17,

        ///
        MultipartRequest    = 18,
        ///
        MultipartReply      = 19,

        ///
        BarrierRequest      = 20,
        ///
        BarrierReply        = 21,

        ///
        RoleRequest         = 24,
        ///
        RoleReply           = 25,

        ///
        GetAsyncRequest     = 26,
        ///
        GetAsyncReply       = 27,
        ///
        SetAsync            = 28,

        ///
        MeterMod            = 29
    }
}

/// A wrapper around a buffer that represents an OpenFlow packet.
/// `Packet` provides getters and setters for each of the OpenFlow
/// packet fields.
#[derive(Debug)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

mod field {
    use crate::field::*;

    pub const VERSION: usize = 0;
    pub const KIND: usize = 1;
    pub const LENGTH: Field = 2..4;
    pub const XID: Field = 4..8;
}

/// The length of the fixed message header.
pub const HEADER_LEN: usize = 8;

impl<T: AsRef<[u8]>> Packet<T> {
    /// Imbue a raw octet buffer with OpenFlow packet structure.
    pub fn new(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    /// Shorthand for a combination of [new] and [check_len].
    ///
    /// [new]: #method.new
    /// [check_len]: #method.check_len
    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Self::new(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure that no accessor method will panic if called.
    /// Returns `Err(Error::Truncated)` if the buffer is too short.
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN || len < self.length() as usize {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    /// Consume the packet, returning the underlying buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }

    /// Return the version field.
    #[inline]
    pub fn version(&self) -> Version {
        let data = self.buffer.as_ref();
        Version::from(data[field::VERSION])
    }

    /// Return the type field. The type field indicates what type of message is present and how to
    /// interpret the payload. Message types are documented in the [Kind] enum.
    ///
    /// [Kind]: enum.Kind.html
    #[inline]
    pub fn kind(&self) -> Kind {
        let data = self.buffer.as_ref();
        Kind::from(data[field::KIND])
    }

    /// Return the length field. The length field indicates the whole message length.
    #[inline]
    pub fn length(&self) -> u16 {
        let data = self.buffer.as_ref();
        NetworkEndian::read_u16(&data[field::LENGTH])
    }

    /// Return the xid field. The xid, or transaction identifier, is a unique value used to match
    /// requests to responses
    #[inline]
    pub fn xid(&self) -> u32 {
        let data = self.buffer.as_ref();
        NetworkEndian::read_u32(&data[field::XID])
    }

    /// Return a pointer to the payload.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[HEADER_LEN..self.length() as usize]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    /// Set the version field.
    #[inline]
    pub fn set_version(&mut self, value: Version) {
        let data = self.buffer.as_mut();
        data[field::VERSION] = value.into()
    }

    /// Set the type field.
    #[inline]
    pub fn set_kind(&mut self, value: Kind) {
        let data = self.buffer.as_mut();
        data[field::KIND] = value.into()
    }

    /// Set the length.
    #[inline]
    pub fn set_length(&mut self, value: u16) {
        let data = self.buffer.as_mut();
        NetworkEndian::write_u16(&mut data[field::LENGTH], value)
    }

    /// Set the xid field.
    #[inline]
    pub fn set_xid(&mut self, value: u32) {
        let data = self.buffer.as_mut();
        NetworkEndian::write_u32(&mut data[field::XID], value)
    }

    /// Return a mutable pointer to the payload.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let range = HEADER_LEN..self.length() as usize;
        let data = self.buffer.as_mut();
        &mut data[range]
    }
}

/// A high-level representation of an OpenFlow message.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PacketRepr {
    pub version: Version,
    pub length: u16,
    pub kind: Kind,
    pub xid: u32,
    pub payload: PayloadRepr,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PayloadRepr {
    Hello(Vec<u8>),
    Error(error_msg::PacketRepr),
    EchoRequest(Vec<u8>),
    EchoReply(Vec<u8>),
    FeaturesRequest,
    FeaturesReply(features::PacketRepr),
    PacketIn(packet_in::PacketRepr),
    FlowRemoved(flow_removed::PacketRepr),
    PacketOut(packet_out::PacketRepr),
    FlowMod(flow_mod::PacketRepr),
    MultipartRequest(multipart::PacketRepr),
    MultipartReply(multipart::PacketRepr),
    BarrierRequest,
    BarrierReply,
}

impl PayloadRepr {
    /// The message type this payload travels under.
    pub fn kind(&self) -> Kind {
        use self::PayloadRepr::*;
        match *self {
            Hello(_) => Kind::Hello,
            Error(_) => Kind::Error,
            EchoRequest(_) => Kind::EchoRequest,
            EchoReply(_) => Kind::EchoReply,
            FeaturesRequest => Kind::FeaturesRequest,
            FeaturesReply(_) => Kind::FeaturesReply,
            PacketIn(_) => Kind::PacketIn,
            FlowRemoved(_) => Kind::FlowRemoved,
            PacketOut(_) => Kind::PacketOut,
            FlowMod(_) => Kind::FlowMod,
            MultipartRequest(_) => Kind::MultipartRequest,
            MultipartReply(_) => Kind::MultipartReply,
            BarrierRequest => Kind::BarrierRequest,
            BarrierReply => Kind::BarrierReply,
        }
    }

    fn parse(kind: Kind, buffer: &[u8]) -> Result<Self> {
        use self::PayloadRepr::*;
        Ok(match kind {
            Kind::Hello => Hello(buffer.to_vec()),
            Kind::Error => Error(error_msg::PacketRepr::parse(buffer)?),
            Kind::EchoRequest => EchoRequest(buffer.to_vec()),
            Kind::EchoReply => EchoReply(buffer.to_vec()),
            Kind::FeaturesRequest => FeaturesRequest,
            Kind::FeaturesReply => FeaturesReply(features::PacketRepr::parse(buffer)?),
            Kind::PacketIn => PacketIn(packet_in::PacketRepr::parse(buffer)?),
            Kind::FlowRemoved => FlowRemoved(flow_removed::PacketRepr::parse(buffer)?),
            Kind::PacketOut => PacketOut(packet_out::PacketRepr::parse(buffer)?),
            Kind::FlowMod => FlowMod(flow_mod::PacketRepr::parse(buffer)?),
            Kind::MultipartRequest => MultipartRequest(multipart::PacketRepr::parse(buffer)?),
            Kind::MultipartReply => MultipartReply(multipart::PacketRepr::parse(buffer)?),
            Kind::BarrierRequest => BarrierRequest,
            Kind::BarrierReply => BarrierReply,
            _ => return Err(self::Error::Unrecognized),
        })
    }

    fn buffer_len(&self) -> usize {
        use self::PayloadRepr::*;
        match *self {
            Hello(ref vec) | EchoRequest(ref vec) | EchoReply(ref vec) => vec.len(),
            Error(ref repr) => repr.buffer_len(),
            FeaturesRequest | BarrierRequest | BarrierReply => 0,
            FeaturesReply(ref repr) => repr.buffer_len(),
            PacketIn(ref repr) => repr.buffer_len(),
            FlowRemoved(ref repr) => repr.buffer_len(),
            PacketOut(ref repr) => repr.buffer_len(),
            FlowMod(ref repr) => repr.buffer_len(),
            MultipartRequest(ref repr) | MultipartReply(ref repr) => repr.buffer_len(),
        }
    }

    fn emit(&self, buffer: &mut [u8]) -> Result<()> {
        use self::PayloadRepr::*;
        match *self {
            Hello(ref vec) | EchoRequest(ref vec) | EchoReply(ref vec) => {
                if buffer.len() < vec.len() {
                    Err(self::Error::Exhausted)
                } else {
                    buffer.copy_from_slice(vec.as_slice());
                    Ok(())
                }
            }
            Error(ref repr) => repr.emit(buffer),
            FeaturesRequest | BarrierRequest | BarrierReply => Ok(()),
            FeaturesReply(ref repr) => repr.emit(buffer),
            PacketIn(ref repr) => repr.emit(buffer),
            FlowRemoved(ref repr) => repr.emit(buffer),
            PacketOut(ref repr) => repr.emit(buffer),
            FlowMod(ref repr) => repr.emit(buffer),
            MultipartRequest(ref repr) | MultipartReply(ref repr) => repr.emit(buffer),
        }
    }
}

impl PacketRepr {
    /// An OpenFlow 1.3 message around `payload` with the length and
    /// kind filled in.
    pub fn new(xid: u32, payload: PayloadRepr) -> PacketRepr {
        let mut repr = PacketRepr {
            version: Version::OpenFlow1Dot3,
            length: 0,
            kind: payload.kind(),
            xid,
            payload,
        };
        repr.set_length_auto();
        repr
    }

    /// Set the length field automatically based on the payload.
    pub fn set_length_auto(&mut self) {
        self.length = self.buffer_len() as u16;
    }

    /// Emit into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0; self.buffer_len()];
        self.emit(&mut buf)?;
        Ok(buf)
    }
}

impl Repr for PacketRepr {
    /// Parse an OpenFlow packet and return a high-level representation.
    fn parse(buffer: &[u8]) -> Result<Self> {
        let packet = Packet::new_checked(buffer)?;
        Ok(PacketRepr {
            version: packet.version(),
            kind: packet.kind(),
            length: packet.length(),
            xid: packet.xid(),
            payload: PayloadRepr::parse(packet.kind(), packet.payload())?,
        })
    }

    /// Return the length of a packet that will be emitted from this high-level representation.
    fn buffer_len(&self) -> usize {
        field::XID.end + self.payload.buffer_len()
    }

    /// Emit a high-level representation into an OpenFlow packet buffer.
    fn emit(&self, buffer: &mut [u8]) -> Result<()> {
        if buffer.len() < self.buffer_len() {
            return Err(Error::Exhausted);
        }
        let mut packet = Packet::new(buffer);
        let PacketRepr {
            version,
            kind,
            length,
            xid,
            ref payload,
        } = *self;
        packet.set_version(version);
        packet.set_kind(kind);
        packet.set_length(length);
        packet.set_xid(xid);
        payload.emit(packet.payload_mut())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::oxm::basic::IN_PORT;
    use crate::wire::{flow_match, OFP_NO_BUFFER};

    #[test]
    fn test_barrier_roundtrip() {
        let repr = PacketRepr::new(7, PayloadRepr::BarrierRequest);
        assert_eq!(repr.length, 8);
        let bytes = repr.to_bytes().unwrap();
        assert_eq!(bytes, vec![0x04, 0x14, 0x00, 0x08, 0x00, 0x00, 0x00, 0x07]);
        assert_eq!(PacketRepr::parse(&bytes).unwrap(), repr);
    }

    #[test]
    fn test_features_request_roundtrip() {
        let repr = PacketRepr::new(1, PayloadRepr::FeaturesRequest);
        let bytes = repr.to_bytes().unwrap();
        assert_eq!(bytes, vec![0x04, 0x05, 0x00, 0x08, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(PacketRepr::parse(&bytes).unwrap(), repr);
    }

    #[test]
    fn test_packet_in_roundtrip() {
        let repr = PacketRepr::new(
            3,
            PayloadRepr::PacketIn(crate::wire::packet_in::PacketRepr {
                buffer_id: OFP_NO_BUFFER,
                total_len: 2,
                reason: crate::wire::packet_in::Reason::NoMatch,
                table_id: 0,
                cookie: u64::MAX,
                flow_match: flow_match::PacketRepr(
                    [IN_PORT.value_of(1).to_exact_field()].into_iter().collect(),
                ),
                frame: vec![0xca, 0xfe],
            }),
        );
        let bytes = repr.to_bytes().unwrap();
        assert_eq!(PacketRepr::parse(&bytes).unwrap(), repr);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let bytes = [0x04, 0x63, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(PacketRepr::parse(&bytes), Err(Error::Unrecognized));
    }
}
