//! Packet implementation over a raw L2 frame.
//!
//! The parser walks the Ethernet II / 802.1Q / ARP / IPv4 / IPv6 / TCP /
//! UDP / ICMP headers once, recording for each recognized match field an
//! offset into the frame buffer. Loads then read the live bytes and
//! modifications patch them in place, so a later serialization reflects
//! every rewrite a policy applied.
//!
//! A layer is parsed only when the buffer still holds its full header;
//! a short frame simply stops binding at the last complete layer.

use byteorder::{ByteOrder, NetworkEndian};
use smoltcp::wire::{EthernetProtocol, IpProtocol};

use crate::bits::Bits;
use crate::oxm::{basic, consts, Field, Mask};
use crate::packet::Packet;
use crate::{Error, Result};

mod hdr {
    pub const ETHERNET: usize = 14;
    pub const DOT1Q: usize = 18;
    pub const ARP: usize = 28;
    pub const IPV4_MIN: usize = 20;
    pub const IPV6: usize = 40;
    pub const TCP: usize = 20;
    pub const UDP: usize = 8;
    pub const ICMP: usize = 4;
}

#[derive(Debug, Clone, Copy)]
enum Binding {
    /// Byte offset of the field inside the frame buffer.
    Frame(usize),
    /// The ingress-port pseudo header.
    Port,
}

/// A parsed L2 frame with in-place field access.
#[derive(Debug, Clone)]
pub struct PacketParser {
    data: Vec<u8>,
    in_port: [u8; 4],
    bindings: [Option<Binding>; consts::N_BASIC_FIELDS],
}

impl PacketParser {
    /// Parse a frame received on `in_port`.
    pub fn new(frame: Vec<u8>, in_port: u32) -> PacketParser {
        let mut parser = PacketParser {
            data: frame,
            in_port: in_port.to_be_bytes(),
            bindings: [None; consts::N_BASIC_FIELDS],
        };
        parser.bind(consts::IN_PORT, Binding::Port);
        parser.parse_l2();
        parser
    }

    fn bind(&mut self, id: u8, binding: Binding) {
        debug_assert!(
            self.bindings[id as usize].is_none(),
            "field {} bound twice",
            id
        );
        self.bindings[id as usize] = Some(binding);
    }

    fn parse_l2(&mut self) {
        if self.data.len() < hdr::ETHERNET {
            return;
        }
        let ethertype = NetworkEndian::read_u16(&self.data[12..14]);
        let (inner_type, l2_len) = if ethertype == 0x8100 {
            if self.data.len() < hdr::DOT1Q {
                return;
            }
            self.bind(consts::ETH_DST, Binding::Frame(0));
            self.bind(consts::ETH_SRC, Binding::Frame(6));
            // the low 12 bits of the TCI
            self.bind(consts::VLAN_VID, Binding::Frame(14));
            self.bind(consts::ETH_TYPE, Binding::Frame(16));
            (NetworkEndian::read_u16(&self.data[16..18]), hdr::DOT1Q)
        } else {
            self.bind(consts::ETH_DST, Binding::Frame(0));
            self.bind(consts::ETH_SRC, Binding::Frame(6));
            self.bind(consts::ETH_TYPE, Binding::Frame(12));
            (ethertype, hdr::ETHERNET)
        };
        self.parse_l3(EthernetProtocol::from(inner_type), l2_len);
    }

    fn parse_l3(&mut self, ethertype: EthernetProtocol, offset: usize) {
        let remaining = self.data.len() - offset;
        match ethertype {
            EthernetProtocol::Ipv4 => {
                if remaining < hdr::IPV4_MIN {
                    return;
                }
                let ihl = (self.data[offset] & 0x0f) as usize;
                self.bind(consts::IP_PROTO, Binding::Frame(offset + 9));
                self.bind(consts::IPV4_SRC, Binding::Frame(offset + 12));
                self.bind(consts::IPV4_DST, Binding::Frame(offset + 16));

                let header_len = ihl * 4;
                if ihl >= 5 && remaining > header_len {
                    let proto = IpProtocol::from(self.data[offset + 9]);
                    self.parse_l4(proto, offset + header_len);
                }
            }
            EthernetProtocol::Arp => {
                if remaining < hdr::ARP {
                    return;
                }
                let htype = NetworkEndian::read_u16(&self.data[offset..offset + 2]);
                let ptype = NetworkEndian::read_u16(&self.data[offset + 2..offset + 4]);
                let hlen = self.data[offset + 4];
                let plen = self.data[offset + 5];
                if htype != 1 || ptype != 0x0800 || hlen != 6 || plen != 4 {
                    return;
                }
                self.bind(consts::ARP_OP, Binding::Frame(offset + 6));
                self.bind(consts::ARP_SHA, Binding::Frame(offset + 8));
                self.bind(consts::ARP_SPA, Binding::Frame(offset + 14));
                self.bind(consts::ARP_THA, Binding::Frame(offset + 18));
                self.bind(consts::ARP_TPA, Binding::Frame(offset + 24));
            }
            EthernetProtocol::Ipv6 => {
                if remaining < hdr::IPV6 {
                    return;
                }
                self.bind(consts::IP_PROTO, Binding::Frame(offset + 6));
                self.bind(consts::IPV6_SRC, Binding::Frame(offset + 8));
                self.bind(consts::IPV6_DST, Binding::Frame(offset + 24));

                if remaining > hdr::IPV6 {
                    let proto = IpProtocol::from(self.data[offset + 6]);
                    self.parse_l4(proto, offset + hdr::IPV6);
                }
            }
            _ => {}
        }
    }

    fn parse_l4(&mut self, proto: IpProtocol, offset: usize) {
        let remaining = self.data.len() - offset;
        match proto {
            IpProtocol::Tcp => {
                if remaining < hdr::TCP {
                    return;
                }
                self.bind(consts::TCP_SRC, Binding::Frame(offset));
                self.bind(consts::TCP_DST, Binding::Frame(offset + 2));
            }
            IpProtocol::Udp => {
                if remaining < hdr::UDP {
                    return;
                }
                self.bind(consts::UDP_SRC, Binding::Frame(offset));
                self.bind(consts::UDP_DST, Binding::Frame(offset + 2));
            }
            IpProtocol::Icmp => {
                if remaining < hdr::ICMP {
                    return;
                }
                self.bind(consts::ICMPV4_TYPE, Binding::Frame(offset));
                self.bind(consts::ICMPV4_CODE, Binding::Frame(offset + 1));
            }
            _ => {}
        }
    }

    /// The canonical shape and binding of a requested type.
    fn access(&self, t: crate::oxm::Type) -> Result<(Binding, usize)> {
        if t.ns() != consts::ns::OPENFLOW_BASIC {
            return Err(Error::UnsupportedField {
                ns: t.ns(),
                id: t.id(),
            });
        }
        let unsupported = Error::UnsupportedField {
            ns: t.ns(),
            id: t.id(),
        };
        let canonical = basic::type_of(t.id()).ok_or(unsupported.clone())?;
        if canonical.nbits() != t.nbits() {
            return Err(Error::BadBitLength {
                actual: t.nbits(),
                expected: canonical.nbits(),
            });
        }
        let binding = self
            .bindings
            .get(t.id() as usize)
            .copied()
            .flatten()
            .ok_or(unsupported)?;
        Ok((binding, canonical.nbits()))
    }

    fn field_bytes(&self, binding: Binding, nbytes: usize) -> &[u8] {
        match binding {
            Binding::Frame(offset) => &self.data[offset..offset + nbytes],
            Binding::Port => &self.in_port,
        }
    }

    fn field_bytes_mut(&mut self, binding: Binding, nbytes: usize) -> &mut [u8] {
        match binding {
            Binding::Frame(offset) => &mut self.data[offset..offset + nbytes],
            Binding::Port => &mut self.in_port,
        }
    }

    /// Copy up to `buffer.len()` bytes of the (possibly modified) frame.
    pub fn serialize_to(&self, buffer: &mut [u8]) -> usize {
        let copied = self.data.len().min(buffer.len());
        buffer[..copied].copy_from_slice(&self.data[..copied]);
        copied
    }

    /// The full frame length.
    pub fn total_bytes(&self) -> usize {
        self.data.len()
    }

    /// The (possibly modified) frame bytes.
    pub fn frame(&self) -> &[u8] {
        &self.data
    }

    /// The ingress port the frame arrived on.
    pub fn in_port(&self) -> u32 {
        u32::from_be_bytes(self.in_port)
    }
}

impl Packet for PacketParser {
    fn load(&mut self, mask: &Mask) -> Result<Field> {
        let t = mask.field_type();
        let (binding, nbits) = self.access(t)?;
        let bytes = self.field_bytes(binding, t.nbytes());
        let value = t.value(Bits::from_buffer(nbits, bytes)?)?;
        value.with_mask(mask)
    }

    fn modify(&mut self, patch: &Field) -> Result<()> {
        let t = patch.field_type();
        let (binding, nbits) = self.access(t)?;
        let current = {
            let bytes = self.field_bytes(binding, t.nbytes());
            t.value(Bits::from_buffer(nbits, bytes)?)?
        };
        let updated = current.rewrite(patch)?;

        let slice = self.field_bytes_mut(binding, t.nbytes());
        let new = updated.bits().as_bytes();
        let rem = nbits % 8;
        if rem != 0 {
            // preserve the neighbouring bits sharing the first byte
            let low = 0xffu8 >> (8 - rem);
            slice[0] = (slice[0] & !low) | new[0];
            slice[1..].copy_from_slice(&new[1..]);
        } else {
            slice.copy_from_slice(new);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::oxm::basic::{
        ARP_OP, ARP_SPA, ARP_TPA, ETH_DST, ETH_SRC, ETH_TYPE, IN_PORT, IPV4_DST, IPV4_SRC,
        IP_PROTO, TCP_DST, TCP_SRC, UDP_SRC, VLAN_VID,
    };

    #[cfg_attr(rustfmt, rustfmt_skip)]
    static TCP_FRAME: [u8; 54] = [
        // ethernet
        0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, // dst
        0x11, 0x22, 0x33, 0x44, 0x55, 0x66, // src
        0x08, 0x00,                         // type = ipv4
        // ipv4
        0x45, 0x00, 0x00, 0x28,             // version/ihl, tos, total length
        0x00, 0x01, 0x00, 0x00,             // id, flags/fragment
        0x40, 0x06, 0x00, 0x00,             // ttl, proto = tcp, checksum
        0x0a, 0x00, 0x00, 0x01,             // src = 10.0.0.1
        0x0a, 0x00, 0x00, 0x02,             // dst = 10.0.0.2
        // tcp
        0x30, 0x39,                         // src port = 12345
        0x00, 0x50,                         // dst port = 80
        0x00, 0x00, 0x00, 0x00,             // seq
        0x00, 0x00, 0x00, 0x00,             // ack
        0x50, 0x02, 0x20, 0x00,             // offset, flags, window
        0x00, 0x00, 0x00, 0x00,             // checksum, urgent
    ];

    #[cfg_attr(rustfmt, rustfmt_skip)]
    static VLAN_FRAME: [u8; 22] = [
        0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, // dst
        0x11, 0x22, 0x33, 0x44, 0x55, 0x66, // src
        0x81, 0x00,                         // tpid = 802.1q
        0x60, 0x7b,                         // pcp = 3, vid = 123
        0x08, 0x06,                         // inner type = arp
        0x00, 0x00, 0x00, 0x00,             // (truncated arp)
    ];

    #[cfg_attr(rustfmt, rustfmt_skip)]
    static ARP_FRAME: [u8; 42] = [
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, // dst = broadcast
        0x11, 0x22, 0x33, 0x44, 0x55, 0x66, // src
        0x08, 0x06,                         // type = arp
        0x00, 0x01,                         // htype = ethernet
        0x08, 0x00,                         // ptype = ipv4
        0x06, 0x04,                         // hlen, plen
        0x00, 0x01,                         // oper = request
        0x11, 0x22, 0x33, 0x44, 0x55, 0x66, // sha
        0x0a, 0x00, 0x00, 0x01,             // spa = 10.0.0.1
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // tha
        0x0a, 0x00, 0x00, 0x02,             // tpa = 10.0.0.2
    ];

    #[test]
    fn test_tcp_frame() {
        let mut pkt = PacketParser::new(TCP_FRAME.to_vec(), 7);
        assert_eq!(pkt.load_u64(IN_PORT).unwrap(), 7);
        assert_eq!(pkt.load_u64(ETH_DST).unwrap(), 0xaabb_ccdd_eeff);
        assert_eq!(pkt.load_u64(ETH_SRC).unwrap(), 0x1122_3344_5566);
        assert_eq!(pkt.load_u64(ETH_TYPE).unwrap(), 0x0800);
        assert_eq!(pkt.load_u64(IP_PROTO).unwrap(), 6);
        assert_eq!(pkt.load_u64(IPV4_SRC).unwrap(), 0x0a00_0001);
        assert_eq!(pkt.load_u64(IPV4_DST).unwrap(), 0x0a00_0002);
        assert_eq!(pkt.load_u64(TCP_SRC).unwrap(), 12345);
        assert_eq!(pkt.load_u64(TCP_DST).unwrap(), 80);
        // no udp on a tcp packet
        assert!(matches!(
            pkt.load_u64(UDP_SRC),
            Err(Error::UnsupportedField { .. })
        ));
    }

    #[test]
    fn test_partial_load() {
        let mut pkt = PacketParser::new(TCP_FRAME.to_vec(), 7);
        let half = pkt
            .load(&ETH_SRC.mask_of(0xffff_ff00_0000).unwrap())
            .unwrap();
        assert_eq!(half.value_bits().to_u64(), Some(0x1122_3300_0000));
    }

    #[test]
    fn test_short_frame_binds_only_in_port() {
        let mut pkt = PacketParser::new(vec![0; 13], 3);
        assert_eq!(pkt.load_u64(IN_PORT).unwrap(), 3);
        assert!(matches!(
            pkt.load_u64(ETH_DST),
            Err(Error::UnsupportedField { .. })
        ));
        assert!(matches!(
            pkt.load_u64(ETH_TYPE),
            Err(Error::UnsupportedField { .. })
        ));
    }

    #[test]
    fn test_vlan_frame() {
        let mut pkt = PacketParser::new(VLAN_FRAME.to_vec(), 1);
        // the inner type, not 0x8100
        assert_eq!(pkt.load_u64(ETH_TYPE).unwrap(), 0x0806);
        assert_eq!(pkt.load_u64(VLAN_VID).unwrap(), 123);
        // the truncated arp payload binds nothing
        assert!(matches!(
            pkt.load_u64(ARP_OP),
            Err(Error::UnsupportedField { .. })
        ));
    }

    #[test]
    fn test_vlan_modify_preserves_pcp() {
        let mut pkt = PacketParser::new(VLAN_FRAME.to_vec(), 1);
        pkt.modify(&VLAN_VID.value_of(0x234).to_exact_field())
            .unwrap();
        assert_eq!(pkt.load_u64(VLAN_VID).unwrap(), 0x234);
        // the pcp bits next to the vid are untouched
        assert_eq!(pkt.frame()[14] & 0xf0, 0x60);
    }

    #[test]
    fn test_arp_frame() {
        let mut pkt = PacketParser::new(ARP_FRAME.to_vec(), 1);
        assert_eq!(pkt.load_u64(ARP_OP).unwrap(), 1);
        assert_eq!(pkt.load_u64(ARP_SPA).unwrap(), 0x0a00_0001);
        assert_eq!(pkt.load_u64(ARP_TPA).unwrap(), 0x0a00_0002);
    }

    #[test]
    fn test_modify_patches_frame() {
        let mut pkt = PacketParser::new(TCP_FRAME.to_vec(), 7);
        pkt.modify(&ETH_DST.value_of(0x1020_3040_5060).to_exact_field())
            .unwrap();
        assert_eq!(pkt.load_u64(ETH_DST).unwrap(), 0x1020_3040_5060);

        let mut out = vec![0; pkt.total_bytes()];
        assert_eq!(pkt.serialize_to(&mut out), TCP_FRAME.len());
        assert_eq!(&out[0..6], &[0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);
        assert_eq!(&out[6..], &TCP_FRAME[6..]);
    }

    #[test]
    fn test_serialize_capped() {
        let pkt = PacketParser::new(TCP_FRAME.to_vec(), 7);
        let mut out = [0u8; 14];
        assert_eq!(pkt.serialize_to(&mut out), 14);
        assert_eq!(out, TCP_FRAME[..14]);
    }

    #[test]
    fn test_in_port_modify() {
        let mut pkt = PacketParser::new(TCP_FRAME.to_vec(), 7);
        pkt.modify(&IN_PORT.value_of(9).to_exact_field()).unwrap();
        assert_eq!(pkt.load_u64(IN_PORT).unwrap(), 9);
        assert_eq!(pkt.in_port(), 9);
    }
}
