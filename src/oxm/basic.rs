//! Well-known OpenFlow-Basic field types and address conversions.

use smoltcp::wire::{EthernetAddress, Ipv4Address, Ipv6Address};

use super::consts::{self, ns};
use super::{Field, Type, Value};
use crate::bits::Bits;
use crate::{Error, Result};

const fn ofb(id: u8, maskable: bool, nbits: u16) -> Type {
    Type::new(ns::OPENFLOW_BASIC, id, maskable, nbits)
}

pub const IN_PORT: Type = ofb(consts::IN_PORT, false, 32);
pub const ETH_DST: Type = ofb(consts::ETH_DST, true, 48);
pub const ETH_SRC: Type = ofb(consts::ETH_SRC, true, 48);
pub const ETH_TYPE: Type = ofb(consts::ETH_TYPE, false, 16);
pub const VLAN_VID: Type = ofb(consts::VLAN_VID, true, 12);
pub const IP_PROTO: Type = ofb(consts::IP_PROTO, false, 8);
pub const IPV4_SRC: Type = ofb(consts::IPV4_SRC, true, 32);
pub const IPV4_DST: Type = ofb(consts::IPV4_DST, true, 32);
pub const TCP_SRC: Type = ofb(consts::TCP_SRC, false, 16);
pub const TCP_DST: Type = ofb(consts::TCP_DST, false, 16);
pub const UDP_SRC: Type = ofb(consts::UDP_SRC, false, 16);
pub const UDP_DST: Type = ofb(consts::UDP_DST, false, 16);
pub const ICMPV4_TYPE: Type = ofb(consts::ICMPV4_TYPE, false, 8);
pub const ICMPV4_CODE: Type = ofb(consts::ICMPV4_CODE, false, 8);
pub const ARP_OP: Type = ofb(consts::ARP_OP, false, 16);
pub const ARP_SPA: Type = ofb(consts::ARP_SPA, true, 32);
pub const ARP_TPA: Type = ofb(consts::ARP_TPA, true, 32);
pub const ARP_SHA: Type = ofb(consts::ARP_SHA, true, 48);
pub const ARP_THA: Type = ofb(consts::ARP_THA, true, 48);
pub const IPV6_SRC: Type = ofb(consts::IPV6_SRC, true, 128);
pub const IPV6_DST: Type = ofb(consts::IPV6_DST, true, 128);

/// Every basic type the engine knows, indexed for wire parsing.
const TYPES: &[Type] = &[
    IN_PORT,
    ETH_DST,
    ETH_SRC,
    ETH_TYPE,
    VLAN_VID,
    IP_PROTO,
    IPV4_SRC,
    IPV4_DST,
    TCP_SRC,
    TCP_DST,
    UDP_SRC,
    UDP_DST,
    ICMPV4_TYPE,
    ICMPV4_CODE,
    ARP_OP,
    ARP_SPA,
    ARP_TPA,
    ARP_SHA,
    ARP_THA,
    IPV6_SRC,
    IPV6_DST,
];

/// Look up a basic field type by id; `None` for ids the engine does not
/// interpret.
pub fn type_of(id: u8) -> Option<Type> {
    TYPES.iter().find(|t| t.id() == id).copied()
}

/// The printable name of a known type.
pub fn name_of(t: Type) -> Option<&'static str> {
    if t.ns() != ns::OPENFLOW_BASIC {
        return None;
    }
    Some(match t.id() {
        consts::IN_PORT => "in_port",
        consts::ETH_DST => "eth_dst",
        consts::ETH_SRC => "eth_src",
        consts::ETH_TYPE => "eth_type",
        consts::VLAN_VID => "vlan_vid",
        consts::IP_PROTO => "ip_proto",
        consts::IPV4_SRC => "ipv4_src",
        consts::IPV4_DST => "ipv4_dst",
        consts::TCP_SRC => "tcp_src",
        consts::TCP_DST => "tcp_dst",
        consts::UDP_SRC => "udp_src",
        consts::UDP_DST => "udp_dst",
        consts::ICMPV4_TYPE => "icmpv4_type",
        consts::ICMPV4_CODE => "icmpv4_code",
        consts::ARP_OP => "arp_op",
        consts::ARP_SPA => "arp_spa",
        consts::ARP_TPA => "arp_tpa",
        consts::ARP_SHA => "arp_sha",
        consts::ARP_THA => "arp_tha",
        consts::IPV6_SRC => "ipv6_src",
        consts::IPV6_DST => "ipv6_dst",
        _ => return None,
    })
}

/// An Ethernet address value for `ETH_SRC`, `ETH_DST`, `ARP_SHA` or
/// `ARP_THA`.
pub fn ethaddr(t: Type, addr: EthernetAddress) -> Result<Value> {
    t.value(Bits::from_buffer(48, addr.as_bytes())?)
}

/// An IPv4 address value for `IPV4_SRC`, `IPV4_DST`, `ARP_SPA` or
/// `ARP_TPA`.
pub fn ipv4addr(t: Type, addr: Ipv4Address) -> Result<Value> {
    t.value(Bits::from_buffer(32, addr.as_bytes())?)
}

/// An IPv6 address value for `IPV6_SRC` or `IPV6_DST`.
pub fn ipv6addr(t: Type, addr: Ipv6Address) -> Result<Value> {
    t.value(Bits::from_buffer(128, addr.as_bytes())?)
}

/// Read an exact 48-bit field back as an Ethernet address.
pub fn to_ethaddr(field: &Field) -> Result<EthernetAddress> {
    let t = field.field_type();
    if t.nbits() != 48 {
        return Err(Error::BadCast {
            ns: t.ns(),
            id: t.id(),
        });
    }
    Ok(EthernetAddress::from_bytes(field.value_bits().as_bytes()))
}

/// Read an exact 32-bit field back as an IPv4 address.
pub fn to_ipv4addr(field: &Field) -> Result<Ipv4Address> {
    let t = field.field_type();
    if t.nbits() != 32 {
        return Err(Error::BadCast {
            ns: t.ns(),
            id: t.id(),
        });
    }
    Ok(Ipv4Address::from_bytes(field.value_bits().as_bytes()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_type_of_roundtrip() {
        for t in TYPES {
            assert_eq!(type_of(t.id()), Some(*t));
        }
        assert_eq!(type_of(42), None);
    }

    #[test]
    fn test_ethaddr_roundtrip() {
        let addr = EthernetAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        let value = ethaddr(ETH_SRC, addr).unwrap();
        assert_eq!(value.to_u64().unwrap(), 0x1122_3344_5566);
        assert_eq!(to_ethaddr(&value.to_exact_field()).unwrap(), addr);
    }

    #[test]
    fn test_ipv4addr_roundtrip() {
        let addr = Ipv4Address::new(192, 168, 2, 3);
        let value = ipv4addr(ARP_SPA, addr).unwrap();
        assert_eq!(to_ipv4addr(&value.to_exact_field()).unwrap(), addr);
    }
}
