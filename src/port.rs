//! The OpenFlow 1.3 port number space.
//!
//! Port numbers are 32 bits wide, with the top of the range reserved
//! for the symbolic destinations a rule may forward to. Raw values that
//! fall in the reserved range without naming anything still travel over
//! the wire, so the conversion from `u32` is total.

use core::fmt;

mod consts {
    /// Largest valid physical or logical port number.
    pub const MAX: u32 = 0xffff_ff00;
    /// Send back out the ingress port.
    pub const IN_PORT: u32 = 0xffff_fff8;
    /// Resubmit to the first flow table; packet-out only.
    pub const TABLE: u32 = 0xffff_fff9;
    /// Forward through the switch's traditional non-OpenFlow pipeline.
    pub const NORMAL: u32 = 0xffff_fffa;
    /// Flood through the non-OpenFlow pipeline.
    pub const FLOOD: u32 = 0xffff_fffb;
    /// All standard ports except the ingress port.
    pub const ALL: u32 = 0xffff_fffc;
    /// Send to the controller.
    pub const CONTROLLER: u32 = 0xffff_fffd;
    /// The switch's local networking stack.
    pub const LOCAL: u32 = 0xffff_fffe;
    /// Wildcard for requests that leave the port unconstrained.
    pub const ANY: u32 = 0xffff_ffff;
}

/// A switch port, physical or reserved.
///
/// The engine forwards unicast and multicast decisions out `Regular`
/// ports, compiles broadcast decisions to `Flood`, points sentinel and
/// inspect rules at `Controller`, and uses `Any` where a flow-mod
/// delete does not constrain the output port.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PortNumber {
    Max,
    InPort,
    Table,
    Normal,
    Flood,
    All,
    Controller,
    Local,
    Any,
    Regular(u32),
}

impl PortNumber {
    /// `true` for the symbolic ports of the reserved range.
    pub fn is_reserved(&self) -> bool {
        !matches!(self, PortNumber::Regular(_))
    }
}

impl From<u32> for PortNumber {
    fn from(value: u32) -> Self {
        match value {
            consts::MAX => PortNumber::Max,
            consts::IN_PORT => PortNumber::InPort,
            consts::TABLE => PortNumber::Table,
            consts::NORMAL => PortNumber::Normal,
            consts::FLOOD => PortNumber::Flood,
            consts::ALL => PortNumber::All,
            consts::CONTROLLER => PortNumber::Controller,
            consts::LOCAL => PortNumber::Local,
            consts::ANY => PortNumber::Any,
            other => PortNumber::Regular(other),
        }
    }
}

impl From<PortNumber> for u32 {
    fn from(value: PortNumber) -> Self {
        match value {
            PortNumber::Max => consts::MAX,
            PortNumber::InPort => consts::IN_PORT,
            PortNumber::Table => consts::TABLE,
            PortNumber::Normal => consts::NORMAL,
            PortNumber::Flood => consts::FLOOD,
            PortNumber::All => consts::ALL,
            PortNumber::Controller => consts::CONTROLLER,
            PortNumber::Local => consts::LOCAL,
            PortNumber::Any => consts::ANY,
            PortNumber::Regular(other) => other,
        }
    }
}

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PortNumber::Regular(n) => write!(f, "{}", n),
            PortNumber::Max => write!(f, "max"),
            PortNumber::InPort => write!(f, "in-port"),
            PortNumber::Table => write!(f, "table"),
            PortNumber::Normal => write!(f, "normal"),
            PortNumber::Flood => write!(f, "flood"),
            PortNumber::All => write!(f, "all"),
            PortNumber::Controller => write!(f, "controller"),
            PortNumber::Local => write!(f, "local"),
            PortNumber::Any => write!(f, "any"),
        }
    }
}
