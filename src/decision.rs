//! The value type a policy returns for one packet.

use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use crate::flow::FlowRef;
use crate::oxm::{Field, Mask};
use crate::packet::Packet;
use crate::wire::actions::ActionList;
use crate::{Error, Result};

/// A flow lifetime bound in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Timeout {
    Seconds(u32),
    Infinite,
}

impl Timeout {
    /// The timeout as the protocol's 16-bit seconds field: saturated,
    /// with infinity encoded as zero.
    pub fn wire_seconds(self) -> u16 {
        match self {
            Timeout::Infinite => 0,
            Timeout::Seconds(s) => s.min(u32::from(u16::MAX)) as u16,
        }
    }

    pub fn is_zero(self) -> bool {
        self == Timeout::Seconds(0)
    }
}

/// Handler invoked for packets a switch copies to the controller under an
/// [`Inspect`](DecisionData::Inspect) decision. Returns `true` when the
/// packet was fully consumed.
pub type InspectHandler = Rc<dyn Fn(&mut dyn Packet, &FlowRef) -> Result<bool>>;

/// An embedder-supplied decision that compiles to its own action list.
pub trait CustomDecision {
    /// Append this decision's actions for the given switch.
    fn apply(&self, actions: &mut ActionList, dpid: u64);

    /// Restrict installation to these switches; empty means all.
    fn switches(&self) -> Vec<u64> {
        Vec::new()
    }

    /// Virtual-field projections for vload traces: pairs of a source key
    /// (over `by`'s bits) and the result key (over `what`'s bits) it maps
    /// to.
    fn virtual_fields(&self, _by: &Mask, _what: &Mask) -> Vec<(Field, Field)> {
        Vec::new()
    }
}

/// The shared attributes of every decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Base {
    pub return_: bool,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
}

impl Default for Base {
    fn default() -> Base {
        Base {
            return_: false,
            idle_timeout: Timeout::Infinite,
            hard_timeout: Timeout::Infinite,
        }
    }
}

/// What to do with a packet's equivalence class.
#[derive(Clone)]
pub enum DecisionData {
    /// The pipeline has not decided yet.
    Undefined,
    /// Discard.
    Drop,
    /// Forward out a single port.
    Unicast { port: u32 },
    /// Forward out a set of ports.
    Multicast { ports: BTreeSet<u32> },
    /// Flood.
    Broadcast,
    /// Keep forwarding but copy the first `max_bytes` bytes to the
    /// controller and run `handler` on each copy.
    Inspect {
        max_bytes: u16,
        handler: InspectHandler,
    },
    /// An embedder-defined action list.
    Custom(Rc<dyn CustomDecision>),
}

impl fmt::Debug for DecisionData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecisionData::Undefined => write!(f, "Undefined"),
            DecisionData::Drop => write!(f, "Drop"),
            DecisionData::Unicast { port } => write!(f, "Unicast({})", port),
            DecisionData::Multicast { ports } => write!(f, "Multicast({:?})", ports),
            DecisionData::Broadcast => write!(f, "Broadcast"),
            DecisionData::Inspect { max_bytes, .. } => write!(f, "Inspect({})", max_bytes),
            DecisionData::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// A decision under construction. Handlers receive the previous
/// decision and refine it; refinements that disagree with an already
/// concrete decision fail with [`Error::DecisionConflict`].
#[derive(Debug, Clone, Default)]
pub struct Decision {
    data: DecisionData,
    base: Base,
}

impl Default for DecisionData {
    fn default() -> DecisionData {
        DecisionData::Undefined
    }
}

impl Decision {
    pub fn undefined() -> Decision {
        Decision::default()
    }

    pub fn data(&self) -> &DecisionData {
        &self.data
    }

    pub fn base(&self) -> &Base {
        &self.base
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self.data, DecisionData::Undefined)
    }

    pub fn is_return(&self) -> bool {
        self.base.return_
    }

    /// A zero idle timeout marks a decision answered with a packet-out
    /// only; no rule is worth installing for it.
    pub fn is_disposable(&self) -> bool {
        self.base.idle_timeout.is_zero()
    }

    /// Stop the pipeline after the current handler.
    pub fn return_(mut self) -> Decision {
        self.base.return_ = true;
        self
    }

    /// Clamp the idle timeout. Timeouts only ever shrink.
    pub fn idle_timeout(mut self, timeout: Timeout) -> Decision {
        self.base.idle_timeout = self.base.idle_timeout.min(timeout);
        self
    }

    /// Clamp the hard timeout, and the idle timeout with it.
    pub fn hard_timeout(mut self, timeout: Timeout) -> Decision {
        self.base.hard_timeout = self.base.hard_timeout.min(timeout);
        self.base.idle_timeout = self.base.idle_timeout.min(timeout);
        self
    }

    /// Forward out `port`.
    pub fn unicast(self, port: u32) -> Result<Decision> {
        match self.data {
            DecisionData::Undefined => {}
            DecisionData::Unicast { port: prev } if prev == port => {}
            _ => return Err(Error::DecisionConflict),
        }
        Ok(Decision {
            data: DecisionData::Unicast { port },
            base: self.base,
        })
    }

    /// Forward out every port in `ports`.
    pub fn multicast(self, ports: BTreeSet<u32>) -> Result<Decision> {
        match self.data {
            DecisionData::Undefined => {}
            DecisionData::Multicast { ports: ref prev } if *prev == ports => {}
            _ => return Err(Error::DecisionConflict),
        }
        Ok(Decision {
            data: DecisionData::Multicast { ports },
            base: self.base,
        })
    }

    /// Flood.
    pub fn broadcast(self) -> Result<Decision> {
        match self.data {
            DecisionData::Undefined | DecisionData::Broadcast => {}
            _ => return Err(Error::DecisionConflict),
        }
        Ok(Decision {
            data: DecisionData::Broadcast,
            base: self.base,
        })
    }

    /// Copy up to `max_bytes` bytes of each packet to the controller.
    /// Combining two inspects keeps the larger byte count and the new
    /// handler.
    pub fn inspect(self, max_bytes: u16, handler: InspectHandler) -> Result<Decision> {
        let max_bytes = match self.data {
            DecisionData::Undefined => max_bytes,
            DecisionData::Inspect {
                max_bytes: prev, ..
            } => max_bytes.max(prev),
            _ => return Err(Error::DecisionConflict),
        };
        Ok(Decision {
            data: DecisionData::Inspect { max_bytes, handler },
            base: self.base,
        })
    }

    /// Install an embedder-defined action list.
    pub fn custom(self, body: Rc<dyn CustomDecision>) -> Result<Decision> {
        match self.data {
            DecisionData::Undefined => {}
            _ => return Err(Error::DecisionConflict),
        }
        Ok(Decision {
            data: DecisionData::Custom(body),
            base: self.base,
        })
    }

    /// Discard the packet. Overrides any previous decision.
    pub fn discard(self) -> Decision {
        Decision {
            data: DecisionData::Drop,
            base: self.base,
        }
    }

    /// Forget everything, including timeouts.
    pub fn clear(self) -> Decision {
        Decision::undefined()
    }
}
