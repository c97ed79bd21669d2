//! Tracing a policy's view of one packet, and the tree it feeds.

use core::fmt;

use crate::oxm::Field;

pub mod traceable;
pub mod tree;

pub use self::traceable::{ModTrackingPacket, TracedPacket};
pub use self::tree::{Installer, TraceTree};

/// One observed interaction between a policy and a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEntry {
    /// The policy read these (previously unexplored) bits.
    Load(Field),
    /// The policy tested this predicate and observed `outcome`.
    Test { pred: Field, outcome: bool },
    /// The policy branched on a virtual field `what` derived from the
    /// packet bits `by`.
    VLoad { by: Field, what: Field },
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TraceEntry::Load(field) => write!(f, "load {}", field),
            TraceEntry::Test { pred, outcome } => write!(f, "test {} -> {}", pred, outcome),
            TraceEntry::VLoad { by, what } => write!(f, "vload {} => {}", by, what),
        }
    }
}

/// Receives the interactions observed while a policy handles one miss.
pub trait Tracer {
    fn load(&mut self, unexplored: Field);
    fn test(&mut self, pred: Field, outcome: bool);
    fn vload(&mut self, by: Field, what: Field);
}

/// The recorded sequence of one policy execution, ready to be folded
/// into a [`TraceTree`].
#[derive(Debug, Clone, Default)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn new() -> Trace {
        Trace::default()
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Tracer for Trace {
    fn load(&mut self, unexplored: Field) {
        self.entries.push(TraceEntry::Load(unexplored));
    }

    fn test(&mut self, pred: Field, outcome: bool) {
        self.entries.push(TraceEntry::Test { pred, outcome });
    }

    fn vload(&mut self, by: Field, what: Field) {
        self.entries.push(TraceEntry::VLoad { by, what });
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut delim = false;
        for entry in &self.entries {
            write!(f, "{}{}", if delim { "; " } else { "" }, entry)?;
            delim = true;
        }
        Ok(())
    }
}
