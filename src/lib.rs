//! Reactive OpenFlow 1.3 forwarding engine.
//!
//! A forwarding policy is an ordinary function over a packet. The engine
//! runs it once per table-miss under tracing, folds the observed loads and
//! tests into a [trace tree](trace::tree::TraceTree), and compiles the tree
//! into prioritized flow-table rules so that subsequent packets of the same
//! equivalence class never reach the controller.
//!
//! The layers, bottom up:
//!
//! - [`bits`] — fixed-width bit-strings with big-endian serialization.
//! - [`oxm`] — the typed match-field algebra (type, value, mask, field)
//!   and the [field set](oxm::FieldSet) keyed collection.
//! - [`packet`] — the three-method packet contract (`load`/`test`/`modify`)
//!   every higher layer programs against.
//! - [`parser`] — a packet implementation over a raw L2 frame.
//! - [`trace`] — the traceable packet decorator, the tracer, and the
//!   trace tree itself.
//! - [`wire`] — the OpenFlow 1.3 messages the engine exchanges with
//!   switches.
//! - [`backend`] — translation of compiled tree nodes into flow-mods,
//!   packet-outs and barriers on a switch transport.
//! - [`runtime`] — the event driver gluing all of the above together.

use thiserror::Error;

/// The error type for the engine.
///
/// Policy-induced errors (unsupported fields, decision conflicts,
/// exhausted priority ranges) are reported to the embedder and never
/// abort the worker; wire-level errors cause the offending message to be
/// dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An operation cannot proceed because a buffer is empty or full.
    #[error("buffer space exhausted")]
    Exhausted,
    /// An incoming packet could not be parsed because some of its fields
    /// were out of bounds of the received data.
    #[error("truncated packet")]
    Truncated,
    /// An incoming packet could not be recognized and was dropped.
    #[error("unrecognized packet")]
    Unrecognized,
    /// An incoming packet was recognized but was self-contradictory.
    #[error("malformed packet")]
    Malformed,
    /// An OXM field could not be parsed because the "class" field in the
    /// header is invalid.
    #[error("unknown oxm class {0:#06x}")]
    BadOxmClass(u16),
    /// An OXM field belongs to a class this engine does not interpret.
    #[error("unsupported oxm class {0:#06x}")]
    UnsupportedOxmClass(u16),
    /// An OXM field could not be parsed because the "field" field in the
    /// header is invalid.
    #[error("unknown oxm field {0}")]
    BadOxmField(u8),
    /// The match type field in a flow match header is invalid.
    #[error("unknown flow match type {0}")]
    BadMatchType(u16),
    /// A bit-string does not match the width of the field type it was
    /// combined with.
    #[error("bit-string of {actual} bits where {expected} were expected")]
    BadBitLength { actual: usize, expected: usize },
    /// A fuzzy mask was constructed over a non-maskable field type.
    #[error("fuzzy mask on non-maskable field {ns:#06x}:{id}")]
    BadMask { ns: u16, id: u8 },
    /// A binary operation was applied to fields of different types.
    #[error("operands of different field types: {lhs_ns:#06x}:{lhs_id} and {rhs_ns:#06x}:{rhs_id}")]
    BadOperands {
        lhs_ns: u16,
        lhs_id: u8,
        rhs_ns: u16,
        rhs_id: u8,
    },
    /// A type-erased value was downcast to a field type it does not carry.
    #[error("field {ns:#06x}:{id} downcast to a different type")]
    BadCast { ns: u16, id: u8 },
    /// A policy requested a field the parser did not bind.
    #[error("field {ns:#06x}:{id} is not bound by this packet")]
    UnsupportedField { ns: u16, id: u8 },
    /// A trace step contradicts the node already present in the tree.
    /// Indicates a non-deterministic policy; the tree must be rebuilt.
    #[error("trace contradicts the existing trace tree")]
    InconsistentTrace,
    /// No integer priority is left between the inherited bounds.
    #[error("no priority left in ({left}, {right})")]
    PriorityExceeded { left: u16, right: u16 },
    /// Two packet-miss handlers produced incompatible decisions.
    #[error("handlers returned conflicting decisions")]
    DecisionConflict,
    /// The pipeline finished without deciding the fate of the packet.
    #[error("no handler decided the fate of the packet")]
    UnhandledPacket,
    /// A message was addressed to a switch with no live connection.
    #[error("no connection to switch {0:#x}")]
    UnknownSwitch(u64),
    /// The transport failed to deliver a message; the connection is dead.
    #[error("transport send to switch {0:#x} failed")]
    TransportSend(u64),
    /// A packet-miss handler failed; carries the handler name and the
    /// trace recorded up to the failure.
    #[error("handler {name:?} failed: {source}")]
    InHandler {
        name: String,
        #[source]
        source: Box<Error>,
        trace: String,
    },
}

impl Error {
    /// Attach a trace log to an `InHandler` error; leaves other errors
    /// untouched.
    pub fn with_trace(mut self, log: String) -> Self {
        if let Error::InHandler { ref mut trace, .. } = self {
            *trace = log;
        }
        self
    }
}

/// The result type for the engine.
pub type Result<T> = core::result::Result<T, Error>;

/// Parse/emit contract shared by all wire representations.
pub trait Repr
where
    Self: Sized,
{
    /// Parse a packet and return a high-level representation.
    fn parse(buffer: &[u8]) -> Result<Self>;

    /// Return the length of a packet that will be emitted from this
    /// high-level representation.
    fn buffer_len(&self) -> usize;

    /// Emit a high-level representation into a buffer.
    fn emit(&self, buffer: &mut [u8]) -> Result<()>;
}

pub(crate) mod field {
    use core::ops;
    pub type Field = ops::Range<usize>;
    pub type Rest = ops::RangeFrom<usize>;
}

#[macro_use]
mod macros;

pub mod backend;
pub mod bits;
pub mod config;
pub mod decision;
pub mod flow;
pub mod oxm;
pub mod packet;
pub mod parser;
pub mod port;
pub mod runtime;
pub mod trace;
pub mod wire;

pub use bits::Bits;
pub use config::Config;
pub use decision::Decision;
pub use flow::{Flow, FlowRef, FlowState};
pub use oxm::{Field, FieldSet, Mask, Type, Value};
pub use packet::{Packet, TraceablePacket};
pub use parser::PacketParser;
pub use port::PortNumber;
pub use runtime::Runtime;
