//! The packet contract every layer of the engine programs against.

use crate::oxm::{Field, Mask, Type, Value};
use crate::{Error, Result};

/// Read and write access to a packet's match fields.
///
/// A packet is anything that can answer `load`, `test` and `modify` over
/// the field algebra: a parsed frame, an in-memory field set, or a
/// decorator over either.
pub trait Packet {
    /// Read the bits selected by `mask`. The returned field's mask tells
    /// which of the requested bits the packet actually knows.
    fn load(&mut self, mask: &Mask) -> Result<Field>;

    /// Test a predicate. The default reads the needed bits and matches;
    /// implementations may override it to avoid unnecessary loads.
    fn test(&mut self, need: &Field) -> Result<bool> {
        let loaded = self.load(&need.mask())?;
        loaded.matches(need)
    }

    /// Patch the masked bits of a field.
    fn modify(&mut self, patch: &Field) -> Result<()>;

    /// Load a whole field as a value; fails if the packet does not know
    /// all of its bits.
    fn load_exact(&mut self, t: Type) -> Result<Value> {
        let field = self.load(&t.exact())?;
        if !field.is_exact() {
            return Err(Error::UnsupportedField {
                ns: t.ns(),
                id: t.id(),
            });
        }
        Ok(field.value())
    }

    /// Load a whole field as an unsigned integer.
    fn load_u64(&mut self, t: Type) -> Result<u64> {
        self.load_exact(t)?.to_u64()
    }
}

/// The extra capabilities a packet gains under tracing.
pub trait TraceablePacket: Packet {
    /// Read bits without recording them in the trace. The result does
    /// not constrain the compiled flow's match.
    fn watch(&mut self, mask: &Mask) -> Result<Field>;

    /// Record a virtual-field load: the policy's further behavior
    /// depends on `what`, which was derived from the packet bits named
    /// by `by`. Distinct `by` keys mapping to the same `what` share one
    /// continuation in the trace tree.
    fn vload(&mut self, by: &Field, what: &Field);
}
