//! A packet-compatible collection of match fields keyed by type.

use std::collections::HashMap;
use std::fmt;

use super::{Field, Mask, Type};
use crate::packet::Packet;
use crate::Result;

/// Stores only non-wildcarded fields; all other types implicitly match
/// any value.
#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    entries: HashMap<Type, Field>,
}

impl FieldSet {
    pub fn new() -> FieldSet {
        FieldSet::default()
    }

    /// The stored bits selected by `mask`. An absent type reads as the
    /// wildcard field: the result's mask reports which bits are actually
    /// known.
    pub fn load(&self, mask: &Mask) -> Field {
        let t = mask.field_type();
        match self.entries.get(&t) {
            // restrict with an equal type cannot fail
            Some(stored) => stored
                .restrict(mask)
                .unwrap_or_else(|_| t.wildcard_field()),
            None => t.wildcard_field(),
        }
    }

    /// Merge a patch: replaces the masked bits of a stored field, or
    /// inserts the patch if the type was absent and the patch carries
    /// any bits.
    pub fn modify(&mut self, patch: &Field) {
        if patch.is_wildcard() && !self.entries.contains_key(&patch.field_type()) {
            return;
        }
        let t = patch.field_type();
        let merged = match self.entries.get(&t) {
            Some(stored) => Field::from_bits(
                t,
                &(stored.value_bits() & &!patch.mask_bits()) | patch.value_bits(),
                stored.mask_bits() | patch.mask_bits(),
            ),
            None => patch.clone(),
        };
        self.entries.insert(t, merged);
    }

    /// Clear the masked bits; a fully-wildcarded entry is dropped.
    pub fn erase(&mut self, mask: &Mask) {
        let t = mask.field_type();
        if let Some(stored) = self.entries.get(&t) {
            match stored.without(mask) {
                Ok(rest) if rest.is_wildcard() => {
                    self.entries.remove(&t);
                }
                Ok(rest) => {
                    self.entries.insert(t, rest);
                }
                Err(_) => {}
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate over the stored fields, in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A field set matches a packet iff the packet tests positive for
    /// every stored field.
    pub fn matches_packet<P: Packet + ?Sized>(&self, pkt: &mut P) -> Result<bool> {
        for field in self.entries.values() {
            if !pkt.test(field)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl PartialEq for FieldSet {
    fn eq(&self, other: &FieldSet) -> bool {
        self.entries == other.entries
    }
}

impl Eq for FieldSet {}

impl FromIterator<Field> for FieldSet {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> FieldSet {
        let mut set = FieldSet::new();
        for field in iter {
            set.modify(&field);
        }
        set
    }
}

impl Extend<Field> for FieldSet {
    fn extend<I: IntoIterator<Item = Field>>(&mut self, iter: I) {
        for field in iter {
            self.modify(&field);
        }
    }
}

impl Packet for FieldSet {
    fn load(&mut self, mask: &Mask) -> Result<Field> {
        Ok(FieldSet::load(self, mask))
    }

    fn modify(&mut self, patch: &Field) -> Result<()> {
        FieldSet::modify(self, patch);
        Ok(())
    }
}

impl fmt::Display for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut fields: Vec<&Field> = self.entries.values().collect();
        fields.sort_by_key(|f| (f.field_type().ns(), f.field_type().id()));
        let mut delim = false;
        for field in fields {
            write!(f, "{}{}", if delim { " && " } else { "" }, field)?;
            delim = true;
        }
        Ok(())
    }
}
