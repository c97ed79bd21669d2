//! Typed match-field algebra.
//!
//! Every higher layer of the engine speaks about packet headers through
//! four value types built on [`Bits`]:
//!
//! - [`Type`] names a field: a namespace, a class-specific id, a width in
//!   bits and a maskable flag. Equality considers only `(ns, id)`.
//! - [`Value`] is a concrete bit-string of the field's width.
//! - [`Mask`] selects a subset of the field's bits. It is `exact` when
//!   all bits are set, `wildcard` when none are, `fuzzy` otherwise; a
//!   fuzzy mask over a non-maskable type is rejected.
//! - [`Field`] is a value under a mask, with the invariant that bits
//!   outside the mask are held at zero.
//!
//! The operations mirror how matches behave in a flow table: two fields
//! match when they agree on the intersection of their masks, and a
//! rewrite replaces exactly the masked bits.

use core::fmt;
use core::hash::{Hash, Hasher};

use crate::bits::Bits;
use crate::{Error, Result};

pub mod basic;
pub mod consts;
mod field_set;

pub use self::field_set::FieldSet;

/// A match-field type: namespace, id, maskable flag and width.
#[derive(Debug, Clone, Copy)]
pub struct Type {
    ns: u16,
    id: u8,
    maskable: bool,
    nbits: u16,
}

impl Type {
    pub const fn new(ns: u16, id: u8, maskable: bool, nbits: u16) -> Type {
        Type {
            ns,
            id,
            maskable,
            nbits,
        }
    }

    /// The namespace (OXM class) of the field.
    pub const fn ns(&self) -> u16 {
        self.ns
    }

    /// The class-specific field id.
    pub const fn id(&self) -> u8 {
        self.id
    }

    /// The field width in bits.
    pub const fn nbits(&self) -> usize {
        self.nbits as usize
    }

    /// The field width in whole bytes.
    pub const fn nbytes(&self) -> usize {
        (self.nbits as usize / 8) + if self.nbits % 8 != 0 { 1 } else { 0 }
    }

    /// Whether the field supports fuzzy masks.
    pub const fn maskable(&self) -> bool {
        self.maskable
    }

    /// A value of this type from a bit-string of matching width.
    pub fn value(self, bits: Bits) -> Result<Value> {
        if bits.len() != self.nbits() {
            return Err(Error::BadBitLength {
                actual: bits.len(),
                expected: self.nbits(),
            });
        }
        Ok(Value { t: self, bits })
    }

    /// A value of this type from the low bits of an integer.
    pub fn value_of(self, value: u64) -> Value {
        Value {
            t: self,
            bits: Bits::from_u64(self.nbits(), value),
        }
    }

    /// A mask of this type from a bit-string of matching width. Fails
    /// with [`Error::BadMask`] on a fuzzy mask over a non-maskable type.
    pub fn mask(self, bits: Bits) -> Result<Mask> {
        if bits.len() != self.nbits() {
            return Err(Error::BadBitLength {
                actual: bits.len(),
                expected: self.nbits(),
            });
        }
        if !self.maskable && !(bits.all() || bits.none()) {
            return Err(Error::BadMask {
                ns: self.ns,
                id: self.id,
            });
        }
        Ok(Mask { t: self, bits })
    }

    /// A mask of this type from the low bits of an integer.
    pub fn mask_of(self, mask: u64) -> Result<Mask> {
        self.mask(Bits::from_u64(self.nbits(), mask))
    }

    /// The all-ones mask of this type.
    pub fn exact(self) -> Mask {
        Mask {
            t: self,
            bits: Bits::ones(self.nbits()),
        }
    }

    /// The all-zeros mask of this type.
    pub fn wildcard(self) -> Mask {
        Mask {
            t: self,
            bits: Bits::zero(self.nbits()),
        }
    }

    /// The field of this type that matches anything.
    pub fn wildcard_field(self) -> Field {
        Field {
            t: self,
            value: Bits::zero(self.nbits()),
            mask: Bits::zero(self.nbits()),
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Type) -> bool {
        self.ns == other.ns && self.id == other.id
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(u64::from(self.ns) << 8 | u64::from(self.id));
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match basic::name_of(*self) {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{:#06x}:{}", self.ns, self.id),
        }
    }
}

fn binop_type(lhs: Type, rhs: Type) -> Result<Type> {
    if lhs == rhs {
        Ok(lhs)
    } else {
        Err(Error::BadOperands {
            lhs_ns: lhs.ns,
            lhs_id: lhs.id,
            rhs_ns: rhs.ns,
            rhs_id: rhs.id,
        })
    }
}

/// A concrete value of a match field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    t: Type,
    bits: Bits,
}

impl Value {
    /// The field type this value belongs to.
    pub fn field_type(&self) -> Type {
        self.t
    }

    pub fn bits(&self) -> &Bits {
        &self.bits
    }

    /// The value as an unsigned integer; fails on widths above 64 bits.
    pub fn to_u64(&self) -> Result<u64> {
        self.bits.to_u64().ok_or(Error::BadCast {
            ns: self.t.ns,
            id: self.t.id,
        })
    }

    /// Checked downcast: the value itself if its type is `t`.
    pub fn downcast(self, t: Type) -> Result<Value> {
        if self.t != t {
            return Err(Error::BadCast {
                ns: self.t.ns,
                id: self.t.id,
            });
        }
        Ok(self)
    }

    /// Masked equality with a field: equal on the field's masked bits.
    pub fn matches(&self, field: &Field) -> Result<bool> {
        binop_type(self.t, field.t)?;
        Ok(&self.bits & &field.mask == field.value)
    }

    /// Apply a rewrite: masked bits are replaced by the field's value.
    pub fn rewrite(&self, patch: &Field) -> Result<Value> {
        binop_type(self.t, patch.t)?;
        Ok(Value {
            t: self.t,
            bits: &(&self.bits & &!&patch.mask) | &patch.value,
        })
    }

    /// Combine with a mask into a field.
    pub fn with_mask(&self, mask: &Mask) -> Result<Field> {
        let t = binop_type(self.t, mask.t)?;
        Ok(Field {
            t,
            value: &self.bits & &mask.bits,
            mask: mask.bits.clone(),
        })
    }

    /// The exact-match field carrying this value.
    pub fn to_exact_field(&self) -> Field {
        Field {
            t: self.t,
            value: self.bits.clone(),
            mask: Bits::ones(self.t.nbits()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} == {}", self.t, self.bits)
    }
}

/// A subset of a match field's bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    t: Type,
    bits: Bits,
}

impl Mask {
    /// The field type this mask belongs to.
    pub fn field_type(&self) -> Type {
        self.t
    }

    pub fn bits(&self) -> &Bits {
        &self.bits
    }

    /// `true` iff every bit is selected.
    pub fn is_exact(&self) -> bool {
        self.bits.all()
    }

    /// `true` iff no bit is selected.
    pub fn is_wildcard(&self) -> bool {
        self.bits.none()
    }

    /// `true` iff some but not all bits are selected.
    pub fn is_fuzzy(&self) -> bool {
        !(self.is_exact() || self.is_wildcard())
    }

    /// Checked downcast: the mask itself if its type is `t`.
    pub fn downcast(self, t: Type) -> Result<Mask> {
        if self.t != t {
            return Err(Error::BadCast {
                ns: self.t.ns,
                id: self.t.id,
            });
        }
        Ok(self)
    }

    /// Bit intersection of two masks of the same type.
    pub fn and(&self, rhs: &Mask) -> Result<Mask> {
        let t = binop_type(self.t, rhs.t)?;
        Ok(Mask {
            t,
            bits: &self.bits & &rhs.bits,
        })
    }

    /// Bit union of two masks of the same type.
    pub fn or(&self, rhs: &Mask) -> Result<Mask> {
        let t = binop_type(self.t, rhs.t)?;
        Ok(Mask {
            t,
            bits: &self.bits | &rhs.bits,
        })
    }

    /// The complement mask. May turn a non-maskable type's exact mask
    /// into its wildcard and vice versa; a fuzzy complement only arises
    /// on maskable types, so no check is needed.
    pub fn invert(&self) -> Mask {
        Mask {
            t: self.t,
            bits: !&self.bits,
        }
    }

    /// The field matching `value` on exactly this mask's bits.
    pub fn matching(&self, value: u64) -> Field {
        Field {
            t: self.t,
            value: &Bits::from_u64(self.t.nbits(), value) & &self.bits,
            mask: self.bits.clone(),
        }
    }
}

impl fmt::Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} & {}", self.t, self.bits)
    }
}

/// A value under a mask. Bits outside the mask are held at zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    t: Type,
    value: Bits,
    mask: Bits,
}

impl Field {
    /// Build a field from raw value and mask bit-strings, enforcing the
    /// width and maskability rules and clearing value bits outside the
    /// mask.
    pub fn new(t: Type, value: Bits, mask: Bits) -> Result<Field> {
        let value = t.value(value)?.bits;
        let mask = t.mask(mask)?.bits;
        Ok(Field {
            t,
            value: &value & &mask,
            mask,
        })
    }

    /// Construction that skips the maskability check; used internally
    /// where both parts are already known to be valid for `t`.
    pub(crate) fn from_bits(t: Type, value: Bits, mask: Bits) -> Field {
        debug_assert_eq!(value.len(), t.nbits());
        debug_assert_eq!(mask.len(), t.nbits());
        Field {
            t,
            value: &value & &mask,
            mask,
        }
    }

    /// The field type.
    pub fn field_type(&self) -> Type {
        self.t
    }

    /// The value bits (already restricted to the mask).
    pub fn value_bits(&self) -> &Bits {
        &self.value
    }

    /// The mask bits.
    pub fn mask_bits(&self) -> &Bits {
        &self.mask
    }

    /// The value part.
    pub fn value(&self) -> Value {
        Value {
            t: self.t,
            bits: self.value.clone(),
        }
    }

    /// The mask part.
    pub fn mask(&self) -> Mask {
        Mask {
            t: self.t,
            bits: self.mask.clone(),
        }
    }

    pub fn is_exact(&self) -> bool {
        self.mask.all()
    }

    pub fn is_wildcard(&self) -> bool {
        self.mask.none()
    }

    pub fn is_fuzzy(&self) -> bool {
        !(self.is_exact() || self.is_wildcard())
    }

    /// Checked downcast: the field itself if its type is `t`.
    pub fn downcast(self, t: Type) -> Result<Field> {
        if self.t != t {
            return Err(Error::BadCast {
                ns: self.t.ns,
                id: self.t.id,
            });
        }
        Ok(self)
    }

    /// Match: equal under the intersection of both masks.
    pub fn matches(&self, rhs: &Field) -> Result<bool> {
        binop_type(self.t, rhs.t)?;
        let m = &self.mask & &rhs.mask;
        Ok(&self.value & &m == &rhs.value & &m)
    }

    /// Compose rewrites: the patch's bits win, masks union.
    pub fn rewrite(&self, patch: &Field) -> Result<Field> {
        let t = binop_type(self.t, patch.t)?;
        Ok(Field::from_bits(
            t,
            &(&self.value & &!&patch.mask) | &patch.value,
            &self.mask | &patch.mask,
        ))
    }

    /// Narrow to the intersection with another mask.
    pub fn restrict(&self, mask: &Mask) -> Result<Field> {
        let t = binop_type(self.t, mask.t)?;
        let m = &self.mask & &mask.bits;
        Ok(Field {
            t,
            value: &self.value & &m,
            mask: m,
        })
    }

    /// Narrow to the bits *outside* another mask.
    pub fn without(&self, mask: &Mask) -> Result<Field> {
        self.restrict(&mask.invert())
    }
}

impl From<Value> for Field {
    fn from(value: Value) -> Field {
        value.to_exact_field()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_fuzzy() {
            write!(f, "({} & {}) == {}", self.t, self.mask, self.value)
        } else if self.is_wildcard() {
            write!(f, "{} & *", self.t)
        } else {
            write!(f, "{} == {}", self.t, self.value)
        }
    }
}
