//! Value references and the pointer-base lattice.
//!
//! A `ValueRef` names an IR value within a speculation context, possibly
//! qualified: `PtrAsInt` stands for "integer equal to this pointer base
//! plus a byte offset" (pointer-to-int round trips), `VaArg` for a
//! variadic slot at an inlined call boundary. Equality and ordering are
//! component-wise; hashing covers only the (value, context) pair so a
//! qualified ref probes the same bucket as its plain form.

use std::fmt;
use std::hash::{Hash, Hasher};

use smallvec::SmallVec;

use crate::ir::Value;
use crate::state::Ctx;

/// Candidate sets larger than this collapse to overdefined.
pub const PB_MAX: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VaKind {
    /// The saved register-area base pointer itself.
    BasePtr,
    /// An integer-class slot.
    Int,
    /// A float-class slot.
    Fp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RefQual {
    Plain,
    PtrAsInt(i64),
    VaArg(VaKind, u32),
}

#[derive(Clone, Copy, Debug, Eq, PartialOrd, Ord)]
pub struct ValueRef {
    pub value: Value,
    pub ctx: Option<Ctx>,
    pub qual: RefQual,
}

impl PartialEq for ValueRef {
    fn eq(&self, other: &ValueRef) -> bool {
        self.value == other.value && self.ctx == other.ctx && self.qual == other.qual
    }
}

impl Hash for ValueRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
        self.ctx.hash(state);
    }
}

impl ValueRef {
    pub fn plain(value: Value, ctx: Ctx) -> ValueRef {
        ValueRef { value, ctx: Some(ctx), qual: RefQual::Plain }
    }

    /// A context-free reference: globals and constants.
    pub fn of_const(value: Value) -> ValueRef {
        ValueRef { value, ctx: None, qual: RefQual::Plain }
    }

    pub fn ptr_as_int(value: Value, ctx: Option<Ctx>, offset: i64) -> ValueRef {
        ValueRef { value, ctx, qual: RefQual::PtrAsInt(offset) }
    }

    pub fn va_arg(value: Value, ctx: Ctx, kind: VaKind, index: u32) -> ValueRef {
        ValueRef { value, ctx: Some(ctx), qual: RefQual::VaArg(kind, index) }
    }

    /// The byte offset carried by a `PtrAsInt` ref.
    pub fn offset(&self) -> Option<i64> {
        match self.qual {
            RefQual::PtrAsInt(o) => Some(o),
            _ => None,
        }
    }

    /// The same reference with its qualifier stripped.
    pub fn unqualified(&self) -> ValueRef {
        ValueRef { value: self.value, ctx: self.ctx, qual: RefQual::Plain }
    }

    /// Shift a `PtrAsInt` offset; a plain ref gains one.
    pub fn with_added_offset(&self, delta: i64) -> ValueRef {
        let base = match self.qual {
            RefQual::PtrAsInt(o) => o,
            _ => 0,
        };
        ValueRef { value: self.value, ctx: self.ctx, qual: RefQual::PtrAsInt(base + delta) }
    }
}

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ctx {
            Some(c) => write!(f, "{}@{}", self.value, c)?,
            None => write!(f, "{}", self.value)?,
        }
        match self.qual {
            RefQual::Plain => Ok(()),
            RefQual::PtrAsInt(o) => write!(f, "+{}", o),
            RefQual::VaArg(kind, i) => write!(f, ".va{:?}{}", kind, i),
        }
    }
}

/// Which kind of values a set describes. Mixing scalars with pointer
/// bases has no useful meaning and collapses to overdefined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SetKind {
    Unknown,
    Scalar,
    Pointer,
}

/// The lattice value stored per (value, context): unknown, a bounded set
/// of scalar constants or pointer bases, or overdefined.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointerBase {
    pub kind: SetKind,
    /// Sorted, deduplicated; meaningless when `overdef`.
    pub values: SmallVec<[ValueRef; 4]>,
    pub overdef: bool,
}

impl Default for PointerBase {
    fn default() -> Self {
        PointerBase { kind: SetKind::Unknown, values: SmallVec::new(), overdef: false }
    }
}

impl PointerBase {
    pub fn unknown() -> PointerBase {
        PointerBase::default()
    }

    pub fn overdef() -> PointerBase {
        PointerBase { kind: SetKind::Unknown, values: SmallVec::new(), overdef: true }
    }

    pub fn of(vr: ValueRef, kind: SetKind) -> PointerBase {
        let mut values = SmallVec::new();
        values.push(vr);
        PointerBase { kind, values, overdef: false }
    }

    /// Has any information been recorded (even "anything")?
    pub fn is_initialized(&self) -> bool {
        self.overdef || self.kind != SetKind::Unknown
    }

    pub fn is_singleton(&self) -> Option<&ValueRef> {
        if !self.overdef && self.values.len() == 1 {
            Some(&self.values[0])
        } else {
            None
        }
    }

    /// Insert one candidate, keeping the set sorted; overflow past
    /// `PB_MAX` collapses to overdefined. Returns whether anything
    /// changed.
    pub fn insert(&mut self, vr: ValueRef) -> bool {
        if self.overdef {
            return false;
        }
        match self.values.binary_search(&vr) {
            Ok(_) => false,
            Err(pos) => {
                if self.values.len() >= PB_MAX {
                    *self = PointerBase::overdef();
                } else {
                    self.values.insert(pos, vr);
                }
                true
            }
        }
    }

    /// Lattice join. Either side overdefined, or a scalar/pointer kind
    /// mismatch between two initialized sides, is overdefined.
    pub fn merge(&mut self, other: &PointerBase) -> bool {
        if self.overdef {
            return false;
        }
        if other.overdef {
            *self = PointerBase::overdef();
            return true;
        }
        let mut changed = false;
        if other.kind != SetKind::Unknown {
            if self.kind == SetKind::Unknown {
                self.kind = other.kind;
                changed = true;
            } else if self.kind != other.kind {
                *self = PointerBase::overdef();
                return true;
            }
        }
        for vr in &other.values {
            changed |= self.insert(*vr);
            if self.overdef {
                break;
            }
        }
        changed
    }

    /// `self ⊒ other`: no worse than `other` in the lattice (used to
    /// check monotonicity when finalising).
    pub fn no_worse_than(&self, other: &PointerBase) -> bool {
        if other.overdef {
            return true;
        }
        if self.overdef {
            return false;
        }
        self.values.len() <= other.values.len() || other.values.is_empty()
    }
}

impl fmt::Display for PointerBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SetKind::Scalar => write!(f, "S ")?,
            SetKind::Pointer => write!(f, "PB ")?,
            SetKind::Unknown => write!(f, "U ")?,
        }
        if self.overdef {
            return write!(f, "Overdef");
        }
        write!(f, "{{ ")?;
        for (i, vr) in self.values.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", vr)?;
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    fn vref(i: usize) -> ValueRef {
        ValueRef::of_const(Value::new(i))
    }

    #[test]
    fn merge_is_order_independent() {
        let refs: Vec<ValueRef> = (0..6).map(vref).collect();
        let mut fwd = PointerBase::unknown();
        let mut rev = PointerBase::unknown();
        for r in &refs {
            fwd.merge(&PointerBase::of(*r, SetKind::Pointer));
        }
        for r in refs.iter().rev() {
            rev.merge(&PointerBase::of(*r, SetKind::Pointer));
        }
        assert_eq!(fwd, rev);
    }

    #[test]
    fn kind_mismatch_is_overdef() {
        let mut pb = PointerBase::of(vref(0), SetKind::Scalar);
        let changed = pb.merge(&PointerBase::of(vref(1), SetKind::Pointer));
        assert!(changed);
        assert!(pb.overdef);
    }

    #[test]
    fn empty_initialized_set_keeps_kind() {
        // An initialized-but-empty scalar set reconciles kinds without
        // contributing candidates.
        let empty_scalar =
            PointerBase { kind: SetKind::Scalar, values: SmallVec::new(), overdef: false };
        let mut pb = PointerBase::unknown();
        pb.merge(&empty_scalar);
        assert_eq!(pb.kind, SetKind::Scalar);
        assert!(!pb.overdef);
        let mut pb2 = PointerBase::of(vref(0), SetKind::Pointer);
        pb2.merge(&empty_scalar);
        assert!(pb2.overdef);
    }

    #[test]
    fn cap_collapses_to_overdef() {
        let mut pb = PointerBase::unknown();
        for i in 0..PB_MAX {
            pb.merge(&PointerBase::of(vref(i), SetKind::Scalar));
        }
        assert!(!pb.overdef);
        assert_eq!(pb.values.len(), PB_MAX);
        pb.merge(&PointerBase::of(vref(PB_MAX), SetKind::Scalar));
        assert!(pb.overdef);
    }

    #[test]
    fn overdef_absorbs() {
        let mut pb = PointerBase::overdef();
        assert!(!pb.merge(&PointerBase::of(vref(0), SetKind::Scalar)));
        assert!(pb.overdef);
    }

    #[test]
    fn qualifier_in_eq_not_in_hash() {
        use std::collections::hash_map::DefaultHasher;
        let a = vref(3);
        let b = a.with_added_offset(8);
        assert_ne!(a, b);
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn offset_arithmetic() {
        let a = vref(1).with_added_offset(8);
        assert_eq!(a.offset(), Some(8));
        let b = a.with_added_offset(-3);
        assert_eq!(b.offset(), Some(5));
        assert_eq!(b.unqualified(), vref(1));
    }
}
