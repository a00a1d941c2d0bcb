//! Alias queries over symbolic base + constant-offset pointers.
//!
//! A pointer expression is resolved by walking its defining chain —
//! GEPs with constant indices, casts, constant add/sub, and inlined-call
//! argument boundaries — down to an identified base object (an alloca,
//! an allocation call, a global, or null) plus a byte offset. Two
//! resolved pointers alias exactly when their bases may be the same
//! object and their ranges overlap; the pessimistic solver phase may
//! additionally consult pointer-base facts to separate pointers whose
//! candidate base sets are disjoint.

use crate::ir::{BinOp, CastKind, Const, Op, Type, Value, ValueKind};
use crate::state::{Ctx, Program, SpecTree};
use crate::value::{RefQual, SetKind, ValueRef};
use crate::vfs::{self, LocSize, ModRef};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AliasResult {
    NoAlias,
    MayAlias,
    /// Both sides resolved to the same base with known offsets and the
    /// byte ranges overlap (not necessarily exactly).
    MustAlias,
}

/// An identified object: storage whose address no other base can equal.
pub fn is_identified_object(prog: &Program, vr: &ValueRef) -> bool {
    if vr.qual != RefQual::Plain {
        return false;
    }
    match &prog.module.values[vr.value].kind {
        ValueKind::Global(_) => true,
        ValueKind::Const(Const::Null) => true,
        ValueKind::Inst(_) => prog.is_allocation(vr.value),
        _ => false,
    }
}

/// Resolve `v` in `ctx` to (base, byte offset), walking the defining
/// expression and crossing inlined-call argument boundaries. Fails when
/// the chain passes through anything whose shape is not statically
/// known (a PHI, a load, a variable GEP index).
pub fn base_and_offset(
    prog: &Program,
    tree: &SpecTree,
    mut ctx: Ctx,
    mut v: Value,
) -> Option<(ValueRef, i64)> {
    let mut offset = 0i64;
    loop {
        match &prog.module.values[v].kind {
            ValueKind::Global(_) => return Some((ValueRef::of_const(v), offset)),
            ValueKind::Const(c) => match c {
                Const::GlobalAddr(g) | Const::GlobalOffset(g, _) => {
                    let extra = if let Const::GlobalOffset(_, o) = c { *o } else { 0 };
                    let base = prog.module.global_value(*g);
                    return Some((ValueRef::of_const(base), offset + extra));
                }
                Const::Null => return Some((ValueRef::of_const(v), offset)),
                _ => return None,
            },
            ValueKind::Arg { index, .. } => {
                // Rise to the call site when this function is being
                // analyzed as an inlined callee.
                let fctx = tree.function_ctx(ctx);
                match tree.ctxs[fctx].kind {
                    crate::state::CtxKind::Inline { call, caller } => {
                        let Some(Op::Call { args, .. }) = prog.module.inst_op(call) else {
                            return None;
                        };
                        v = *args.get(*index as usize)?;
                        ctx = caller;
                    }
                    _ => return None,
                }
            }
            ValueKind::Inst(inst) => {
                if prog.is_allocation(v) {
                    return Some((ValueRef::plain(v, tree.home_ctx(prog, ctx, v)), offset));
                }
                match &inst.op {
                    Op::Gep { elem_ty, base, indices } => {
                        offset += gep_offset(prog, tree, ctx, elem_ty, indices)?;
                        v = *base;
                    }
                    Op::Cast {
                        kind: CastKind::BitCast | CastKind::IntToPtr | CastKind::PtrToInt,
                        arg,
                    } => {
                        v = *arg;
                    }
                    Op::Bin { op: BinOp::Add, lhs, rhs } => {
                        if let Some(k) = const_int(prog, tree, ctx, *rhs) {
                            offset += k;
                            v = *lhs;
                        } else if let Some(k) = const_int(prog, tree, ctx, *lhs) {
                            offset += k;
                            v = *rhs;
                        } else {
                            return None;
                        }
                    }
                    Op::Bin { op: BinOp::Sub, lhs, rhs } => {
                        let k = const_int(prog, tree, ctx, *rhs)?;
                        offset -= k;
                        v = *lhs;
                    }
                    _ => return None,
                }
            }
        }
    }
}

/// Byte offset of a (constant-indexed) GEP.
fn gep_offset(
    prog: &Program,
    tree: &SpecTree,
    ctx: Ctx,
    elem_ty: &Type,
    indices: &[Value],
) -> Option<i64> {
    let mut it = indices.iter();
    let first = const_int(prog, tree, ctx, *it.next()?)?;
    let mut offset = first * prog.target.size_of(elem_ty) as i64;
    let mut ty = elem_ty.clone();
    for &idx in it {
        let k = const_int(prog, tree, ctx, idx)?;
        match ty {
            Type::Array(elem, _) => {
                offset += k * prog.target.size_of(&elem) as i64;
                ty = *elem;
            }
            Type::Struct(fields) => {
                let k = usize::try_from(k).ok()?;
                if k >= fields.len() {
                    return None;
                }
                offset += prog.target.field_offset(&fields, k) as i64;
                ty = fields[k].clone();
            }
            _ => return None,
        }
    }
    Some(offset)
}

/// Constant-integer view of an operand, going through the context's
/// improved replacements.
pub fn const_int(prog: &Program, tree: &SpecTree, ctx: Ctx, v: Value) -> Option<i64> {
    if let Some(c) = prog.module.as_const(v) {
        return c.as_i64();
    }
    tree.const_replacement(prog, ctx, v)?.as_i64()
}

/// May the two located ranges refer to overlapping memory?
pub fn alias(
    prog: &Program,
    tree: &SpecTree,
    p1: (Value, Ctx),
    size1: u64,
    p2: (Value, Ctx),
    size2: u64,
    use_pb: bool,
) -> AliasResult {
    let r1 = base_and_offset(prog, tree, p1.1, p1.0);
    let r2 = base_and_offset(prog, tree, p2.1, p2.0);
    match (r1, r2) {
        (Some((b1, o1)), Some((b2, o2))) => {
            if tree.bases_may_alias(&b1, &b2) {
                if ranges_overlap(o1, size1, o2, size2) {
                    AliasResult::MustAlias
                } else {
                    AliasResult::NoAlias
                }
            } else if is_identified_object(prog, &b1) && is_identified_object(prog, &b2) {
                AliasResult::NoAlias
            } else {
                AliasResult::MayAlias
            }
        }
        (Some((b, _)), None) => one_sided(prog, tree, &b, p2, use_pb),
        (None, Some((b, _))) => one_sided(prog, tree, &b, p1, use_pb),
        (None, None) => AliasResult::MayAlias,
    }
}

/// One pointer resolved, the other not: with pointer-base knowledge
/// enabled, a finite candidate set that cannot contain the resolved base
/// proves no-alias.
fn one_sided(
    prog: &Program,
    tree: &SpecTree,
    resolved: &ValueRef,
    other: (Value, Ctx),
    use_pb: bool,
) -> AliasResult {
    if !use_pb || !is_identified_object(prog, resolved) {
        return AliasResult::MayAlias;
    }
    let Some(pb) = tree.pb_falling(prog, other.1, other.0) else {
        return AliasResult::MayAlias;
    };
    if pb.overdef || pb.kind != SetKind::Pointer {
        return AliasResult::MayAlias;
    }
    if pb.values.iter().any(|cand| tree.bases_may_alias(cand, resolved)) {
        AliasResult::MayAlias
    } else {
        AliasResult::NoAlias
    }
}

fn ranges_overlap(o1: i64, s1: u64, o2: i64, s2: u64) -> bool {
    o1 < o2 + s2 as i64 && o2 < o1 + s1 as i64
}

/// The bytes of a load `[load_off, load_off + load_size)` defined by a
/// write `[write_off, write_off + write_size)` over the same base:
/// returns (first_def, first_not_def, read_offset) — the defined window
/// relative to the load, and where it starts inside the writer's bytes.
pub fn defined_range(
    load_off: i64,
    load_size: u64,
    write_off: i64,
    write_size: u64,
) -> Option<(u64, u64, u64)> {
    if !ranges_overlap(load_off, load_size, write_off, write_size) {
        return None;
    }
    let first_def = (write_off - load_off).max(0) as u64;
    let first_not_def = ((write_off + write_size as i64) - load_off).min(load_size as i64) as u64;
    let read_offset = (load_off + first_def as i64 - write_off) as u64;
    Some((first_def, first_not_def, read_offset))
}

/// Mod/ref effect of a call instruction on the given location. Resolved
/// allocation calls write only fresh memory; modelled externals write
/// only their listed argument locations; everything else is conservative.
pub fn mod_ref_call(
    prog: &Program,
    tree: &SpecTree,
    call: (Value, Ctx),
    ptr: (Value, Ctx),
    size: u64,
    use_pb: bool,
) -> ModRef {
    let Some(Op::Call { callee, args }) = prog.module.inst_op(call.0) else {
        return ModRef::ModRefBoth;
    };
    match callee {
        crate::ir::Callee::Direct(_) => ModRef::ModRefBoth,
        crate::ir::Callee::External(name) => {
            if crate::ir::Module::is_alloc_callee(callee) {
                return ModRef::NoModRef;
            }
            let Some(model) = vfs::model_for(name) else {
                return ModRef::ModRefBoth;
            };
            let mut effect = ModRef::NoModRef;
            for loc in model.locs {
                let Some(&arg) = args.get(loc.arg) else { continue };
                let loc_size = match loc.size {
                    LocSize::Unknown => u64::MAX,
                    LocSize::Fixed(n) => n,
                    LocSize::FromArg(i) => args
                        .get(i)
                        .and_then(|&a| const_int(prog, tree, call.1, a))
                        .map(|n| n as u64)
                        .unwrap_or(u64::MAX),
                    LocSize::FromArgTimes(i, stride) => args
                        .get(i)
                        .and_then(|&a| const_int(prog, tree, call.1, a))
                        .map(|n| n as u64 * stride)
                        .unwrap_or(u64::MAX),
                };
                if alias(prog, tree, (arg, call.1), loc_size, ptr, size, use_pb)
                    != AliasResult::NoAlias
                {
                    effect = effect.join(loc.effect);
                }
            }
            effect
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defined_range_full_cover() {
        // A 4-byte store exactly over a 4-byte load.
        assert_eq!(defined_range(0, 4, 0, 4), Some((0, 4, 0)));
    }

    #[test]
    fn defined_range_partial_tail() {
        // Load byte at offset 1 out of a 2-byte store at offset 0.
        assert_eq!(defined_range(1, 1, 0, 2), Some((0, 1, 1)));
    }

    #[test]
    fn defined_range_disjoint() {
        assert_eq!(defined_range(0, 4, 8, 4), None);
        assert_eq!(defined_range(8, 4, 0, 4), None);
    }

    #[test]
    fn defined_range_overlapping_head() {
        // 8-byte load at 0; 4-byte store at 6 covers load bytes [6, 8).
        assert_eq!(defined_range(0, 8, 6, 4), Some((6, 8, 0)));
    }
}
