//! Load forwarding.
//!
//! Given a load in a context, walk its memory predecessors and classify
//! every store, memory intrinsic, call and allocation met on the way:
//! a full-cover must-alias store forwards its value outright; partially
//! overlapping constant stores contribute byte windows that are stitched
//! back into a constant of the load's type; unresolvable writers clobber.
//! In the optimistic phase clobbers are noted and walked past on the
//! assumption they may yet resolve; in the pessimistic phase they are
//! final.
//!
//! A successful, completely-explored walk populates the per-load
//! def-or-clobber cache and registers reverse dependency edges so the
//! exact set of affected loads re-queues when a writer, call or CFG
//! changes. Replay against the cache is the common fast path: the cached
//! instruction list is re-classified against the current (possibly
//! tighter) alias facts without walking the CFG again.

use fxhash::FxHashSet;
use smallvec::SmallVec;

use crate::alias::{self, defined_range};
use crate::ir::{Const, Op, Type, Value, ValueKind};
use crate::state::{Ctx, Program, SpecTree};
use crate::stats::Stats;
use crate::value::{PointerBase, SetKind, ValueRef};
use crate::walk::{walk_backward, BackwardVisitor, WalkDecision};

/// Loads wider than this give up on partial-byte reconstruction.
const MAX_PARTIAL_BYTES: u64 = 64;

/// How deep memcpy translation may recurse.
const MAX_MEMCPY_DEPTH: u32 = 4;

/// Per-path byte coverage. Walking backwards, the nearest writer of a
/// byte wins, so only invalid bytes accept new contributions.
#[derive(Clone)]
struct PathBytes {
    bytes: SmallVec<[u8; 16]>,
    valid: SmallVec<[bool; 16]>,
    any: bool,
}

impl PathBytes {
    fn new(size: u64) -> PathBytes {
        PathBytes {
            bytes: smallvec::smallvec![0; size as usize],
            valid: smallvec::smallvec![false; size as usize],
            any: false,
        }
    }

    fn fill(&mut self, first_def: u64, first_not_def: u64, src: &[u8]) {
        for i in first_def..first_not_def {
            let i = i as usize;
            if !self.valid[i] {
                self.bytes[i] = src[i - first_def as usize];
                self.valid[i] = true;
            }
        }
        self.any = true;
    }

    fn complete(&self) -> bool {
        self.valid.iter().all(|&v| v)
    }
}

struct ForwardAttempt<'a> {
    prog: &'a Program,
    load_ctx: Ctx,
    ptr: Value,
    load_ty: Type,
    load_size: u64,
    base: ValueRef,
    offset: i64,
    optimistic: bool,
    depth: u32,

    pb: PointerBase,
    /// Constants reconstituted from byte windows; interned after the
    /// walk, never cached (replay re-derives them from the writers).
    assembled: Vec<Const>,
    /// Constants read out of a global initializer; these are cached.
    scope_consts: Vec<Const>,
    /// Def-or-clobber instructions at this load's own resolution level:
    /// the replayable cache entry.
    defs: Vec<ValueRef>,
    /// Clobbers ignored by the optimistic phase; cached alongside defs.
    ignored: Vec<ValueRef>,
    /// Writers found inside memcpy translations: they must wake this
    /// load on change but are re-derived through the memcpy on replay.
    extra_deps: Vec<ValueRef>,
    traversed: FxHashSet<Ctx>,
    reasons: Vec<String>,
    reached_top: Option<String>,
    complete: bool,
}

impl<'a> ForwardAttempt<'a> {
    fn new(
        prog: &'a Program,
        load_ctx: Ctx,
        ptr: Value,
        load_ty: Type,
        base: ValueRef,
        offset: i64,
        optimistic: bool,
        depth: u32,
    ) -> ForwardAttempt<'a> {
        let load_size = prog.target.size_of(&load_ty);
        ForwardAttempt {
            prog,
            load_ctx,
            ptr,
            load_ty,
            load_size,
            base,
            offset,
            optimistic,
            depth,
            pb: PointerBase::unknown(),
            assembled: Vec::new(),
            scope_consts: Vec::new(),
            defs: Vec::new(),
            ignored: Vec::new(),
            extra_deps: Vec::new(),
            traversed: FxHashSet::default(),
            reasons: Vec::new(),
            reached_top: None,
            complete: true,
        }
    }

    /// Merge a definition's lattice value, naming the failure if the
    /// aggregate collapses.
    fn merge_def(&mut self, pb: &PointerBase) {
        if self.pb.overdef {
            return;
        }
        let fan_in = !pb.overdef
            && self.pb.kind != SetKind::Unknown
            && pb.kind != SetKind::Unknown
            && self.pb.kind != pb.kind;
        self.pb.merge(pb);
        if self.pb.overdef {
            self.reasons
                .push(if fan_in { "Fan-in" } else { "Too many candidates" }.to_string());
        }
    }

    fn clobber(&mut self, vr: ValueRef, reason: String) -> WalkDecision {
        if self.optimistic {
            self.ignored.push(vr);
            WalkDecision::Continue
        } else {
            log::trace!("clobbered: {}", reason);
            self.pb = PointerBase::overdef();
            self.reasons.push(reason);
            self.complete = false;
            WalkDecision::StopWholeWalk
        }
    }

    /// A writer fully defines the load with a value we can name.
    fn add_def_value(&mut self, writer: ValueRef, tree: &SpecTree, val: Value, ctx: Ctx) -> WalkDecision {
        self.defs.push(writer);
        match tree.pb_falling(self.prog, ctx, val) {
            Some(pb) => {
                self.merge_def(&pb);
            }
            None => {
                // No fact yet: optimistically compatible with anything,
                // fatal when finalising.
                if !self.optimistic {
                    self.pb = PointerBase::overdef();
                    self.reasons.push(format!("store of unresolved value {}", val));
                    return WalkDecision::StopWholeWalk;
                }
            }
        }
        WalkDecision::StopThisPath
    }

    /// Byte window contributed; the path ends once the load is fully
    /// reconstituted.
    fn add_partial(&mut self, path: &mut PathBytes, fd: u64, fnd: u64, src: &[u8]) -> WalkDecision {
        path.fill(fd, fnd, src);
        if path.complete() {
            match self.prog.target.const_from_bytes(&path.bytes, &self.load_ty) {
                Some(c) => {
                    self.assembled.push(c);
                    WalkDecision::StopThisPath
                }
                None => {
                    self.pb = PointerBase::overdef();
                    self.reasons.push("bytes do not form a value of the loaded type".to_string());
                    self.complete = false;
                    WalkDecision::StopWholeWalk
                }
            }
        } else {
            WalkDecision::Continue
        }
    }

    fn visit_store(
        &mut self,
        tree: &SpecTree,
        v: Value,
        ctx: Ctx,
        val: Value,
        ptr: Value,
        path: &mut PathBytes,
    ) -> WalkDecision {
        let vr = ValueRef::plain(v, ctx);
        let wsize = self.prog.target.store_size(self.prog.module.value_ty(val));
        let Some((sbase, soff)) = alias::base_and_offset(self.prog, tree, ctx, ptr) else {
            return self.clobber(vr, format!("store {} with unresolvable pointer", v));
        };
        if !tree.bases_may_alias(&sbase, &self.base) {
            if alias::is_identified_object(self.prog, &sbase)
                && alias::is_identified_object(self.prog, &self.base)
            {
                return WalkDecision::Continue;
            }
            return self.clobber(vr, format!("store {} to unidentified base", v));
        }
        let Some((fd, fnd, ro)) = defined_range(self.offset, self.load_size, soff, wsize) else {
            return WalkDecision::Continue;
        };
        let whole = fd == 0 && fnd == self.load_size && ro == 0 && wsize == self.load_size;
        if whole && !path.any {
            return self.add_def_value(vr, tree, val, ctx);
        }
        // Partial overlap, or completing earlier partials: only constant
        // bytes can be stitched.
        match store_const(self.prog, tree, ctx, val)
            .and_then(|c| self.prog.target.const_to_bytes(&c))
        {
            Some(bytes) => {
                self.defs.push(vr);
                let window = &bytes[ro as usize..(ro + (fnd - fd)) as usize];
                self.add_partial(path, fd, fnd, window)
            }
            None => self.clobber(vr, format!("partial overlap with non-constant store {}", v)),
        }
    }

    fn visit_memset(
        &mut self,
        tree: &SpecTree,
        v: Value,
        ctx: Ctx,
        dst: Value,
        byte: Value,
        len: Value,
        path: &mut PathBytes,
    ) -> WalkDecision {
        let vr = ValueRef::plain(v, ctx);
        let Some((dbase, doff)) = alias::base_and_offset(self.prog, tree, ctx, dst) else {
            return self.clobber(vr, format!("memset {} with unresolvable pointer", v));
        };
        if !tree.bases_may_alias(&dbase, &self.base) {
            return WalkDecision::Continue;
        }
        let Some(len) = alias::const_int(self.prog, tree, ctx, len) else {
            return self.clobber(vr, format!("memset {} of unknown length", v));
        };
        let Some((fd, fnd, _)) = defined_range(self.offset, self.load_size, doff, len as u64)
        else {
            return WalkDecision::Continue;
        };
        let Some(b) = alias::const_int(self.prog, tree, ctx, byte) else {
            return self.clobber(vr, format!("memset {} of unknown byte", v));
        };
        self.defs.push(vr);
        let window = vec![b as u8; (fnd - fd) as usize];
        self.add_partial(path, fd, fnd, &window)
    }

    /// A covering memcpy translates the query to an equivalent load of
    /// the source bytes and continues from the copy backwards.
    fn visit_memcpy(
        &mut self,
        tree: &SpecTree,
        v: Value,
        ctx: Ctx,
        dst: Value,
        src: Value,
        len: Value,
        path: &mut PathBytes,
    ) -> WalkDecision {
        let vr = ValueRef::plain(v, ctx);
        let Some((dbase, doff)) = alias::base_and_offset(self.prog, tree, ctx, dst) else {
            return self.clobber(vr, format!("memcpy {} with unresolvable pointer", v));
        };
        if !tree.bases_may_alias(&dbase, &self.base) {
            return WalkDecision::Continue;
        }
        let Some(len) = alias::const_int(self.prog, tree, ctx, len) else {
            return self.clobber(vr, format!("memcpy {} of unknown length", v));
        };
        let Some((fd, fnd, _)) = defined_range(self.offset, self.load_size, doff, len as u64)
        else {
            return WalkDecision::Continue;
        };
        if fd != 0 || fnd != self.load_size || path.any || self.depth >= MAX_MEMCPY_DEPTH {
            return self.clobber(vr, format!("memcpy {} covers the load only partially", v));
        }
        let Some((sbase, soff)) = alias::base_and_offset(self.prog, tree, ctx, src) else {
            return self.clobber(vr, format!("memcpy {} from unresolvable source", v));
        };
        let mut sub = ForwardAttempt::new(
            self.prog,
            self.load_ctx,
            src,
            self.load_ty.clone(),
            sbase,
            soff + (self.offset - doff),
            self.optimistic,
            self.depth + 1,
        );
        let aborted = !walk_backward(self.prog, tree, (v, ctx), &mut sub, PathBytes::new(self.load_size));
        self.defs.push(vr);
        // The source's writers wake this load too, but replay re-derives
        // their contribution through the memcpy.
        self.extra_deps.extend(sub.defs.iter().copied());
        self.extra_deps.extend(sub.extra_deps.iter().copied());
        self.ignored.extend(sub.ignored.iter().copied());
        self.traversed.extend(sub.traversed.iter().copied());
        self.assembled.append(&mut sub.assembled);
        self.scope_consts.append(&mut sub.scope_consts);
        if aborted || sub.reached_top.is_some() {
            self.complete &= sub.complete;
            return self.clobber(vr, format!("memcpy {} source unresolved", v));
        }
        self.reasons.append(&mut sub.reasons);
        self.merge_def(&sub.pb);
        WalkDecision::StopThisPath
    }

    fn visit_call(&mut self, tree: &SpecTree, v: Value, ctx: Ctx, path: &mut PathBytes) -> WalkDecision {
        // The start of the loaded object's lifetime: any bytes no store
        // on this path defined come from the allocator.
        if self.prog.is_allocation(v)
            && self.base == ValueRef::plain(v, tree.home_ctx(self.prog, ctx, v))
        {
            return self.definition_from_fresh_memory(v, ctx, path, is_zeroing_alloc(self.prog, v));
        }
        let use_pb = !self.optimistic;
        let mr = alias::mod_ref_call(
            self.prog,
            tree,
            (v, ctx),
            (self.ptr, self.load_ctx),
            self.load_size,
            use_pb,
        );
        if !mr.may_write() {
            return WalkDecision::Continue;
        }
        let vr = ValueRef::plain(v, ctx);
        self.clobber(vr, format!("Blocked by call {}", call_name(self.prog, v)))
    }

    fn definition_from_fresh_memory(
        &mut self,
        alloc: Value,
        ctx: Ctx,
        path: &mut PathBytes,
        zeroed: bool,
    ) -> WalkDecision {
        let vr = ValueRef::plain(alloc, ctx);
        if zeroed {
            self.defs.push(vr);
            let zeros = vec![0u8; self.load_size as usize];
            return self.add_partial(path, 0, self.load_size, &zeros);
        }
        if path.any {
            return self.clobber(vr, "load mixes stored and undefined bytes".to_string());
        }
        self.defs.push(vr);
        self.assembled.push(Const::Undef(self.load_ty.clone()));
        WalkDecision::StopThisPath
    }

    /// Replay one cached entry instead of walking to it.
    fn replay_entry(&mut self, tree: &SpecTree, vr: ValueRef, path: &mut PathBytes) -> WalkDecision {
        match vr.ctx {
            None => {
                // A cached initializer constant.
                let pb = match self.prog.module.as_const(vr.value) {
                    Some(c) => crate::state::pb_of_const(self.prog, vr.value, c),
                    None => PointerBase::of(vr, SetKind::Pointer),
                };
                self.merge_def(&pb);
                WalkDecision::Continue
            }
            Some(ictx) => self.dispatch(tree, vr.value, ictx, path),
        }
    }

    fn dispatch(&mut self, tree: &SpecTree, v: Value, ctx: Ctx, path: &mut PathBytes) -> WalkDecision {
        match self.prog.module.inst_op(v) {
            Some(Op::Store { val, ptr }) => self.visit_store(tree, v, ctx, *val, *ptr, path),
            Some(Op::Memset { dst, byte, len }) => {
                self.visit_memset(tree, v, ctx, *dst, *byte, *len, path)
            }
            Some(Op::Memcpy { dst, src, len }) => {
                self.visit_memcpy(tree, v, ctx, *dst, *src, *len, path)
            }
            Some(Op::Call { .. }) => self.visit_call(tree, v, ctx, path),
            Some(Op::Alloca { .. }) => {
                if self.base == ValueRef::plain(v, tree.home_ctx(self.prog, ctx, v)) {
                    self.definition_from_fresh_memory(v, ctx, path, false)
                } else {
                    WalkDecision::Continue
                }
            }
            _ => WalkDecision::Continue,
        }
    }

    fn status(&self) -> String {
        if self.pb.overdef {
            if self.reasons.is_empty() {
                "Overdef".to_string()
            } else {
                self.reasons.join(", ")
            }
        } else if self.pb.values.is_empty() && self.assembled.is_empty() && self.scope_consts.is_empty() {
            "No defn".to_string()
        } else {
            format!("{}", self.pb)
        }
    }
}

impl<'a> BackwardVisitor for ForwardAttempt<'a> {
    type Payload = PathBytes;

    fn visit_inst(
        &mut self,
        _prog: &Program,
        tree: &SpecTree,
        v: Value,
        ctx: Ctx,
        path: &mut PathBytes,
    ) -> WalkDecision {
        self.traversed.insert(ctx);
        self.dispatch(tree, v, ctx, path)
    }

    fn should_enter_call(&mut self, _prog: &Program, tree: &SpecTree, call: Value, ctx: Ctx) -> bool {
        tree.inline_child(ctx, call).is_some()
    }

    fn hit_top(&mut self, prog: &Program, _tree: &SpecTree, path: &PathBytes) -> WalkDecision {
        // At the start of scope only a global's initializer can still
        // define the remaining bytes.
        if let ValueKind::Global(g) = &prog.module.values[self.base.value].kind {
            if let Some(init) = &prog.module.globals[*g].init {
                if let Some(bytes) = initializer_bytes(prog, init) {
                    let lo = self.offset;
                    let hi = lo + self.load_size as i64;
                    if lo >= 0 && (hi as usize) <= bytes.len() {
                        let mut path = path.clone();
                        path.fill(0, self.load_size, &bytes[lo as usize..hi as usize]);
                        debug_assert!(path.complete());
                        match self.prog.target.const_from_bytes(&path.bytes, &self.load_ty) {
                            Some(c) => {
                                self.scope_consts.push(c);
                                return WalkDecision::StopThisPath;
                            }
                            None => {}
                        }
                    }
                }
            }
        }
        if self.reached_top.is_none() {
            self.reached_top = Some("Reached main".to_string());
        }
        WalkDecision::StopThisPath
    }
}

fn is_zeroing_alloc(prog: &Program, v: Value) -> bool {
    matches!(
        prog.module.inst_op(v),
        Some(Op::Call { callee: crate::ir::Callee::External(n), .. }) if n == "calloc"
    )
}

/// Initializer bytes of a global; `Zero` spells out as zeroes.
fn initializer_bytes(prog: &Program, init: &Const) -> Option<Vec<u8>> {
    match init {
        Const::Zero(ty) => Some(vec![0u8; prog.target.size_of(ty) as usize]),
        other => prog.target.const_to_bytes(other),
    }
}

/// The constant a store writes, if its operand resolves to one.
fn store_const(prog: &Program, tree: &SpecTree, ctx: Ctx, val: Value) -> Option<Const> {
    if let Some(c) = prog.module.as_const(val) {
        return Some(c.clone());
    }
    if let Some(c) = tree.const_replacement(prog, ctx, val) {
        return Some(c.clone());
    }
    let pb = tree.pb_falling(prog, ctx, val)?;
    let single = pb.is_singleton()?;
    if single.qual != crate::value::RefQual::Plain || single.ctx.is_some() {
        return None;
    }
    prog.module.as_const(single.value).cloned()
}

fn call_name(prog: &Program, call: Value) -> String {
    match prog.module.inst_op(call) {
        Some(Op::Call { callee: crate::ir::Callee::External(n), .. }) => n.clone(),
        Some(Op::Call { callee: crate::ir::Callee::Direct(f), .. }) => {
            prog.module.functions[*f].name.clone()
        }
        _ => "?".to_string(),
    }
}

/// Forward `load` in `ctx`. Returns the resulting lattice value, or
/// `None` when nothing at all is known yet (the transfer function then
/// draws no conclusion).
pub fn try_forward_load(
    prog: &mut Program,
    tree: &mut SpecTree,
    load: Value,
    ctx: Ctx,
    finalise: bool,
    stats: &mut Stats,
) -> Option<PointerBase> {
    stats.lfa_attempts += 1;

    // Negative cache: a previously diagnosed failure stays failed until
    // something zaps it.
    if let Some(reason) = tree.ctxs[ctx].failed_lfa_cache.get(&load) {
        let reason = reason.clone();
        stats.lfa_cache_hits += 1;
        tree.ctxs[ctx].forward_status.insert(load, reason);
        return Some(PointerBase::overdef());
    }

    let (ptr, load_ty) = match prog.module.inst_op(load) {
        Some(Op::Load { ptr }) => (*ptr, prog.module.value_ty(load).clone()),
        _ => panic!("try_forward_load on a non-load"),
    };
    let load_size = prog.target.size_of(&load_ty);

    let Some((base, offset)) = alias::base_and_offset(prog, tree, ctx, ptr) else {
        let reason = "Symbolic pointer unresolvable".to_string();
        tree.ctxs[ctx].forward_status.insert(load, reason);
        // Not cached: the pointer may yet resolve as facts improve.
        return Some(PointerBase::overdef());
    };

    if load_size == 0 || load_size > MAX_PARTIAL_BYTES {
        tree.ctxs[ctx].forward_status.insert(load, "load too wide to track".to_string());
        return Some(PointerBase::overdef());
    }

    let cached = tree.ctxs[ctx].def_or_clobber_cache.get(&load).cloned();

    let (mut pb, assembled, scope_consts, defs, ignored, extra_deps, traversed, reached_top, complete, status, was_replay) = {
        let prog_ref: &Program = prog;
        let tree_ref: &SpecTree = tree;
        let mut attempt = ForwardAttempt::new(
            prog_ref,
            ctx,
            ptr,
            load_ty.clone(),
            base,
            offset,
            !finalise,
            0,
        );
        let was_replay = if let Some(entries) = &cached {
            stats.lfa_cache_hits += 1;
            let mut path = PathBytes::new(load_size);
            for vr in entries {
                if attempt.pb.overdef {
                    break;
                }
                if attempt.replay_entry(tree_ref, *vr, &mut path) == WalkDecision::StopWholeWalk {
                    break;
                }
            }
            true
        } else {
            debug_assert!(!finalise, "load considered for the first time in pessimistic phase");
            walk_backward(prog_ref, tree_ref, (load, ctx), &mut attempt, PathBytes::new(load_size));
            false
        };
        let status = attempt.status();
        (
            attempt.pb,
            attempt.assembled,
            attempt.scope_consts,
            attempt.defs,
            attempt.ignored,
            attempt.extra_deps,
            attempt.traversed,
            attempt.reached_top,
            attempt.complete,
            status,
            was_replay,
        )
    };

    // Intern constants discovered along the way and fold them in.
    let mut cacheable_consts: Vec<ValueRef> = Vec::new();
    for c in scope_consts {
        let v = prog.module.const_value(c.clone());
        cacheable_consts.push(ValueRef::of_const(v));
        if !pb.overdef {
            pb.merge(&crate::state::pb_of_const(prog, v, &c));
        }
    }
    for c in assembled {
        let v = prog.module.const_value(c.clone());
        if !pb.overdef {
            pb.merge(&crate::state::pb_of_const(prog, v, &c));
        }
    }

    if !was_replay {
        if let Some(reason) = reached_top {
            tree.ctxs[ctx].failed_lfa_cache.insert(load, reason.clone());
            tree.ctxs[ctx].forward_status.insert(load, reason);
            return Some(PointerBase::overdef());
        }
        if complete {
            let mut entry = defs.clone();
            entry.extend(cacheable_consts.iter().copied());
            entry.extend(ignored.iter().copied());
            for vr in entry.iter().chain(extra_deps.iter()) {
                let Some(dep_ctx) = vr.ctx else { continue };
                match prog.module.inst_op(vr.value) {
                    Some(Op::Store { .. }) | Some(Op::Memcpy { .. }) | Some(Op::Memset { .. }) => {
                        tree.add_mem_writer_effect(dep_ctx, vr.value, load, ctx);
                    }
                    Some(Op::Call { callee, .. }) => {
                        let modelled = match callee {
                            crate::ir::Callee::External(n) => crate::vfs::model_for(n).is_some(),
                            crate::ir::Callee::Direct(_) => false,
                        };
                        if !modelled && !prog.is_allocation(vr.value) {
                            tree.add_call_blocked_load(dep_ctx, vr.value, load, ctx);
                        }
                    }
                    _ => {}
                }
            }
            for &t in &traversed {
                tree.add_cfg_dependent_load(t, load, ctx);
            }
            tree.ctxs[ctx].def_or_clobber_cache.insert(load, entry);
        } else if !pb.overdef {
            // Incomplete non-failing exploration: usable but not
            // cacheable.
            log::trace!("not caching incomplete exploration for {}", load);
        }
    }

    let status = if pb.overdef || pb.values.is_empty() { status } else { format!("{}", pb) };
    tree.ctxs[ctx].forward_status.insert(load, status);

    if !pb.is_initialized() {
        return None;
    }
    Some(pb)
}
