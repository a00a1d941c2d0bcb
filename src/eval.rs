//! Transfer functions and the two-phase pointer-base solver.
//!
//! `update_base_pointer` is the single transfer function: it computes a
//! new lattice value for one (value, context) pair from its operands'
//! facts, stores it if changed, and queues the dependents. The `finalise`
//! flag selects the phase: the optimistic phase skips uninitialized merge
//! predecessors on the assumption they will resolve, the pessimistic
//! phase treats them as overdefined. Work is grouped per outermost
//! unbound loop so recurrent value flows (header PHIs, store-to-load
//! circulation) re-converge as a population rather than value by value.
//!
//! The driver owns two ping-pong queues for the current evaluation scope
//! and a pending queue for out-of-scope work discovered along the way;
//! it loops triage → solve → fan-out until no pending work remains.

use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::forward::try_forward_load;
use crate::ir::{
    BinOp, Block, Callee, CastKind, CmpPred, Const, Function, Module, Op, Type, Value, ValueKind,
};
use crate::loops::Loop;
use crate::state::{Ctx, CtxKind, IterStatus, Peel, Program, SpecTree};
use crate::stats::Stats;
use crate::target::TargetLayout;
use crate::value::{PointerBase, RefQual, SetKind, VaKind, ValueRef};
use crate::walk::{walk_forward, ForwardVisitor, WalkDecision};

/// Peel exploration gives up after this many iterations.
pub const PEEL_ITERATION_CAP: usize = 64;

pub struct Analysis {
    pub prog: Program,
    pub tree: SpecTree,
    pub stats: Stats,

    // In-scope solver queues (double-buffered).
    queue_a: Vec<(Value, Ctx)>,
    queue_b: Vec<(Value, Ctx)>,
    produce_into_a: bool,
    // Out-of-scope work discovered while solving.
    pending: Vec<(Value, Ctx)>,
    /// Facts snapshotted and cleared for the current evaluation scope.
    considered: FxHashMap<(Value, Ctx), PointerBase>,
}

impl Analysis {
    /// Build an analysis for `module` with the hypothesis that `entry`
    /// is invoked with the given argument values (one per parameter;
    /// `None` pins nothing).
    pub fn new(
        module: Module,
        target: TargetLayout,
        entry: Function,
        args: Vec<Option<Const>>,
    ) -> anyhow::Result<Analysis> {
        anyhow::ensure!(
            args.len() == module.functions[entry].params.len(),
            "hypothesis has {} argument values but {} takes {} parameters",
            args.len(),
            module.functions[entry].name,
            module.functions[entry].params.len()
        );
        let mut prog = Program::new(module, target);
        let mut tree = SpecTree::new(entry);
        // Pin the hypothesis facts on the root arguments.
        let root = tree.root;
        for (i, arg) in args.into_iter().enumerate() {
            let Some(c) = arg else { continue };
            let param = prog.module.functions[entry].params[i];
            let cv = prog.module.const_value(c.clone());
            let pb = crate::state::pb_of_const(&prog, cv, &c);
            tree.set_pb(root, param, pb);
            tree.set_replacement(root, param, ValueRef::of_const(cv));
        }
        Ok(Analysis {
            prog,
            tree,
            stats: Stats::default(),
            queue_a: Vec::new(),
            queue_b: Vec::new(),
            produce_into_a: true,
            pending: Vec::new(),
            considered: FxHashMap::default(),
        })
    }

    /// Solve to fixed point from the root hypothesis.
    pub fn run(&mut self) {
        self.queue_scope_pending(self.tree.root, None);
        loop {
            self.run_pending();
            let ctxs: Vec<Ctx> = self.tree.ctxs.keys().collect();
            let mut any = false;
            for ctx in ctxs {
                any |= self.refine_cfg(ctx);
            }
            if !any && self.pending.is_empty() {
                break;
            }
        }
    }

    // ---- queue plumbing -------------------------------------------------

    fn queue_update(&mut self, v: Value, ctx: Ctx) {
        if self.produce_into_a {
            self.queue_a.push((v, ctx));
        } else {
            self.queue_b.push((v, ctx));
        }
    }

    fn queue_pending(&mut self, v: Value, ctx: Ctx) {
        self.pending.push((v, ctx));
    }

    /// Route a discovered dependency to the right queue: immediate when
    /// it is part of the scope being solved, pending otherwise.
    fn queue_dependent(&mut self, v: Value, ctx: Ctx, in_scope_now: bool, pend_out_of_scope: bool) {
        let in_scope = self.considered.contains_key(&(v, ctx));
        if in_scope_now && in_scope {
            self.queue_update(v, ctx);
        } else if pend_out_of_scope && !in_scope {
            self.queue_pending(v, ctx);
        }
    }

    /// Queue every unresolved value in the given scope into the solver
    /// queues, snapshotting and clearing its current fact.
    fn queue_whole_scope(&mut self, ctx: Ctx, scope: Option<Loop>) {
        let func = self.tree.func_of(ctx);
        if self.tree.loop_of(ctx).is_none() && scope.is_none() {
            let params = self.prog.module.functions[func].params.clone();
            for p in params {
                self.queue_if_unresolved(p, ctx);
            }
        }
        let blocks: Vec<Block> = self.prog.module.functions[func].blocks.keys().collect();
        for b in blocks {
            if self.tree.block_is_dead(ctx, b) {
                continue;
            }
            let b_scope = self.prog.block_scope(func, b);
            let in_scope = match scope {
                None => true,
                Some(l) => self.prog.forest(func).contains(Some(l), b_scope),
            };
            if !in_scope {
                continue;
            }
            let insts = self.prog.module.functions[func].blocks[b].insts.clone();
            for v in insts {
                self.queue_if_unresolved(v, ctx);
            }
        }
        // Descend into resolved children so their populations converge
        // together with ours.
        let inline_children: Vec<(Value, Ctx)> =
            self.tree.ctxs[ctx].inline_children.iter().map(|(&c, &i)| (c, i)).collect();
        for (call, child) in inline_children {
            let call_block = self.prog.module.as_inst(call).unwrap().block;
            let in_scope = match scope {
                None => true,
                Some(l) => self.prog.forest(func).block_in_loop(l, call_block),
            };
            if in_scope && !self.tree.ctxs[ctx].disabled_inlines.contains(&call) {
                self.queue_whole_scope(child, None);
            }
        }
        let peel_children: Vec<(Loop, Peel)> =
            self.tree.ctxs[ctx].peel_children.iter().map(|(&l, &p)| (l, p)).collect();
        for (l, peel) in peel_children {
            let in_scope = match scope {
                None => true,
                Some(outer) => self.prog.forest(func).contains(Some(outer), Some(l)),
            };
            if in_scope && self.tree.peels[peel].status == IterStatus::Final {
                let iters = self.tree.peels[peel].iterations.clone();
                for iter in iters {
                    self.queue_whole_scope(iter, Some(l));
                }
            }
        }
    }

    fn queue_if_unresolved(&mut self, v: Value, ctx: Ctx) {
        if !self.should_check_pb(v, ctx) {
            return;
        }
        let old = self
            .tree
            .ctxs[ctx]
            .pointer_bases
            .get(&v)
            .cloned()
            .unwrap_or_default();
        self.considered.insert((v, ctx), old);
        self.tree.erase_pb(ctx, v);
        self.queue_update(v, ctx);
    }

    /// Queue (as pending) every value in a scope without snapshotting:
    /// used for initial seeding and after structural changes.
    fn queue_scope_pending(&mut self, ctx: Ctx, scope: Option<Loop>) {
        let func = self.tree.func_of(ctx);
        if self.tree.loop_of(ctx).is_none() && scope.is_none() {
            let params = self.prog.module.functions[func].params.clone();
            for p in params {
                self.queue_pending(p, ctx);
            }
        }
        let blocks: Vec<Block> = self.prog.module.functions[func].blocks.keys().collect();
        for b in blocks {
            let b_scope = self.prog.block_scope(func, b);
            let in_scope = match scope {
                None => true,
                Some(l) => self.prog.forest(func).contains(Some(l), b_scope),
            };
            if !in_scope {
                continue;
            }
            let insts = self.prog.module.functions[func].blocks[b].insts.clone();
            for v in insts {
                self.queue_pending(v, ctx);
            }
        }
    }

    // ---- policy ---------------------------------------------------------

    /// Is (v, ctx) worth (re-)solving at all?
    fn should_check_pb(&self, v: Value, ctx: Ctx) -> bool {
        if self.tree.ctxs[ctx].dead {
            return false;
        }
        match &self.prog.module.values[v].kind {
            ValueKind::Const(_) | ValueKind::Global(_) => return false,
            ValueKind::Inst(inst) => {
                if self.prog.is_allocation(v) {
                    return false;
                }
                if self.tree.block_is_dead(ctx, inst.block) {
                    return false;
                }
                let func = inst.func;
                let my_l = self.tree.loop_of(ctx);
                let v_l = self.prog.value_scope(v);
                if my_l != v_l {
                    let forest = self.prog.forest(func);
                    if !forest.contains(my_l, v_l) {
                        return false;
                    }
                    if let Some(vl) = v_l {
                        let child = forest.immediate_child(my_l, vl);
                        if let Some(peel) = self.tree.peel_child(ctx, child) {
                            if self.tree.peels[peel].status == IterStatus::Final {
                                // Shadowed by the more specific peeled
                                // contexts.
                                return false;
                            }
                        }
                    }
                }
            }
            ValueKind::Arg { .. } => {}
        }
        if let Some(pb) = self.tree.pb_falling(&self.prog, ctx, v) {
            if pb.is_singleton().is_some() {
                return false;
            }
        }
        true
    }

    /// The outermost enclosing loop, relative to the home context, that
    /// has not been fully peeled. Values under one are solved as a
    /// population; values under none are solved as singletons.
    fn outermost_unbound_loop(&self, v: Value, home: Ctx) -> Option<(Ctx, Loop)> {
        let mut best: Option<(Ctx, Loop)> = None;
        let mut ctx = home;
        let mut scope = self.prog.value_scope(v);
        loop {
            let func = self.tree.func_of(ctx);
            let forest = self.prog.forest(func);
            let my_l = self.tree.loop_of(ctx);
            // Unpeeled loops between the value's scope and this
            // context's own loop.
            let mut l = scope;
            while l != my_l {
                let Some(lu) = l else { break };
                if !forest.contains(my_l, Some(lu)) {
                    break;
                }
                let bound = self
                    .tree
                    .peel_child(ctx, lu)
                    .map(|p| self.tree.peels[p].status == IterStatus::Final)
                    .unwrap_or(false);
                if !bound {
                    best = Some((ctx, lu));
                }
                l = forest.parent(lu);
            }
            match self.tree.ctxs[ctx].kind {
                CtxKind::Root => return best,
                CtxKind::Inline { call, caller } => {
                    let call_block = self.prog.module.as_inst(call).unwrap().block;
                    scope = self
                        .prog
                        .forest(self.tree.func_of(caller))
                        .loop_for(call_block);
                    ctx = caller;
                }
                CtxKind::PeelIter { attempt, .. } => {
                    if self.tree.peels[attempt].status != IterStatus::Final {
                        // Still being explored: its population is solved
                        // by the peel driver, not grouped above.
                        return best;
                    }
                    let the_loop = self.tree.peels[attempt].the_loop;
                    scope = forest.parent(the_loop);
                    ctx = self.tree.peels[attempt].parent;
                }
            }
        }
    }

    // ---- driver ---------------------------------------------------------

    /// Drain the pending queue: singletons get a two-phase check on
    /// their own; values under an unbound loop are grouped and their
    /// whole population re-solved.
    pub fn run_pending(&mut self) {
        while !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            let mut singles: Vec<(Value, Ctx)> = Vec::new();
            let mut groups: Vec<(Ctx, Loop)> = Vec::new();
            for (v, ctx) in pending {
                if !self.should_check_pb(v, ctx) {
                    continue;
                }
                match self.outermost_unbound_loop(v, ctx) {
                    Some(group) => groups.push(group),
                    None => singles.push((v, ctx)),
                }
            }
            singles.sort();
            singles.dedup();
            groups.sort();
            groups.dedup();

            for (v, ctx) in singles {
                self.considered.clear();
                let old = self
                    .tree
                    .ctxs[ctx]
                    .pointer_bases
                    .get(&v)
                    .cloned()
                    .unwrap_or_default();
                self.considered.insert((v, ctx), old);
                self.tree.erase_pb(ctx, v);
                self.update_base_pointer(v, ctx, false);
                self.update_base_pointer(v, ctx, true);
                self.queue_new_pb_work();
                self.considered.clear();
            }

            for (ctx, l) in groups {
                log::debug!("solving loop {} population in {}", l, ctx);
                self.considered.clear();
                self.queue_whole_scope(ctx, Some(l));
                let mut modified = Vec::new();
                self.run_phase(false, Some(&mut modified));
                modified.sort();
                modified.dedup();
                for (v, c) in modified {
                    self.queue_update(v, c);
                }
                self.run_phase(true, None);
                self.queue_new_pb_work();
                self.considered.clear();
            }
        }
    }

    /// One monotone pass over the in-scope queues to fixed point.
    fn run_phase(&mut self, finalise: bool, mut modified: Option<&mut Vec<(Value, Ctx)>>) {
        loop {
            // Consume the buffer we are not producing into.
            let mut consume = if self.produce_into_a {
                std::mem::take(&mut self.queue_b)
            } else {
                std::mem::take(&mut self.queue_a)
            };
            if consume.is_empty() {
                // Swap roles; if both are empty we are done.
                let other_empty = if self.produce_into_a {
                    self.queue_a.is_empty()
                } else {
                    self.queue_b.is_empty()
                };
                if other_empty {
                    break;
                }
                self.produce_into_a = !self.produce_into_a;
                continue;
            }
            consume.sort();
            consume.dedup();
            for (v, ctx) in consume {
                debug_assert!(self.considered.contains_key(&(v, ctx)));
                if self.update_base_pointer(v, ctx, finalise) {
                    if let Some(m) = modified.as_mut() {
                        m.push((v, ctx));
                    }
                }
            }
            self.produce_into_a = !self.produce_into_a;
        }
    }

    /// Diff the snapshotted facts against their re-solved values and fan
    /// the changes out to pending work; derive constant replacements for
    /// singleton scalars.
    fn queue_new_pb_work(&mut self) {
        let considered: Vec<((Value, Ctx), PointerBase)> =
            self.considered.iter().map(|(k, v)| (*k, v.clone())).collect();
        for ((v, ctx), old) in considered {
            let Some(new) = self.tree.ctxs[ctx].pointer_bases.get(&v).cloned() else {
                continue;
            };
            // Overdef never improves downstream conclusions.
            if new.overdef {
                continue;
            }
            if old.is_initialized() {
                debug_assert!(
                    new.no_worse_than(&old),
                    "fact for {} got worse across a solver run",
                    v
                );
            }
            let changed = !old.is_initialized() || new != old;
            if !changed {
                continue;
            }
            if old.is_initialized() {
                self.stats.changed_facts += 1;
            } else {
                self.stats.new_facts += 1;
            }
            // Singleton scalars feed the replacement map.
            if new.kind == SetKind::Scalar {
                if let Some(single) = new.is_singleton() {
                    if single.qual == RefQual::Plain && single.ctx.is_none() {
                        self.tree.set_replacement(ctx, v, *single);
                    }
                }
            }
            self.queue_users(v, ctx, false, true);
        }
    }

    // ---- dependents -----------------------------------------------------

    /// Queue every user of (v, ctx) whose own fact may now improve,
    /// walking the context tree to each user's home.
    fn queue_users(&mut self, v: Value, ctx: Ctx, in_scope_now: bool, pend_out: bool) {
        let users = self.prog.users.get(&v).cloned().unwrap_or_default();
        for user in users {
            self.queue_one_user(v, user, ctx, in_scope_now, pend_out);
        }
    }

    fn queue_one_user(&mut self, v: Value, user: Value, ctx: Ctx, in_scope_now: bool, pend_out: bool) {
        let Some((ufunc, ublock, is_ret)) = self
            .prog
            .module
            .as_inst(user)
            .map(|i| (i.func, i.block, matches!(i.op, Op::Ret { .. })))
        else {
            return;
        };
        // A changed return operand re-queues the call it answers.
        if is_ret {
            let fctx = self.tree.function_ctx(ctx);
            if let CtxKind::Inline { call, caller } = self.tree.ctxs[fctx].kind {
                self.queue_dependent(call, caller, in_scope_now, pend_out);
            }
            return;
        }
        if ufunc != self.tree.func_of(ctx) {
            return;
        }
        let func = ufunc;
        let forest = self.prog.forest(func);
        let my_l = self.tree.loop_of(ctx);
        let user_l = forest.loop_for(ublock);
        if forest.contains(my_l, user_l) && user_l != my_l {
            self.queue_user_rising(v, user, ctx, user_l, in_scope_now, pend_out);
        } else {
            self.queue_user_falling(v, user, ctx, in_scope_now, pend_out);
        }
    }

    /// The user lives in a loop below this context: investigate it here
    /// (flow-insensitive view) and in every peel iteration of the loop.
    fn queue_user_rising(
        &mut self,
        v: Value,
        user: Value,
        ctx: Ctx,
        user_l: Option<Loop>,
        in_scope_now: bool,
        pend_out: bool,
    ) {
        let func = self.tree.func_of(ctx);
        let forest = self.prog.forest(func);
        let mut investigate_here = true;
        if let Some(ul) = user_l {
            let child = forest.immediate_child(self.tree.loop_of(ctx), ul);
            if let Some(peel) = self.tree.peel_child(ctx, child) {
                if self.tree.peels[peel].status == IterStatus::Final {
                    investigate_here = false;
                }
                let iters = self.tree.peels[peel].iterations.clone();
                for iter in iters {
                    self.queue_user_rising(v, user, iter, user_l, in_scope_now, pend_out);
                }
            }
        }
        if investigate_here {
            self.queue_user_falling(v, user, ctx, in_scope_now, pend_out);
        }
    }

    fn queue_user_falling(&mut self, v: Value, user: Value, ctx: Ctx, in_scope_now: bool, pend_out: bool) {
        let home = self.tree.home_ctx(&self.prog, ctx, user);
        let (ublock, uop) = {
            let inst = self.prog.module.as_inst(user).unwrap();
            (inst.block, inst.op.clone())
        };
        if self.tree.block_is_dead(home, ublock) {
            return;
        }
        match &uop {
            Op::Call { callee: Callee::Direct(f), args } => {
                // Operand feeds an inlined callee's argument facts.
                if let Some(child) = self.tree.inline_child(home, user) {
                    let params = self.prog.module.functions[*f].params.clone();
                    for (i, &a) in args.iter().enumerate() {
                        if a == v {
                            if let Some(&param) = params.get(i) {
                                self.queue_dependent(param, child, in_scope_now, pend_out);
                            }
                        }
                    }
                }
                self.queue_dependent(user, home, in_scope_now, pend_out);
            }
            Op::Store { .. } | Op::Memcpy { .. } | Op::Memset { .. } => {
                // A changed stored value (or pointer) re-queues exactly
                // the loads that depended on this writer.
                let effects: Vec<(Value, Ctx)> = self.tree.ctxs[home]
                    .mem_writer_effects
                    .get(&user)
                    .map(|s| s.iter().copied().collect())
                    .unwrap_or_default();
                for (load, load_ctx) in effects {
                    self.queue_dependent(load, load_ctx, in_scope_now, pend_out);
                }
            }
            _ => {
                self.queue_dependent(user, home, in_scope_now, pend_out);
            }
        }
    }

    // ---- transfer function ----------------------------------------------

    /// Recompute the fact for (v, ctx); store and fan out when changed.
    /// Returns whether the stored fact changed.
    pub fn update_base_pointer(&mut self, v: Value, ctx: Ctx, finalise: bool) -> bool {
        self.stats.transfer_invocations += 1;
        let old = self.tree.pb_falling(&self.prog, ctx, v);
        // Getting no worse: a fact already overdefined (or absent) when
        // finalising stays put.
        if finalise && old.as_ref().map(|pb| pb.overdef).unwrap_or(true) {
            return false;
        }

        enum Transfer {
            Arg(u32),
            Inst(Op),
            Identity,
        }
        let transfer = match &self.prog.module.values[v].kind {
            ValueKind::Arg { index, .. } => Transfer::Arg(*index),
            ValueKind::Const(_) | ValueKind::Global(_) => Transfer::Identity,
            ValueKind::Inst(inst) => Transfer::Inst(inst.op.clone()),
        };
        let new = match transfer {
            Transfer::Arg(index) => self.arg_base_pointer(ctx, index),
            Transfer::Identity => None,
            Transfer::Inst(op) => match op {
                Op::Load { .. } => {
                    try_forward_load(&mut self.prog, &mut self.tree, v, ctx, finalise, &mut self.stats)
                }
                Op::Gep { base, .. } => self.update_unary(ctx, v, base, None),
                Op::Cast { kind, arg } => self.update_unary(ctx, v, arg, Some(kind)),
                Op::Bin { op, lhs, rhs } => self.update_binop(ctx, v, op, lhs, rhs),
                Op::Phi { .. } => match self.update_header_phi(ctx, v) {
                    Some(result) => result,
                    None => self.merge_base_pointer(ctx, v, finalise),
                },
                Op::Select { .. } | Op::Call { .. } => self.merge_base_pointer(ctx, v, finalise),
                _ => None,
            },
        };

        let Some(new) = new else { return false };
        debug_assert!(new.overdef || new.kind != SetKind::Unknown);

        let changed = match self.tree.ctxs[ctx].pointer_bases.get(&v) {
            Some(existing) => *existing != new,
            None => true,
        };
        if changed {
            log::trace!("update {} in {}: {}", v, ctx, new);
            self.tree.set_pb(ctx, v, new);
            self.queue_users(v, ctx, true, false);
        }
        changed
    }

    /// An inlined function's argument pulls from the call-site operand
    /// in the parent context.
    fn arg_base_pointer(&self, ctx: Ctx, index: u32) -> Option<PointerBase> {
        let fctx = self.tree.function_ctx(ctx);
        match self.tree.ctxs[fctx].kind {
            CtxKind::Inline { call, caller } => {
                let Some(Op::Call { args, .. }) = self.prog.module.inst_op(call) else {
                    return None;
                };
                let &arg = args.get(index as usize)?;
                self.tree.pb_falling(&self.prog, caller, arg)
            }
            _ => None,
        }
    }

    /// The slot a `VaArg` reference resolves to: the call-site operand
    /// past the named parameters, counted per slot class.
    pub fn vararg_operand(&self, ctx: Ctx, kind: VaKind, index: u32) -> Option<(Value, Ctx)> {
        let fctx = self.tree.function_ctx(ctx);
        let CtxKind::Inline { call, caller } = self.tree.ctxs[fctx].kind else { return None };
        let Some(Op::Call { callee: Callee::Direct(f), args }) = self.prog.module.inst_op(call)
        else {
            return None;
        };
        if !self.prog.module.functions[*f].is_variadic || kind == VaKind::BasePtr {
            return None;
        }
        let fixed = self.prog.module.functions[*f].params.len();
        // This IR has no float types: every variadic slot is
        // integer-class.
        let slot = args.iter().skip(fixed).nth(index as usize)?;
        Some((*slot, caller))
    }

    /// Operand lattice lookup for a user instruction, choosing the
    /// rising or falling route by the operand's scope.
    fn operand_pb(&self, ctx: Ctx, v: Value, user: Value) -> Option<PointerBase> {
        if let Some(pb) = self.tree.pb_identity(&self.prog, ctx, v) {
            return Some(pb);
        }
        let user_inst = self.prog.module.as_inst(user)?;
        let forest = self.prog.forest(user_inst.func);
        let my_l = self.tree.loop_of(ctx);
        let v_l = self.prog.value_scope(v);
        let user_l = forest.loop_for(user_inst.block);
        if user_l == my_l && v_l != user_l && forest.contains(user_l, v_l) {
            // An exit PHI (or similar) pulling a value out of a nest of
            // loops below: use per-iteration information if available.
            self.tree.pb_rising(&self.prog, ctx, v, v_l)
        } else {
            self.tree.pb_falling(&self.prog, ctx, v)
        }
    }

    /// GEPs and casts map their single operand's set pointwise. Scalars
    /// constant-fold per element; pointer sets pass through (byte
    /// offsets are reconstructed at the load site), with pointer/int
    /// conversions tracked in the reference qualifier.
    fn update_unary(&mut self, ctx: Ctx, v: Value, arg: Value, cast: Option<CastKind>) -> Option<PointerBase> {
        let arg_pb = self.operand_pb(ctx, arg, v)?;
        if arg_pb.overdef {
            return Some(arg_pb);
        }
        debug_assert!(arg_pb.kind != SetKind::Unknown);
        if arg_pb.kind == SetKind::Pointer {
            let mapped: SmallVec<[ValueRef; 4]> = match cast {
                Some(CastKind::PtrToInt) => {
                    arg_pb.values.iter().map(|r| r.with_added_offset(0)).collect()
                }
                Some(CastKind::IntToPtr) => arg_pb
                    .values
                    .iter()
                    .map(|r| if r.offset() == Some(0) { r.unqualified() } else { *r })
                    .collect(),
                _ => arg_pb.values.clone(),
            };
            let mut pb = PointerBase::unknown();
            pb.kind = SetKind::Pointer;
            for r in mapped {
                pb.insert(r);
            }
            return Some(pb);
        }
        // Scalar set: fold each element through the cast.
        let kind = cast?;
        if !matches!(kind, CastKind::SExt | CastKind::ZExt | CastKind::Trunc | CastKind::BitCast) {
            return None;
        }
        let to_ty = self.prog.module.value_ty(v).clone();
        let mut folded: Vec<Const> = Vec::with_capacity(arg_pb.values.len());
        for r in &arg_pb.values {
            if r.qual != RefQual::Plain || r.ctx.is_some() {
                return Some(PointerBase::overdef());
            }
            let Some(c) = self.prog.module.as_const(r.value) else {
                return Some(PointerBase::overdef());
            };
            match fold_cast(kind, c, &to_ty) {
                Some(f) => folded.push(f),
                None => return Some(PointerBase::overdef()),
            }
        }
        let mut pb = PointerBase::unknown();
        for c in folded {
            let cv = self.prog.module.const_value(c.clone());
            if pb.merge(&crate::state::pb_of_const(&self.prog, cv, &c)) && pb.overdef {
                break;
            }
        }
        Some(pb)
    }

    /// Binary transfer: pointer + scalar keeps the pointer side (with
    /// offsets adjusted on int-typed pointer refs), two pointers are
    /// meaningless, scalars cross-product fold.
    fn update_binop(&mut self, ctx: Ctx, v: Value, op: BinOp, lhs: Value, rhs: Value) -> Option<PointerBase> {
        if !matches!(op, BinOp::Add | BinOp::Sub | BinOp::And | BinOp::Or | BinOp::Xor) {
            return None;
        }
        let pb1 = self.operand_pb(ctx, lhs, v);
        let pb2 = self.operand_pb(ctx, rhs, v);
        if pb1.is_none() && pb2.is_none() {
            return None;
        }
        if let (Some(a), Some(b)) = (&pb1, &pb2) {
            if a.overdef || b.overdef {
                return Some(PointerBase::overdef());
            }
        }
        let kind1 = pb1.as_ref().map(|p| p.kind).unwrap_or(SetKind::Unknown);
        let kind2 = pb2.as_ref().map(|p| p.kind).unwrap_or(SetKind::Unknown);

        if kind1 == SetKind::Pointer || kind2 == SetKind::Pointer {
            if !matches!(op, BinOp::Add | BinOp::Sub) {
                return None;
            }
            if kind1 == SetKind::Pointer && kind2 == SetKind::Pointer {
                log::trace!("{:?} of two pointers", op);
                return Some(PointerBase::overdef());
            }
            let (ptr_side, scalar_side, negate) = if kind1 == SetKind::Pointer {
                (pb1.unwrap(), pb2, op == BinOp::Sub)
            } else {
                (pb2.unwrap(), pb1, false)
            };
            // A known scalar offset shifts int-typed pointer refs.
            let delta = scalar_side
                .as_ref()
                .and_then(|p| p.is_singleton())
                .filter(|r| r.qual == RefQual::Plain && r.ctx.is_none())
                .and_then(|r| self.prog.module.as_const(r.value))
                .and_then(|c| c.as_i64());
            let mut pb = PointerBase::unknown();
            pb.kind = SetKind::Pointer;
            for r in &ptr_side.values {
                let mapped = match (r.qual, delta) {
                    (RefQual::PtrAsInt(_), Some(d)) => {
                        r.with_added_offset(if negate { -d } else { d })
                    }
                    _ => *r,
                };
                pb.insert(mapped);
            }
            return Some(pb);
        }

        // Scalar cross-product fold; recurrences through PHIs circulate
        // small sets, so this is worth doing even for multi-element
        // sides.
        let (pb1, pb2) = (pb1?, pb2?);
        if pb1.kind != SetKind::Scalar || pb2.kind != SetKind::Scalar {
            return None;
        }
        let mut folded: Vec<Const> = Vec::new();
        for r1 in &pb1.values {
            for r2 in &pb2.values {
                let c1 = plain_const(&self.prog, r1)?;
                let c2 = plain_const(&self.prog, r2)?;
                match fold_binop(op, c1, c2) {
                    Some(c) => folded.push(c),
                    None => return Some(PointerBase::overdef()),
                }
            }
        }
        let mut pb = PointerBase::unknown();
        for c in folded {
            let cv = self.prog.module.const_value(c.clone());
            if pb.merge(&crate::state::pb_of_const(&self.prog, cv, &c)) && pb.overdef {
                break;
            }
        }
        Some(pb)
    }

    /// A loop-header PHI in a peel iteration takes exactly one incoming:
    /// the preheader value (iteration 0) or the previous iteration's
    /// latch value. Returns `None` if this is not such a PHI.
    fn update_header_phi(&self, ctx: Ctx, v: Value) -> Option<Option<PointerBase>> {
        let CtxKind::PeelIter { attempt, index } = self.tree.ctxs[ctx].kind else { return None };
        let inst = self.prog.module.as_inst(v).unwrap();
        let the_loop = self.tree.peels[attempt].the_loop;
        let forest = self.prog.forest(inst.func);
        if forest.header(the_loop) != inst.block {
            return None;
        }
        let Op::Phi { incoming } = &inst.op else { return None };
        let result = if index == 0 {
            let preheader = forest.preheader(&self.prog.module, inst.func, the_loop)?;
            let &(_, value) = incoming.iter().find(|(b, _)| *b == preheader)?;
            let parent = self.tree.peels[attempt].parent;
            self.tree.pb_falling(&self.prog, parent, value)
        } else {
            let latch = forest.latch(the_loop)?;
            let &(_, value) = incoming.iter().find(|(b, _)| *b == latch)?;
            let prev = self.tree.peels[attempt].iterations[index - 1];
            self.tree.pb_falling(&self.prog, prev, value)
        };
        Some(result)
    }

    /// PHIs, selects and call returns merge over their feasible inputs.
    /// This is the one place the two phases differ: an uninitialized
    /// input is skipped when optimistic and overdefines when finalising.
    fn merge_base_pointer(&mut self, ctx: Ctx, v: Value, finalise: bool) -> Option<PointerBase> {
        let (block, op) = {
            let inst = self.prog.module.as_inst(v).unwrap();
            (inst.block, inst.op.clone())
        };
        let mut inputs: SmallVec<[(Value, Ctx); 4]> = SmallVec::new();
        match &op {
            Op::Select { if_true, if_false, .. } => {
                inputs.push((*if_true, ctx));
                inputs.push((*if_false, ctx));
            }
            Op::Phi { incoming } => {
                for &(pred, value) in incoming {
                    if self.tree.edge_is_dead(ctx, pred, block)
                        || self.tree.block_is_dead(ctx, pred)
                    {
                        continue;
                    }
                    inputs.push((value, ctx));
                }
                if inputs.is_empty() {
                    // Every incoming edge is dead; any query is
                    // overdefined by fiat.
                    return Some(PointerBase::overdef());
                }
            }
            Op::Call { callee, .. } => {
                if *self.prog.module.value_ty(v) == Type::Void {
                    return None;
                }
                let child = match self.ensure_inline_context(ctx, v) {
                    Some(c) => c,
                    None => return None,
                };
                let callee_fn = match callee {
                    Callee::Direct(f) => *f,
                    Callee::External(_) => return None,
                };
                for (b, data) in self.prog.module.functions[callee_fn].blocks.iter() {
                    if self.tree.block_is_dead(child, b) {
                        continue;
                    }
                    let term = *data.insts.last().unwrap();
                    if let Some(Op::Ret { value: Some(rv) }) = self.prog.module.inst_op(term) {
                        inputs.push((*rv, child));
                    }
                }
                if inputs.is_empty() {
                    // No feasible return.
                    return Some(PointerBase::overdef());
                }
            }
            _ => unreachable!(),
        }

        let mut pb = PointerBase::unknown();
        let mut any = false;
        for (input, ictx) in inputs {
            if pb.overdef {
                break;
            }
            match self.operand_pb(ictx, input, v) {
                Some(ipb) => {
                    any = true;
                    pb.merge(&ipb);
                }
                None => {
                    if finalise {
                        return Some(PointerBase::overdef());
                    }
                }
            }
        }
        if any {
            Some(pb)
        } else {
            None
        }
    }

    /// Get or create the inline context for a direct call to a defined,
    /// non-recursive callee.
    fn ensure_inline_context(&mut self, ctx: Ctx, call: Value) -> Option<Ctx> {
        if let Some(child) = self.tree.inline_child(ctx, call) {
            return Some(child);
        }
        if self.tree.ctxs[ctx].disabled_inlines.contains(&call) {
            return None;
        }
        let Some(Op::Call { callee: Callee::Direct(f), .. }) = self.prog.module.inst_op(call)
        else {
            return None;
        };
        let f = *f;
        if self.prog.module.functions[f].blocks.is_empty() {
            return None;
        }
        if self.tree.stack_includes_call_to(ctx, f) {
            log::debug!("refusing recursive inline of {} at {}", self.prog.module.functions[f].name, call);
            return None;
        }
        let child = self.tree.create_inline(ctx, call, f);
        self.stats.contexts_created += 1;
        self.queue_scope_pending(child, None);
        Some(child)
    }

    // ---- structural mutations -------------------------------------------

    /// Explicitly enable exploration of a call: creates the context,
    /// drops every load that was blocked on the call, and re-queues.
    pub fn enable_inline(&mut self, ctx: Ctx, call: Value) -> Option<Ctx> {
        self.tree.ctxs[ctx].disabled_inlines.remove(&call);
        let child = self.ensure_inline_context(ctx, call)?;
        let blocked = self.tree.dismiss_call_blocked_loads(&self.prog, ctx, call);
        for (load, load_ctx) in blocked {
            self.queue_pending(load, load_ctx);
        }
        self.queue_pending(call, ctx);
        self.run_pending();
        Some(child)
    }

    pub fn disable_inline(&mut self, ctx: Ctx, call: Value) {
        if let Some(child) = self.tree.ctxs[ctx].inline_children.get(&call).copied() {
            let stale = self.tree.local_cfg_changed(&self.prog, child);
            for (load, load_ctx) in stale {
                self.queue_pending(load, load_ctx);
            }
        }
        self.tree.ctxs[ctx].disabled_inlines.insert(call);
        self.queue_pending(call, ctx);
        self.run_pending();
    }

    /// Speculatively peel a loop: explore iterations until the latch
    /// edge dies (final), the loop provably continues past the cap, or
    /// neither can be proven.
    pub fn enable_peel(&mut self, ctx: Ctx, l: Loop) -> Peel {
        self.tree.ctxs[ctx].disabled_peels.remove(&l);
        if let Some(existing) = self.tree.ctxs[ctx].peel_children.get(&l).copied() {
            return existing;
        }
        let func = self.tree.func_of(ctx);
        let peel = self.tree.create_peel(ctx, l);
        self.stats.contexts_created += 1;
        let mut status = IterStatus::Unknown;
        for _ in 0..PEEL_ITERATION_CAP {
            let iter = self.tree.add_peel_iteration(peel);
            self.stats.peel_iterations += 1;
            self.considered.clear();
            self.queue_whole_scope(iter, Some(l));
            let mut modified = Vec::new();
            self.run_phase(false, Some(&mut modified));
            modified.sort();
            modified.dedup();
            for (v, c) in modified {
                self.queue_update(v, c);
            }
            self.run_phase(true, None);
            self.queue_new_pb_work();
            self.considered.clear();
            self.refine_cfg(iter);

            let forest = self.prog.forest(func);
            let header = forest.header(l);
            let latch = forest.latch(l);
            let exits = forest.exit_edges(&self.prog.module, func, l);
            let latch_dead =
                latch.map(|la| self.tree.edge_is_dead(iter, la, header)).unwrap_or(false);
            if latch_dead {
                status = IterStatus::Final;
                break;
            }
            let all_exits_dead = !exits.is_empty()
                && exits.iter().all(|&(from, to)| self.tree.edge_is_dead(iter, from, to));
            if all_exits_dead {
                status = IterStatus::NonFinal;
                continue;
            }
            status = IterStatus::Unknown;
            break;
        }
        self.tree.peels[peel].status = status;
        log::debug!(
            "peel {} of {} finished with {:?} after {} iterations",
            peel,
            l,
            status,
            self.tree.peels[peel].iterations.len()
        );
        if status == IterStatus::Final {
            // The loop's exit mapping changed for every walk that ever
            // crossed it in the enclosing context.
            let stale = self.tree.local_cfg_changed(&self.prog, ctx);
            for (load, load_ctx) in stale {
                self.queue_pending(load, load_ctx);
            }
            self.queue_scope_pending(ctx, None);
        }
        self.run_pending();
        peel
    }

    pub fn disable_peel(&mut self, ctx: Ctx, l: Loop) {
        if let Some(&peel) = self.tree.ctxs[ctx].peel_children.get(&l) {
            let iters = self.tree.peels[peel].iterations.clone();
            for iter in iters {
                let stale = self.tree.local_cfg_changed(&self.prog, iter);
                for (load, load_ctx) in stale {
                    self.queue_pending(load, load_ctx);
                }
            }
        }
        self.tree.ctxs[ctx].disabled_peels.insert(l);
        let stale = self.tree.local_cfg_changed(&self.prog, ctx);
        for (load, load_ctx) in stale {
            self.queue_pending(load, load_ctx);
        }
        self.queue_scope_pending(ctx, None);
        self.run_pending();
    }

    // ---- CFG refinement -------------------------------------------------

    /// Fold conditional branches whose conditions resolved, recompute
    /// reachability and certain blocks, and invalidate dependents when
    /// anything changed. Returns whether the context's CFG view changed.
    pub fn refine_cfg(&mut self, ctx: Ctx) -> bool {
        if self.tree.ctxs[ctx].dead {
            return false;
        }
        let func = self.tree.func_of(ctx);
        let mut changed = false;
        let blocks: Vec<Block> = self.prog.module.functions[func].blocks.keys().collect();
        for &b in &blocks {
            if self.tree.block_is_dead(ctx, b) || !self.in_ctx_scope(ctx, b) {
                continue;
            }
            let term = self.prog.module.terminator(func, b);
            let Some(Op::CondBr { cond, if_true, if_false }) = self.prog.module.inst_op(term)
            else {
                continue;
            };
            let (cond, if_true, if_false) = (*cond, *if_true, *if_false);
            let Some(taken) = self.resolve_bool(ctx, cond) else { continue };
            let dead_succ = if taken { if_false } else { if_true };
            if !self.tree.edge_is_dead(ctx, b, dead_succ) {
                log::debug!("edge {} -> {} dead in {}", b, dead_succ, ctx);
                self.tree.set_edge_dead(ctx, b, dead_succ);
                changed = true;
            }
        }

        changed |= self.recompute_reachability(ctx);
        if changed {
            self.mark_certain_blocks(ctx);
            let stale = self.tree.local_cfg_changed(&self.prog, ctx);
            for (load, load_ctx) in stale {
                self.queue_pending(load, load_ctx);
            }
            // Dead edges change PHI merges anywhere in the scope.
            self.queue_scope_pending(ctx, self.tree.loop_of(ctx));
        }
        changed
    }

    fn in_ctx_scope(&self, ctx: Ctx, b: Block) -> bool {
        match self.tree.loop_of(ctx) {
            None => true,
            Some(l) => self.prog.forest(self.tree.func_of(ctx)).block_in_loop(l, b),
        }
    }

    /// Entry block of the context's scope: the function entry, or the
    /// loop header for a peel iteration.
    fn scope_entry(&self, ctx: Ctx) -> Block {
        match self.tree.loop_of(ctx) {
            None => self.prog.module.functions[self.tree.func_of(ctx)].entry,
            Some(l) => self.prog.forest(self.tree.func_of(ctx)).header(l),
        }
    }

    /// Blocks of the scope not reached by a live forward walk are dead.
    fn recompute_reachability(&mut self, ctx: Ctx) -> bool {
        struct Reach {
            scope_ctx: Ctx,
            reached: fxhash::FxHashSet<Block>,
        }
        impl ForwardVisitor for Reach {
            type Payload = ();
            fn visit_inst(
                &mut self,
                prog: &Program,
                _tree: &SpecTree,
                v: Value,
                ctx: Ctx,
                _payload: &mut (),
            ) -> WalkDecision {
                if ctx != self.scope_ctx {
                    return WalkDecision::StopThisPath;
                }
                if let Some(inst) = prog.module.as_inst(v) {
                    self.reached.insert(inst.block);
                }
                WalkDecision::Continue
            }
            // Reachability is a property of this context's own CFG view.
            fn enter_nested_contexts(&self) -> bool {
                false
            }
        }
        let mut visitor = Reach { scope_ctx: ctx, reached: fxhash::FxHashSet::default() };
        walk_forward(&self.prog, &self.tree, ctx, self.scope_entry(ctx), &mut visitor, ());

        let func = self.tree.func_of(ctx);
        let mut changed = false;
        let blocks: Vec<Block> = self.prog.module.functions[func].blocks.keys().collect();
        for b in blocks {
            if !self.in_ctx_scope(ctx, b) || self.tree.block_is_dead(ctx, b) {
                continue;
            }
            if !visitor.reached.contains(&b) {
                log::debug!("block {} dead in {}", b, ctx);
                self.tree.set_block_dead(ctx, b);
                changed = true;
            }
        }
        changed
    }

    /// Blocks guaranteed reached on every surviving path: the scope
    /// entry, then each unique live successor whose only live
    /// predecessor is the previous certain block.
    fn mark_certain_blocks(&mut self, ctx: Ctx) {
        let func = self.tree.func_of(ctx);
        let mut b = self.scope_entry(ctx);
        self.tree.ctxs[ctx].certain_blocks.clear();
        loop {
            self.tree.ctxs[ctx].certain_blocks.insert(b);
            let live: Vec<Block> = self
                .prog
                .module
                .successors(func, b)
                .into_iter()
                .filter(|&s| {
                    !self.tree.edge_is_dead(ctx, b, s)
                        && !self.tree.block_is_dead(ctx, s)
                        && self.in_ctx_scope(ctx, s)
                })
                .collect();
            if live.len() != 1 {
                break;
            }
            let next = live[0];
            let live_preds = self.prog.module.functions[func].blocks[next]
                .preds
                .iter()
                .filter(|&&p| !self.tree.edge_is_dead(ctx, p, next) && !self.tree.block_is_dead(ctx, p))
                .count();
            if live_preds != 1 || self.tree.block_is_certain(ctx, next) {
                break;
            }
            b = next;
        }
    }

    /// Resolve a boolean condition to a constant, folding a comparison
    /// over resolved scalar operands if needed.
    fn resolve_bool(&self, ctx: Ctx, cond: Value) -> Option<bool> {
        if let Some(k) = self.scalar_int(ctx, cond) {
            return Some(k != 0);
        }
        if let Some(Op::Cmp { pred, lhs, rhs }) = self.prog.module.inst_op(cond) {
            let a = self.scalar_const(ctx, *lhs)?;
            let b = self.scalar_const(ctx, *rhs)?;
            return fold_cmp(*pred, &a, &b);
        }
        None
    }

    fn scalar_const(&self, ctx: Ctx, v: Value) -> Option<Const> {
        if let Some(c) = self.prog.module.as_const(v) {
            return Some(c.clone());
        }
        if let Some(c) = self.tree.const_replacement(&self.prog, ctx, v) {
            return Some(c.clone());
        }
        let pb = self.tree.pb_falling(&self.prog, ctx, v)?;
        let single = pb.is_singleton()?;
        if pb.kind != SetKind::Scalar || single.qual != RefQual::Plain || single.ctx.is_some() {
            return None;
        }
        self.prog.module.as_const(single.value).cloned()
    }

    fn scalar_int(&self, ctx: Ctx, v: Value) -> Option<i64> {
        self.scalar_const(ctx, v)?.as_i64()
    }

    // ---- public queries -------------------------------------------------

    /// The best fact for `v` seen from `ctx`, rising through terminated
    /// peels when the value lives below them.
    pub fn pointer_base(&self, v: Value, ctx: Ctx) -> PointerBase {
        let scope = self.prog.value_scope(v);
        self.tree
            .pb_rising(&self.prog, ctx, v, scope)
            .unwrap_or_default()
    }

    /// The folded constant for `v` in `ctx`, when its fact is a
    /// singleton scalar.
    pub fn replacement(&self, v: Value, ctx: Ctx) -> Option<Const> {
        self.scalar_const(ctx, v)
    }

    pub fn edge_is_dead(&self, ctx: Ctx, from: Block, to: Block) -> bool {
        self.tree.edge_is_dead(ctx, from, to)
    }

    pub fn block_is_dead(&self, ctx: Ctx, b: Block) -> bool {
        self.tree.block_is_dead(ctx, b)
    }

    /// The forwarding status string recorded for a load (reason for
    /// overdef, or its resolved shape).
    pub fn forward_status(&self, v: Value, ctx: Ctx) -> Option<&str> {
        self.tree.ctxs[ctx].forward_status.get(&v).map(|s| s.as_str())
    }
}

fn plain_const<'p>(prog: &'p Program, r: &ValueRef) -> Option<&'p Const> {
    if r.qual != RefQual::Plain || r.ctx.is_some() {
        return None;
    }
    prog.module.as_const(r.value)
}

/// Constant-fold one binary operation; trapping or unfoldable
/// combinations yield `None` (and so overdefine, never error).
pub fn fold_binop(op: BinOp, a: &Const, b: &Const) -> Option<Const> {
    let (bits, av) = a.as_int()?;
    let (bits2, bv) = b.as_int()?;
    if bits != bits2 {
        return None;
    }
    let sa = a.as_i64()?;
    let sb = b.as_i64()?;
    let raw: u64 = match op {
        BinOp::Add => av.wrapping_add(bv),
        BinOp::Sub => av.wrapping_sub(bv),
        BinOp::Mul => av.wrapping_mul(bv),
        BinOp::And => av & bv,
        BinOp::Or => av | bv,
        BinOp::Xor => av ^ bv,
        BinOp::UDiv => {
            if bv == 0 {
                return None;
            }
            av / bv
        }
        BinOp::URem => {
            if bv == 0 {
                return None;
            }
            av % bv
        }
        BinOp::SDiv => {
            if sb == 0 || (sa == i64::MIN && sb == -1) {
                return None;
            }
            (sa / sb) as u64
        }
        BinOp::SRem => {
            if sb == 0 || (sa == i64::MIN && sb == -1) {
                return None;
            }
            (sa % sb) as u64
        }
        BinOp::Shl => {
            if bv >= bits as u64 {
                return None;
            }
            av << bv
        }
        BinOp::LShr => {
            if bv >= bits as u64 {
                return None;
            }
            av >> bv
        }
        BinOp::AShr => {
            if bv >= bits as u64 {
                return None;
            }
            (sa >> bv) as u64
        }
    };
    Some(Const::int(bits, raw as i64))
}

pub fn fold_cast(kind: CastKind, c: &Const, to: &Type) -> Option<Const> {
    let to_bits = to.int_bits()?;
    let (bits, value) = c.as_int()?;
    match kind {
        CastKind::ZExt => {
            if to_bits < bits {
                return None;
            }
            Some(Const::int(to_bits, value as i64))
        }
        CastKind::SExt => {
            if to_bits < bits {
                return None;
            }
            Some(Const::int(to_bits, c.as_i64()?))
        }
        CastKind::Trunc => {
            if to_bits > bits {
                return None;
            }
            Some(Const::int(to_bits, value as i64))
        }
        CastKind::BitCast => {
            if to_bits == bits {
                Some(Const::int(to_bits, value as i64))
            } else {
                None
            }
        }
        CastKind::IntToPtr | CastKind::PtrToInt => None,
    }
}

pub fn fold_cmp(pred: CmpPred, a: &Const, b: &Const) -> Option<bool> {
    let (bits, av) = a.as_int()?;
    let (bits2, bv) = b.as_int()?;
    if bits != bits2 {
        return None;
    }
    let sa = a.as_i64()?;
    let sb = b.as_i64()?;
    Some(match pred {
        CmpPred::Eq => av == bv,
        CmpPred::Ne => av != bv,
        CmpPred::Ult => av < bv,
        CmpPred::Ule => av <= bv,
        CmpPred::Ugt => av > bv,
        CmpPred::Uge => av >= bv,
        CmpPred::Slt => sa < sb,
        CmpPred::Sle => sa <= sb,
        CmpPred::Sgt => sa > sb,
        CmpPred::Sge => sa >= sb,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binop_folding_wraps_and_traps() {
        let a = Const::int(8, 0xff);
        let b = Const::int(8, 1);
        assert_eq!(fold_binop(BinOp::Add, &a, &b), Some(Const::int(8, 0)));
        let z = Const::int(8, 0);
        assert_eq!(fold_binop(BinOp::UDiv, &a, &z), None);
        assert_eq!(fold_binop(BinOp::Shl, &a, &Const::int(8, 8)), None);
    }

    #[test]
    fn cast_folding() {
        let c = Const::int(8, -1);
        assert_eq!(fold_cast(CastKind::SExt, &c, &Type::Int(32)), Some(Const::int(32, -1)));
        assert_eq!(fold_cast(CastKind::ZExt, &c, &Type::Int(32)), Some(Const::int(32, 0xff)));
        let w = Const::int(32, 0x1ff);
        assert_eq!(fold_cast(CastKind::Trunc, &w, &Type::Int(8)), Some(Const::int(8, -1)));
    }

    #[test]
    fn cmp_folding_signedness() {
        let a = Const::int(8, -1);
        let b = Const::int(8, 1);
        assert_eq!(fold_cmp(CmpPred::Slt, &a, &b), Some(true));
        assert_eq!(fold_cmp(CmpPred::Ult, &a, &b), Some(false));
    }
}
