//! The speculation tree and its per-context state.
//!
//! Analysis facts are context-sensitive: every fact is indexed on a
//! context, which records one hypothesis about how we reached the code —
//! the root entry, a call inlined into a parent context, or one peeled
//! iteration of a loop. Contexts live in an arena and refer to each other
//! by id; dependency edges across contexts are (value, context) pairs,
//! never owning references.
//!
//! Per context there are two halves to the state: the *facts* (improved
//! value replacements and pointer-base lattice entries, plus the dead /
//! certain CFG sets), and the *bookkeeping* that lets the solver re-queue
//! exactly the work a change invalidates (memory-writer effects, loads
//! blocked on calls, CFG-dependent loads, and the per-load def-or-clobber
//! and failure caches).
//!
//! Fact lookup for a value defined outside the current loop falls to the
//! parent context; lookup across a terminated peel rises into its final
//! iteration.

use cranelift_entity::{entity_impl, PrimaryMap};
use fxhash::{FxHashMap, FxHashSet};

use crate::ir::{Block, Function, Module, Op, Value, ValueKind};
use crate::loops::{Loop, LoopForest};
use crate::target::TargetLayout;
use crate::value::{PointerBase, SetKind, ValueRef};

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ctx(u32);
entity_impl!(Ctx, "ctx");

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Peel(u32);
entity_impl!(Peel, "peel");

/// The program under analysis plus the derived structures every
/// component consults: target layout, per-function loop forests, and the
/// value use lists.
pub struct Program {
    pub module: Module,
    pub target: TargetLayout,
    pub loops: FxHashMap<Function, LoopForest>,
    pub users: FxHashMap<Value, Vec<Value>>,
}

impl Program {
    pub fn new(module: Module, target: TargetLayout) -> Program {
        let mut loops = FxHashMap::default();
        for f in module.functions.keys() {
            loops.insert(f, LoopForest::compute(&module, f));
        }
        let users = module.compute_users();
        Program { module, target, loops, users }
    }

    pub fn forest(&self, func: Function) -> &LoopForest {
        &self.loops[&func]
    }

    /// The natural scope of a value: the innermost loop of its defining
    /// block. Arguments, globals and constants are function-scope.
    pub fn value_scope(&self, v: Value) -> Option<Loop> {
        match &self.module.values[v].kind {
            ValueKind::Inst(inst) => self.forest(inst.func).loop_for(inst.block),
            _ => None,
        }
    }

    pub fn block_scope(&self, func: Function, b: Block) -> Option<Loop> {
        self.forest(func).loop_for(b)
    }

    pub fn is_allocation(&self, v: Value) -> bool {
        match &self.module.values[v].kind {
            ValueKind::Inst(inst) => match &inst.op {
                Op::Alloca { .. } => true,
                Op::Call { callee, .. } => Module::is_alloc_callee(callee),
                _ => false,
            },
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CtxKind {
    Root,
    /// A call inlined into `caller` at instruction `call`.
    Inline { call: Value, caller: Ctx },
    /// Iteration `index` of a peel attempt.
    PeelIter { attempt: Peel, index: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IterStatus {
    /// Cannot yet tell whether the last explored iteration is the last
    /// that runs.
    Unknown,
    /// The last iteration provably exits: the loop is fully peeled.
    Final,
    /// The last iteration provably re-enters the loop.
    NonFinal,
}

pub struct CtxData {
    pub kind: CtxKind,
    pub func: Function,
    pub depth: u32,
    /// The loop this context instantiates; `None` for root and inline
    /// contexts.
    pub loop_ctx: Option<Loop>,
    /// Context known unreachable (e.g. its entry edge died).
    pub dead: bool,

    // Facts.
    pub improved: FxHashMap<Value, ValueRef>,
    pub pointer_bases: FxHashMap<Value, PointerBase>,
    pub dead_blocks: FxHashSet<Block>,
    pub dead_edges: FxHashSet<(Block, Block)>,
    pub certain_blocks: FxHashSet<Block>,

    // Children.
    pub inline_children: FxHashMap<Value, Ctx>,
    pub disabled_inlines: FxHashSet<Value>,
    pub peel_children: FxHashMap<Loop, Peel>,
    pub disabled_peels: FxHashSet<Loop>,

    // Dependency indices: who to wake when this context changes.
    pub mem_writer_effects: FxHashMap<Value, FxHashSet<(Value, Ctx)>>,
    pub call_blocked_loads: FxHashMap<Value, Vec<(Value, Ctx)>>,
    pub cfg_dependent_loads: FxHashSet<(Value, Ctx)>,

    // Per-load caches.
    pub def_or_clobber_cache: FxHashMap<Value, Vec<ValueRef>>,
    pub failed_lfa_cache: FxHashMap<Value, String>,
    /// Human-readable status of the last forwarding attempt per load.
    pub forward_status: FxHashMap<Value, String>,
}

impl CtxData {
    fn new(kind: CtxKind, func: Function, depth: u32, loop_ctx: Option<Loop>) -> CtxData {
        CtxData {
            kind,
            func,
            depth,
            loop_ctx,
            dead: false,
            improved: FxHashMap::default(),
            pointer_bases: FxHashMap::default(),
            dead_blocks: FxHashSet::default(),
            dead_edges: FxHashSet::default(),
            certain_blocks: FxHashSet::default(),
            inline_children: FxHashMap::default(),
            disabled_inlines: FxHashSet::default(),
            peel_children: FxHashMap::default(),
            disabled_peels: FxHashSet::default(),
            mem_writer_effects: FxHashMap::default(),
            call_blocked_loads: FxHashMap::default(),
            cfg_dependent_loads: FxHashSet::default(),
            def_or_clobber_cache: FxHashMap::default(),
            failed_lfa_cache: FxHashMap::default(),
            forward_status: FxHashMap::default(),
        }
    }
}

pub struct PeelData {
    pub parent: Ctx,
    pub the_loop: Loop,
    pub iterations: Vec<Ctx>,
    pub status: IterStatus,
}

/// Arena of contexts plus the peel attempts tying loop iterations
/// together.
pub struct SpecTree {
    pub ctxs: PrimaryMap<Ctx, CtxData>,
    pub peels: PrimaryMap<Peel, PeelData>,
    pub root: Ctx,
}

impl SpecTree {
    pub fn new(root_func: Function) -> SpecTree {
        let mut ctxs = PrimaryMap::new();
        let root = ctxs.push(CtxData::new(CtxKind::Root, root_func, 0, None));
        SpecTree { ctxs, peels: PrimaryMap::new(), root }
    }

    pub fn func_of(&self, ctx: Ctx) -> Function {
        self.ctxs[ctx].func
    }

    /// The loop a context instantiates (`None` outside peel iterations).
    pub fn loop_of(&self, ctx: Ctx) -> Option<Loop> {
        self.ctxs[ctx].loop_ctx
    }

    /// The enclosing context: the caller for an inline context, the
    /// context enclosing the loop for a peel iteration.
    pub fn parent_of(&self, ctx: Ctx) -> Option<Ctx> {
        match self.ctxs[ctx].kind {
            CtxKind::Root => None,
            CtxKind::Inline { caller, .. } => Some(caller),
            CtxKind::PeelIter { attempt, .. } => Some(self.peels[attempt].parent),
        }
    }

    /// The function-level context a peel iteration's facts fall back to.
    pub fn function_ctx(&self, mut ctx: Ctx) -> Ctx {
        while self.loop_of(ctx).is_some() {
            ctx = self.parent_of(ctx).unwrap();
        }
        ctx
    }

    /// The context in `ctx`'s chain that owns facts for `v`: the deepest
    /// one whose loop still contains the value's natural scope.
    pub fn home_ctx(&self, prog: &Program, ctx: Ctx, v: Value) -> Ctx {
        let scope = prog.value_scope(v);
        let mut cur = ctx;
        while let Some(l) = self.loop_of(cur) {
            let forest = prog.forest(self.func_of(cur));
            if forest.contains(Some(l), scope) {
                break;
            }
            cur = self.parent_of(cur).unwrap();
        }
        cur
    }

    pub fn create_inline(&mut self, caller: Ctx, call: Value, callee: Function) -> Ctx {
        let depth = self.ctxs[caller].depth + 1;
        let child =
            self.ctxs.push(CtxData::new(CtxKind::Inline { call, caller }, callee, depth, None));
        self.ctxs[caller].inline_children.insert(call, child);
        log::debug!("created inline context {} for call {} in {}", child, call, caller);
        child
    }

    pub fn create_peel(&mut self, parent: Ctx, the_loop: Loop) -> Peel {
        let peel = self.peels.push(PeelData {
            parent,
            the_loop,
            iterations: Vec::new(),
            status: IterStatus::Unknown,
        });
        self.ctxs[parent].peel_children.insert(the_loop, peel);
        log::debug!("created peel attempt {} for {} in {}", peel, the_loop, parent);
        peel
    }

    pub fn add_peel_iteration(&mut self, peel: Peel) -> Ctx {
        let parent = self.peels[peel].parent;
        let func = self.ctxs[parent].func;
        let depth = self.ctxs[parent].depth + 1;
        let index = self.peels[peel].iterations.len();
        let the_loop = self.peels[peel].the_loop;
        let iter = self.ctxs.push(CtxData::new(
            CtxKind::PeelIter { attempt: peel, index },
            func,
            depth,
            Some(the_loop),
        ));
        self.peels[peel].iterations.push(iter);
        log::debug!("created peel iteration {} (#{}) of {}", iter, index, peel);
        iter
    }

    pub fn inline_child(&self, ctx: Ctx, call: Value) -> Option<Ctx> {
        if self.ctxs[ctx].disabled_inlines.contains(&call) {
            return None;
        }
        self.ctxs[ctx].inline_children.get(&call).copied()
    }

    pub fn peel_child(&self, ctx: Ctx, l: Loop) -> Option<Peel> {
        if self.ctxs[ctx].disabled_peels.contains(&l) {
            return None;
        }
        self.ctxs[ctx].peel_children.get(&l).copied()
    }

    /// Does the inline stack of `ctx` already include a call to `func`?
    /// Guards against unbounded recursion when creating inline contexts.
    pub fn stack_includes_call_to(&self, mut ctx: Ctx, func: Function) -> bool {
        loop {
            if self.ctxs[ctx].func == func {
                return true;
            }
            match self.parent_of(ctx) {
                Some(p) => ctx = p,
                None => return false,
            }
        }
    }

    /// Containment of contexts for base-aliasing: a peel iteration
    /// contains everything its parents do; two distinct inline contexts
    /// never contain one another.
    pub fn ctx_contains(&self, a: Ctx, b: Ctx) -> bool {
        let mut cur = a;
        loop {
            if cur == b {
                return true;
            }
            match self.ctxs[cur].kind {
                CtxKind::PeelIter { .. } => cur = self.parent_of(cur).unwrap(),
                _ => return false,
            }
        }
    }

    /// Identical allocation sites in containing contexts may be the same
    /// object; everything else with equal (value, ctx) is.
    pub fn bases_may_alias(&self, a: &ValueRef, b: &ValueRef) -> bool {
        if a.value != b.value {
            return false;
        }
        match (a.ctx, b.ctx) {
            (None, _) | (_, None) => true,
            (Some(ca), Some(cb)) => {
                ca == cb || self.ctx_contains(ca, cb) || self.ctx_contains(cb, ca)
            }
        }
    }

    // ---- fact lookup ----------------------------------------------------

    /// Identity facts: allocations, globals and constants have a pointer
    /// base regardless of the fact tables.
    pub fn pb_identity(&self, prog: &Program, ctx: Ctx, v: Value) -> Option<PointerBase> {
        match &prog.module.values[v].kind {
            ValueKind::Inst(_) if prog.is_allocation(v) => {
                let home = self.home_ctx(prog, ctx, v);
                Some(PointerBase::of(ValueRef::plain(v, home), SetKind::Pointer))
            }
            ValueKind::Global(_) => {
                Some(PointerBase::of(ValueRef::of_const(v), SetKind::Pointer))
            }
            ValueKind::Const(c) => Some(pb_of_const(prog, v, c)),
            _ => None,
        }
    }

    pub fn pb_local(&self, prog: &Program, ctx: Ctx, v: Value) -> Option<PointerBase> {
        if let Some(pb) = self.pb_identity(prog, ctx, v) {
            return Some(pb);
        }
        self.ctxs[ctx].pointer_bases.get(&v).cloned()
    }

    /// Look the fact up here, falling to the parent context while inside
    /// loop iterations.
    pub fn pb_falling(&self, prog: &Program, mut ctx: Ctx, v: Value) -> Option<PointerBase> {
        loop {
            if let Some(pb) = self.pb_local(prog, ctx, v) {
                return Some(pb);
            }
            if self.loop_of(ctx).is_none() {
                return None;
            }
            ctx = self.parent_of(ctx).unwrap();
        }
    }

    /// Rise into terminated peels when the value's natural scope lies in
    /// a nested loop that has been fully explored.
    pub fn pb_rising(
        &self,
        prog: &Program,
        ctx: Ctx,
        v: Value,
        scope: Option<Loop>,
    ) -> Option<PointerBase> {
        if scope == self.loop_of(ctx) {
            return self.pb_falling(prog, ctx, v);
        }
        let Some(scope_loop) = scope else {
            return self.pb_falling(prog, ctx, v);
        };
        let forest = prog.forest(self.func_of(ctx));
        if !forest.contains(self.loop_of(ctx), Some(scope_loop)) {
            return self.pb_falling(prog, ctx, v);
        }
        let child = forest.immediate_child(self.loop_of(ctx), scope_loop);
        let Some(peel) = self.peel_child(ctx, child) else {
            return self.pb_falling(prog, ctx, v);
        };
        if !self.only_exiting_last_iteration(prog, peel) {
            return self.pb_falling(prog, ctx, v);
        }
        let last = *self.peels[peel].iterations.last().unwrap();
        self.pb_rising(prog, last, v, scope)
    }

    /// The last iteration is final and no earlier iteration can leave the
    /// loop, so values below the loop are exactly the last iteration's.
    pub fn only_exiting_last_iteration(&self, prog: &Program, peel: Peel) -> bool {
        let data = &self.peels[peel];
        if data.status != IterStatus::Final || data.iterations.is_empty() {
            return false;
        }
        let func = self.ctxs[data.parent].func;
        let exits = prog.forest(func).exit_edges(&prog.module, func, data.the_loop);
        for (i, &iter) in data.iterations.iter().enumerate() {
            if i + 1 == data.iterations.len() {
                break;
            }
            for &(from, to) in &exits {
                if !self.edge_is_dead(iter, from, to) {
                    return false;
                }
            }
        }
        true
    }

    pub fn set_pb(&mut self, ctx: Ctx, v: Value, pb: PointerBase) {
        self.ctxs[ctx].pointer_bases.insert(v, pb);
    }

    pub fn erase_pb(&mut self, ctx: Ctx, v: Value) {
        self.ctxs[ctx].pointer_bases.remove(&v);
    }

    // ---- replacements ---------------------------------------------------

    /// The best known stand-in for `v` in `ctx`: the folded constant when
    /// the fact is a singleton scalar, otherwise `v` itself.
    pub fn replacement(&self, prog: &Program, mut ctx: Ctx, v: Value) -> ValueRef {
        match &prog.module.values[v].kind {
            ValueKind::Const(_) | ValueKind::Global(_) => return ValueRef::of_const(v),
            _ => {}
        }
        loop {
            if let Some(r) = self.ctxs[ctx].improved.get(&v) {
                return *r;
            }
            if self.loop_of(ctx).is_none() {
                return ValueRef::plain(v, ctx);
            }
            ctx = self.parent_of(ctx).unwrap();
        }
    }

    pub fn set_replacement(&mut self, ctx: Ctx, v: Value, r: ValueRef) {
        self.ctxs[ctx].improved.insert(v, r);
    }

    /// Constant stand-in, when the replacement is one.
    pub fn const_replacement<'p>(&self, prog: &'p Program, ctx: Ctx, v: Value) -> Option<&'p crate::ir::Const> {
        let r = self.replacement(prog, ctx, v);
        if r.qual != crate::value::RefQual::Plain {
            return None;
        }
        prog.module.as_const(r.value)
    }

    // ---- CFG liveness ---------------------------------------------------

    pub fn edge_is_dead(&self, mut ctx: Ctx, from: Block, to: Block) -> bool {
        loop {
            if self.ctxs[ctx].dead_edges.contains(&(from, to)) {
                return true;
            }
            if self.loop_of(ctx).is_none() {
                return false;
            }
            ctx = self.parent_of(ctx).unwrap();
        }
    }

    pub fn block_is_dead(&self, mut ctx: Ctx, b: Block) -> bool {
        loop {
            if self.ctxs[ctx].dead_blocks.contains(&b) {
                return true;
            }
            if self.loop_of(ctx).is_none() {
                return false;
            }
            ctx = self.parent_of(ctx).unwrap();
        }
    }

    pub fn block_is_certain(&self, ctx: Ctx, b: Block) -> bool {
        self.ctxs[ctx].certain_blocks.contains(&b)
    }

    pub fn set_edge_dead(&mut self, ctx: Ctx, from: Block, to: Block) -> bool {
        self.ctxs[ctx].dead_edges.insert((from, to))
    }

    pub fn set_block_dead(&mut self, ctx: Ctx, b: Block) -> bool {
        self.ctxs[ctx].dead_blocks.insert(b)
    }

    // ---- dependency bookkeeping ----------------------------------------

    pub fn add_mem_writer_effect(&mut self, writer_ctx: Ctx, writer: Value, load: Value, load_ctx: Ctx) {
        self.ctxs[writer_ctx]
            .mem_writer_effects
            .entry(writer)
            .or_default()
            .insert((load, load_ctx));
    }

    pub fn remove_mem_writer_effect(&mut self, writer_ctx: Ctx, writer: Value, load: Value, load_ctx: Ctx) {
        if let Some(set) = self.ctxs[writer_ctx].mem_writer_effects.get_mut(&writer) {
            set.remove(&(load, load_ctx));
        }
    }

    pub fn add_call_blocked_load(&mut self, call_ctx: Ctx, call: Value, load: Value, load_ctx: Ctx) {
        self.ctxs[call_ctx]
            .call_blocked_loads
            .entry(call)
            .or_default()
            .push((load, load_ctx));
    }

    pub fn add_cfg_dependent_load(&mut self, ctx: Ctx, load: Value, load_ctx: Ctx) {
        self.ctxs[ctx].cfg_dependent_loads.insert((load, load_ctx));
    }

    /// Drop the positive and negative caches for one load, unlinking the
    /// reverse edges its cache entry registered.
    pub fn zap_def_or_clobber_cache(&mut self, prog: &Program, ctx: Ctx, load: Value) {
        self.ctxs[ctx].failed_lfa_cache.remove(&load);
        let Some(entry) = self.ctxs[ctx].def_or_clobber_cache.remove(&load) else {
            return;
        };
        log::trace!("zap def-or-clobber cache for {} in {}", load, ctx);
        for vr in entry {
            let Some(dep_ctx) = vr.ctx else { continue };
            if let Some(Op::Store { .. } | Op::Memcpy { .. } | Op::Memset { .. }) =
                prog.module.inst_op(vr.value)
            {
                self.remove_mem_writer_effect(dep_ctx, vr.value, load, ctx);
            }
        }
    }

    /// A call became enterable (or its modref tightened): every load that
    /// stopped at it must be re-derived. Returns the loads to re-queue.
    pub fn dismiss_call_blocked_loads(&mut self, prog: &Program, ctx: Ctx, call: Value) -> Vec<(Value, Ctx)> {
        let Some(loads) = self.ctxs[ctx].call_blocked_loads.remove(&call) else {
            return Vec::new();
        };
        for &(load, load_ctx) in &loads {
            self.zap_def_or_clobber_cache(prog, load_ctx, load);
        }
        loads
    }

    /// The context's CFG view changed (an edge died, a peel terminated):
    /// all loads whose walks inspected it are stale. Returns the loads to
    /// re-queue.
    pub fn local_cfg_changed(&mut self, prog: &Program, ctx: Ctx) -> Vec<(Value, Ctx)> {
        let loads: Vec<(Value, Ctx)> = self.ctxs[ctx].cfg_dependent_loads.drain().collect();
        for &(load, load_ctx) in &loads {
            self.zap_def_or_clobber_cache(prog, load_ctx, load);
        }
        if !loads.is_empty() {
            log::debug!("CFG change in {} invalidates {} loads", ctx, loads.len());
        }
        loads
    }
}

/// Classify a constant for the lattice. Address arithmetic over a global
/// reduces to the global's own address value; function addresses are
/// scalars (they are not indexable objects), as are all non-pointers.
pub fn pb_of_const(prog: &Program, v: Value, c: &crate::ir::Const) -> PointerBase {
    match c {
        crate::ir::Const::GlobalAddr(g) | crate::ir::Const::GlobalOffset(g, _) => {
            let base = prog.module.global_value(*g);
            PointerBase::of(ValueRef::of_const(base), SetKind::Pointer)
        }
        crate::ir::Const::Null => PointerBase::of(ValueRef::of_const(v), SetKind::Pointer),
        _ => PointerBase::of(ValueRef::of_const(v), SetKind::Scalar),
    }
}
