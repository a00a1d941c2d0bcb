//! Context-sensitive instruction walkers.
//!
//! Both walkers share their mechanics: a visited set keyed on
//! (context, block, position) and a worklist of positions, each carrying
//! a cloneable per-path payload. Subclasses hook `visit_inst` (and, for
//! the backward walker, whether to descend into an inlined call).
//!
//! Boundary rules at block edges:
//! - a peel iteration's header reaches the previous iteration through
//!   the latch, or the enclosing context through the preheader for
//!   iteration zero;
//! - an exit block of a terminated peel reaches into its final
//!   iteration;
//! - an inlined function's entry reaches the call site in the caller,
//!   and a call with a resolved body is traversed through the callee's
//!   live return blocks rather than stepped over;
//! - dead edges are never traversed and dead blocks never entered.

use std::collections::VecDeque;

use fxhash::FxHashSet;

use crate::ir::{Block, Op, Value};
use crate::state::{Ctx, CtxKind, IterStatus, Program, SpecTree};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkDecision {
    Continue,
    StopThisPath,
    StopWholeWalk,
}

pub trait BackwardVisitor {
    type Payload: Clone;

    /// Visit one instruction, walking backwards.
    fn visit_inst(
        &mut self,
        prog: &Program,
        tree: &SpecTree,
        v: Value,
        ctx: Ctx,
        payload: &mut Self::Payload,
    ) -> WalkDecision;

    /// Whether to walk through the body of a call with a resolved inline
    /// context (if not, the call is visited like any instruction).
    fn should_enter_call(&mut self, _prog: &Program, _tree: &SpecTree, _call: Value, _ctx: Ctx) -> bool {
        false
    }

    /// The path ran out of predecessors at the root scope's entry.
    fn hit_top(&mut self, prog: &Program, tree: &SpecTree, payload: &Self::Payload) -> WalkDecision;
}

struct PendingBW<P> {
    ctx: Ctx,
    block: Block,
    /// Number of leading instructions still to visit (scan `pos-1 .. 0`).
    pos: usize,
    payload: P,
}

/// Walk backwards from just before `start.0` in context `start.1`.
/// Returns `false` if the walk was aborted by `StopWholeWalk`.
pub fn walk_backward<V: BackwardVisitor>(
    prog: &Program,
    tree: &SpecTree,
    start: (Value, Ctx),
    visitor: &mut V,
    init: V::Payload,
) -> bool {
    let inst = prog.module.as_inst(start.0).expect("walk must start at an instruction");
    let start_block = inst.block;
    let start_pos = prog.module.functions[inst.func].blocks[start_block]
        .insts
        .iter()
        .position(|&i| i == start.0)
        .expect("instruction not in its block");

    let mut visited: FxHashSet<(Ctx, Block, usize)> = FxHashSet::default();
    let mut queue: VecDeque<PendingBW<V::Payload>> = VecDeque::new();
    visited.insert((start.1, start_block, start_pos));
    queue.push_back(PendingBW { ctx: start.1, block: start_block, pos: start_pos, payload: init });

    while let Some(item) = queue.pop_front() {
        let PendingBW { ctx, block, pos, mut payload } = item;
        let func = tree.func_of(ctx);
        let mut stopped = false;
        for i in (0..pos).rev() {
            let v = prog.module.functions[func].blocks[block].insts[i];
            if let Some(Op::Call { .. }) = prog.module.inst_op(v) {
                if tree.inline_child(ctx, v).is_some()
                    && visitor.should_enter_call(prog, tree, v, ctx)
                {
                    // Continue inside the callee; this path re-emerges at
                    // the call position via the callee's entry block.
                    enter_call_returns(prog, tree, v, ctx, &payload, &mut visited, &mut queue);
                    stopped = true;
                    break;
                }
            }
            match visitor.visit_inst(prog, tree, v, ctx, &mut payload) {
                WalkDecision::Continue => {}
                WalkDecision::StopThisPath => {
                    stopped = true;
                    break;
                }
                WalkDecision::StopWholeWalk => return false,
            }
        }
        if stopped {
            continue;
        }
        let decision =
            queue_predecessors_bw(prog, tree, ctx, block, &payload, &mut visited, &mut queue, visitor);
        if decision == WalkDecision::StopWholeWalk {
            return false;
        }
    }
    true
}

fn push_bw<P: Clone>(
    ctx: Ctx,
    block: Block,
    pos: usize,
    payload: &P,
    visited: &mut FxHashSet<(Ctx, Block, usize)>,
    queue: &mut VecDeque<PendingBW<P>>,
) {
    if visited.insert((ctx, block, pos)) {
        queue.push_back(PendingBW { ctx, block, pos, payload: payload.clone() });
    }
}

/// Queue the positions a backward path continues at after exhausting a
/// block, applying the context boundary rules.
fn queue_predecessors_bw<V: BackwardVisitor>(
    prog: &Program,
    tree: &SpecTree,
    ctx: Ctx,
    block: Block,
    payload: &V::Payload,
    visited: &mut FxHashSet<(Ctx, Block, usize)>,
    queue: &mut VecDeque<PendingBW<V::Payload>>,
    // Monomorphized per visitor only for `hit_top`.
    visitor: &mut V,
) -> WalkDecision {
    let func = tree.func_of(ctx);
    let forest = prog.forest(func);

    // A peel iteration's loop header: the preheader (iteration 0, in the
    // enclosing context) or the previous iteration's latch.
    if let CtxKind::PeelIter { attempt, index } = tree.ctxs[ctx].kind {
        let the_loop = tree.peels[attempt].the_loop;
        if forest.header(the_loop) == block {
            if index == 0 {
                let parent = tree.peels[attempt].parent;
                if let Some(ph) = forest.preheader(&prog.module, func, the_loop) {
                    if !tree.block_is_dead(parent, ph) {
                        let len = prog.module.functions[func].blocks[ph].insts.len();
                        push_bw(parent, ph, len, payload, visited, queue);
                    }
                }
            } else {
                let prev = tree.peels[attempt].iterations[index - 1];
                if let Some(latch) = forest.latch(the_loop) {
                    let len = prog.module.functions[func].blocks[latch].insts.len();
                    push_bw(prev, latch, len, payload, visited, queue);
                }
            }
            return WalkDecision::Continue;
        }
    }

    // A function's entry block: resume at the call site when inlined,
    // or report the top of the root scope.
    if prog.module.functions[func].entry == block {
        match tree.ctxs[tree.function_ctx(ctx)].kind {
            CtxKind::Inline { call, caller } => {
                let call_inst = prog.module.as_inst(call).unwrap();
                let call_pos = prog.module.functions[call_inst.func].blocks[call_inst.block]
                    .insts
                    .iter()
                    .position(|&i| i == call)
                    .unwrap();
                push_bw(caller, call_inst.block, call_pos, payload, visited, queue);
                return WalkDecision::Continue;
            }
            CtxKind::Root => {
                return visitor.hit_top(prog, tree, payload);
            }
            CtxKind::PeelIter { .. } => unreachable!("peel iteration at function level"),
        }
    }

    // Ordinary CFG predecessors, mapping exits of terminated peels into
    // their final iteration.
    let block_scope = forest.loop_for(block);
    let preds = prog.module.functions[func].blocks[block].preds.clone();
    for p in preds {
        if tree.edge_is_dead(ctx, p, block) || tree.block_is_dead(ctx, p) {
            continue;
        }
        let p_scope = forest.loop_for(p);
        // The edge is a loop exit when the predecessor's loop does not
        // contain this block.
        let exits_loop = p_scope.is_some() && !forest.contains(p_scope, block_scope);
        let target_ctx = if exits_loop && forest.contains(tree.loop_of(ctx), p_scope) {
            let child = forest.immediate_child(tree.loop_of(ctx), p_scope.unwrap());
            match tree.peel_child(ctx, child) {
                Some(peel) if tree.peels[peel].status == IterStatus::Final => {
                    *tree.peels[peel].iterations.last().unwrap()
                }
                _ => ctx,
            }
        } else {
            ctx
        };
        let len = prog.module.functions[func].blocks[p].insts.len();
        push_bw(target_ctx, p, len, payload, visited, queue);
    }
    WalkDecision::Continue
}

/// Queue the live return blocks of an inlined callee.
fn enter_call_returns<P: Clone>(
    prog: &Program,
    tree: &SpecTree,
    call: Value,
    ctx: Ctx,
    payload: &P,
    visited: &mut FxHashSet<(Ctx, Block, usize)>,
    queue: &mut VecDeque<PendingBW<P>>,
) {
    let child = tree.inline_child(ctx, call).expect("call has no inline context");
    let callee = tree.func_of(child);
    for (b, data) in prog.module.functions[callee].blocks.iter() {
        if tree.block_is_dead(child, b) {
            continue;
        }
        let term = *data.insts.last().expect("unterminated block");
        if let Some(Op::Ret { .. }) = prog.module.inst_op(term) {
            // Visit everything before the return.
            push_bw(child, b, data.insts.len() - 1, payload, visited, queue);
        }
    }
}

pub trait ForwardVisitor {
    type Payload: Clone;

    fn visit_inst(
        &mut self,
        prog: &Program,
        tree: &SpecTree,
        v: Value,
        ctx: Ctx,
        payload: &mut Self::Payload,
    ) -> WalkDecision;

    fn should_enter_call(&mut self, _prog: &Program, _tree: &SpecTree, _call: Value, _ctx: Ctx) -> bool {
        false
    }

    /// Whether loop boundaries switch context (into peel iterations and
    /// back out). Same-context walks (reachability) disable this and see
    /// the plain CFG.
    fn enter_nested_contexts(&self) -> bool {
        true
    }
}

struct PendingFW<P> {
    ctx: Ctx,
    block: Block,
    payload: P,
}

/// Walk forward from the top of `block` in `ctx`, visiting every
/// reachable instruction once, descending into resolved inline and peel
/// children at their boundaries.
pub fn walk_forward<V: ForwardVisitor>(
    prog: &Program,
    tree: &SpecTree,
    start_ctx: Ctx,
    start_block: Block,
    visitor: &mut V,
    init: V::Payload,
) -> bool {
    let mut visited: FxHashSet<(Ctx, Block, usize)> = FxHashSet::default();
    let mut queue: VecDeque<PendingFW<V::Payload>> = VecDeque::new();
    visited.insert((start_ctx, start_block, 0));
    queue.push_back(PendingFW { ctx: start_ctx, block: start_block, payload: init });

    while let Some(PendingFW { ctx, block, mut payload }) = queue.pop_front() {
        let func = tree.func_of(ctx);
        let insts = prog.module.functions[func].blocks[block].insts.clone();
        let mut stopped = false;
        for &v in &insts {
            if let Some(Op::Call { .. }) = prog.module.inst_op(v) {
                if tree.inline_child(ctx, v).is_some()
                    && visitor.should_enter_call(prog, tree, v, ctx)
                {
                    let child = tree.inline_child(ctx, v).unwrap();
                    let entry = prog.module.functions[tree.func_of(child)].entry;
                    push_fw(child, entry, &payload, &mut visited, &mut queue);
                    // The callee's return paths are this path's
                    // continuation; do not also step over the call.
                    stopped = true;
                    break;
                }
            }
            match visitor.visit_inst(prog, tree, v, ctx, &mut payload) {
                WalkDecision::Continue => {}
                WalkDecision::StopThisPath => {
                    stopped = true;
                    break;
                }
                WalkDecision::StopWholeWalk => return false,
            }
        }
        if stopped {
            continue;
        }
        let descend = visitor.enter_nested_contexts();
        queue_successors_fw(prog, tree, ctx, block, descend, &payload, &mut visited, &mut queue);
    }
    true
}

fn push_fw<P: Clone>(
    ctx: Ctx,
    block: Block,
    payload: &P,
    visited: &mut FxHashSet<(Ctx, Block, usize)>,
    queue: &mut VecDeque<PendingFW<P>>,
) {
    if visited.insert((ctx, block, 0)) {
        queue.push_back(PendingFW { ctx, block, payload: payload.clone() });
    }
}

#[allow(clippy::too_many_arguments)]
fn queue_successors_fw<P: Clone>(
    prog: &Program,
    tree: &SpecTree,
    ctx: Ctx,
    block: Block,
    descend: bool,
    payload: &P,
    visited: &mut FxHashSet<(Ctx, Block, usize)>,
    queue: &mut VecDeque<PendingFW<P>>,
) {
    let func = tree.func_of(ctx);
    let forest = prog.forest(func);

    for succ in prog.module.successors(func, block) {
        if tree.edge_is_dead(ctx, block, succ) || tree.block_is_dead(ctx, succ) {
            continue;
        }
        if descend {
            // A latch-to-header edge inside a peel iteration advances to
            // the next iteration, if it exists.
            if let CtxKind::PeelIter { attempt, index } = tree.ctxs[ctx].kind {
                let the_loop = tree.peels[attempt].the_loop;
                if succ == forest.header(the_loop) && forest.block_in_loop(the_loop, block) {
                    if let Some(&next) = tree.peels[attempt].iterations.get(index + 1) {
                        push_fw(next, succ, payload, visited, queue);
                    }
                    continue;
                }
                // An exit edge leaves to the enclosing context.
                if !forest.block_in_loop(the_loop, succ) {
                    push_fw(tree.peels[attempt].parent, succ, payload, visited, queue);
                    continue;
                }
            }
            // Entering a peeled loop's header descends into iteration
            // zero.
            if let Some(l) = forest.loop_for(succ) {
                if forest.header(l) == succ && !forest.contains(Some(l), forest.loop_for(block)) {
                    if let Some(peel) = tree.peel_child(ctx, l) {
                        if let Some(&first) = tree.peels[peel].iterations.first() {
                            push_fw(first, succ, payload, visited, queue);
                            continue;
                        }
                    }
                }
            }
        }
        push_fw(ctx, succ, payload, visited, queue);
    }
}
