//! Loop discovery: dominators, natural loops, and the per-function loop
//! forest the context tree hangs peel attempts off.

use cranelift_entity::{entity_impl, PrimaryMap};
use fxhash::{FxHashMap, FxHashSet};

use crate::ir::{Block, Function, Module};

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Loop(u32);
entity_impl!(Loop, "loop");

#[derive(Clone, Debug)]
pub struct LoopData {
    pub header: Block,
    pub parent: Option<Loop>,
    pub blocks: FxHashSet<Block>,
    pub latches: Vec<Block>,
    pub depth: u32,
}

#[derive(Clone, Debug, Default)]
pub struct LoopForest {
    pub loops: PrimaryMap<Loop, LoopData>,
    innermost: FxHashMap<Block, Loop>,
}

impl LoopForest {
    pub fn compute(module: &Module, func: Function) -> LoopForest {
        let f = &module.functions[func];
        if f.blocks.is_empty() {
            return LoopForest::default();
        }
        let entry = f.entry;

        // Reverse postorder over reachable blocks.
        let rpo = reverse_postorder(module, func);
        let mut rpo_index: FxHashMap<Block, usize> = FxHashMap::default();
        for (i, &b) in rpo.iter().enumerate() {
            rpo_index.insert(b, i);
        }

        // Iterative dominator computation (intersection over RPO).
        let mut idom: FxHashMap<Block, Block> = FxHashMap::default();
        idom.insert(entry, entry);
        let mut changed = true;
        while changed {
            changed = false;
            for &b in rpo.iter().skip(1) {
                let mut new_idom: Option<Block> = None;
                for &p in &f.blocks[b].preds {
                    if !idom.contains_key(&p) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => intersect(cur, p, &idom, &rpo_index),
                    });
                }
                if let Some(ni) = new_idom {
                    if idom.get(&b) != Some(&ni) {
                        idom.insert(b, ni);
                        changed = true;
                    }
                }
            }
        }

        let dominates = |a: Block, mut b: Block| -> bool {
            loop {
                if a == b {
                    return true;
                }
                let Some(&next) = idom.get(&b) else { return false };
                if next == b {
                    return false;
                }
                b = next;
            }
        };

        // Natural loops from back edges; loops sharing a header merge.
        let mut by_header: FxHashMap<Block, (FxHashSet<Block>, Vec<Block>)> = FxHashMap::default();
        for &b in &rpo {
            for succ in module.successors(func, b) {
                if dominates(succ, b) {
                    let (blocks, latches) =
                        by_header.entry(succ).or_insert_with(|| (FxHashSet::default(), Vec::new()));
                    latches.push(b);
                    blocks.insert(succ);
                    // Walk backwards from the latch gathering the body.
                    let mut stack = vec![b];
                    while let Some(x) = stack.pop() {
                        if !blocks.insert(x) {
                            continue;
                        }
                        for &p in &f.blocks[x].preds {
                            if p != succ && rpo_index.contains_key(&p) {
                                stack.push(p);
                            }
                        }
                    }
                }
            }
        }

        let mut forest = LoopForest::default();
        // Headers in RPO order so outer loops get lower ids.
        let mut headers: Vec<Block> = by_header.keys().copied().collect();
        headers.sort_by_key(|h| rpo_index[h]);
        let mut by_header_id: FxHashMap<Block, Loop> = FxHashMap::default();
        for h in headers {
            let (blocks, latches) = by_header.remove(&h).unwrap();
            let id = forest.loops.push(LoopData {
                header: h,
                parent: None,
                blocks,
                latches,
                depth: 1,
            });
            by_header_id.insert(h, id);
        }

        // Nesting: the parent of L is the smallest other loop containing
        // L's header.
        let ids: Vec<Loop> = forest.loops.keys().collect();
        for &l in &ids {
            let header = forest.loops[l].header;
            let mut best: Option<Loop> = None;
            for &other in &ids {
                if other == l || !forest.loops[other].blocks.contains(&header) {
                    continue;
                }
                best = Some(match best {
                    None => other,
                    Some(cur) if forest.loops[other].blocks.len() < forest.loops[cur].blocks.len() => other,
                    Some(cur) => cur,
                });
            }
            forest.loops[l].parent = best;
        }
        for &l in &ids {
            let mut depth = 1;
            let mut cur = forest.loops[l].parent;
            while let Some(p) = cur {
                depth += 1;
                cur = forest.loops[p].parent;
            }
            forest.loops[l].depth = depth;
        }

        // Innermost loop per block.
        for &l in &ids {
            let blocks: Vec<Block> = forest.loops[l].blocks.iter().copied().collect();
            for b in blocks {
                match forest.innermost.get(&b) {
                    Some(&cur) if forest.loops[cur].depth >= forest.loops[l].depth => {}
                    _ => {
                        forest.innermost.insert(b, l);
                    }
                }
            }
        }

        log::trace!(
            "loop forest for {}: {} loops",
            module.functions[func].name,
            forest.loops.len()
        );
        forest
    }

    /// The innermost loop containing `b`, if any.
    pub fn loop_for(&self, b: Block) -> Option<Loop> {
        self.innermost.get(&b).copied()
    }

    pub fn header(&self, l: Loop) -> Block {
        self.loops[l].header
    }

    pub fn parent(&self, l: Loop) -> Option<Loop> {
        self.loops[l].parent
    }

    pub fn depth(&self, l: Option<Loop>) -> u32 {
        l.map(|l| self.loops[l].depth).unwrap_or(0)
    }

    /// Does loop `outer` (None = the whole function) contain loop `inner`?
    pub fn contains(&self, outer: Option<Loop>, inner: Option<Loop>) -> bool {
        let Some(outer) = outer else { return true };
        let mut cur = inner;
        while let Some(l) = cur {
            if l == outer {
                return true;
            }
            cur = self.loops[l].parent;
        }
        false
    }

    pub fn block_in_loop(&self, l: Loop, b: Block) -> bool {
        self.loops[l].blocks.contains(&b)
    }

    /// The child of `parent` on the nesting path down to `descendant`.
    pub fn immediate_child(&self, parent: Option<Loop>, descendant: Loop) -> Loop {
        let mut cur = descendant;
        while self.loops[cur].parent != parent {
            cur = self.loops[cur].parent.expect("descendant not nested under parent");
        }
        cur
    }

    /// Unique predecessor of the header from outside the loop.
    pub fn preheader(&self, module: &Module, func: Function, l: Loop) -> Option<Block> {
        let data = &self.loops[l];
        let mut outside = module.functions[func].blocks[data.header]
            .preds
            .iter()
            .copied()
            .filter(|b| !data.blocks.contains(b));
        match (outside.next(), outside.next()) {
            (Some(b), None) => Some(b),
            _ => None,
        }
    }

    /// Unique in-loop predecessor of the header.
    pub fn latch(&self, l: Loop) -> Option<Block> {
        match &self.loops[l].latches[..] {
            [b] => Some(*b),
            _ => None,
        }
    }

    /// Edges leaving the loop.
    pub fn exit_edges(&self, module: &Module, func: Function, l: Loop) -> Vec<(Block, Block)> {
        let data = &self.loops[l];
        let mut out = Vec::new();
        for &b in &data.blocks {
            for succ in module.successors(func, b) {
                if !data.blocks.contains(&succ) {
                    out.push((b, succ));
                }
            }
        }
        out.sort();
        out
    }
}

fn intersect(
    mut a: Block,
    mut b: Block,
    idom: &FxHashMap<Block, Block>,
    rpo_index: &FxHashMap<Block, usize>,
) -> Block {
    while a != b {
        while rpo_index[&a] > rpo_index[&b] {
            a = idom[&a];
        }
        while rpo_index[&b] > rpo_index[&a] {
            b = idom[&b];
        }
    }
    a
}

fn reverse_postorder(module: &Module, func: Function) -> Vec<Block> {
    let entry = module.functions[func].entry;
    let mut visited: FxHashSet<Block> = FxHashSet::default();
    let mut post: Vec<Block> = Vec::new();
    // Iterative DFS with an explicit "exit" marker.
    let mut stack: Vec<(Block, bool)> = vec![(entry, false)];
    while let Some((b, done)) = stack.pop() {
        if done {
            post.push(b);
            continue;
        }
        if !visited.insert(b) {
            continue;
        }
        stack.push((b, true));
        for succ in module.successors(func, b) {
            if !visited.contains(&succ) {
                stack.push((succ, false));
            }
        }
    }
    post.reverse();
    post
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Const, Op, Type};

    fn diamond_with_loop() -> (Module, Function, Block, Block) {
        // entry -> header; header -> body | exit; body -> header
        let mut m = Module::new();
        let f = m.add_function("f", &[Type::Int(32)], Type::Void);
        let entry = m.add_block(f, "entry");
        let header = m.add_block(f, "header");
        let body = m.add_block(f, "body");
        let exit = m.add_block(f, "exit");
        let x = m.functions[f].params[0];
        m.add_inst(f, entry, Type::Void, Op::Br { dest: header });
        let four = m.const_value(Const::int(32, 4));
        let c = m.add_inst(
            f,
            header,
            Type::Int(1),
            Op::Cmp { pred: crate::ir::CmpPred::Slt, lhs: x, rhs: four },
        );
        m.add_inst(f, header, Type::Void, Op::CondBr { cond: c, if_true: body, if_false: exit });
        m.add_inst(f, body, Type::Void, Op::Br { dest: header });
        m.add_inst(f, exit, Type::Void, Op::Ret { value: None });
        m.functions[f].entry = entry;
        m.seal_function(f);
        (m, f, header, body)
    }

    #[test]
    fn finds_single_loop() {
        let (m, f, header, body) = diamond_with_loop();
        let forest = LoopForest::compute(&m, f);
        assert_eq!(forest.loops.len(), 1);
        let l = forest.loop_for(header).unwrap();
        assert_eq!(forest.header(l), header);
        assert_eq!(forest.latch(l), Some(body));
        assert_eq!(forest.preheader(&m, f, l), Some(m.functions[f].entry));
        assert_eq!(forest.exit_edges(&m, f, l).len(), 1);
        assert!(forest.loop_for(m.functions[f].entry).is_none());
    }
}
