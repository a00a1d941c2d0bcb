//! End-to-end scenarios driving the public API: hypothesis in, facts
//! out, with inlining, peeling, partial stores and invalidation.

use speval::ir::{Block, Const, Op, Value};
use speval::{Analysis, IterStatus, SetKind, TargetLayout};

fn analyze_with(text: &str, entry: &str, args: Vec<Option<Const>>, target: TargetLayout) -> Analysis {
    let module = speval::parser::parse_module(text).unwrap();
    let entry = module.func_by_name(entry).unwrap();
    let mut analysis = Analysis::new(module, target, entry, args).unwrap();
    analysis.run();
    analysis
}

fn analyze(text: &str, entry: &str, args: Vec<Option<Const>>) -> Analysis {
    analyze_with(text, entry, args, TargetLayout::default())
}

/// First instruction in `func` (block order) matching the predicate.
fn find_inst(analysis: &Analysis, func: &str, pred: impl Fn(&Op) -> bool) -> Value {
    let f = analysis.prog.module.func_by_name(func).unwrap();
    for (_, block) in analysis.prog.module.functions[f].blocks.iter() {
        for &v in &block.insts {
            if let Some(op) = analysis.prog.module.inst_op(v) {
                if pred(op) {
                    return v;
                }
            }
        }
    }
    panic!("no matching instruction in @{}", func);
}

fn block_by_name(analysis: &Analysis, func: &str, name: &str) -> Block {
    let f = analysis.prog.module.func_by_name(func).unwrap();
    analysis.prog.module.functions[f]
        .blocks
        .iter()
        .find(|(_, d)| d.name == name)
        .map(|(b, _)| b)
        .unwrap()
}

#[test]
fn s1_constant_folds_through_inlined_call() {
    let analysis = analyze(
        r#"
        func @main() -> i32 {
        entry:
          %r = call @f(i32 41)
          ret %r
        }
        func @f(%x: i32) -> i32 {
        entry:
          %y = add %x, i32 1
          ret %y
        }
        "#,
        "main",
        vec![],
    );
    let call = find_inst(&analysis, "main", |op| matches!(op, Op::Call { .. }));
    let root = analysis.tree.root;
    assert_eq!(analysis.replacement(call, root), Some(Const::int(32, 42)));
}

#[test]
fn s2_pointer_base_through_gep_and_store_forwarding() {
    let analysis = analyze(
        r#"
        func @main() -> i32 {
        entry:
          %p = alloca [4 x i32]
          %q = gep i32, %p, i64 2
          store i32 7, %q
          %r = load i32, %q
          ret %r
        }
        "#,
        "main",
        vec![],
    );
    let root = analysis.tree.root;
    let alloca = find_inst(&analysis, "main", |op| matches!(op, Op::Alloca { .. }));
    let q = find_inst(&analysis, "main", |op| matches!(op, Op::Gep { .. }));
    let r = find_inst(&analysis, "main", |op| matches!(op, Op::Load { .. }));

    let q_pb = analysis.pointer_base(q, root);
    assert_eq!(q_pb.kind, SetKind::Pointer);
    let base = q_pb.is_singleton().unwrap();
    assert_eq!(base.value, alloca);
    assert_eq!(base.ctx, Some(root));

    assert_eq!(analysis.replacement(r, root), Some(Const::int(32, 7)));
}

const S3: &str = r#"
global @a : [4 x i32] = zero

func @main() -> i32 {
entry:
  br header
header:
  %i = phi i32, [ i32 0, entry ], [ %next, header ]
  %g = gep i32, @a, %i
  store %i, %g
  %next = add %i, i32 1
  %c = icmp slt %next, i32 3
  br %c, header, exit
exit:
  %p1 = gep i32, @a, i64 1
  %r = load i32, %p1
  ret %r
}
"#;

#[test]
fn s3_peel_reaches_final_iteration() {
    let mut analysis = analyze(S3, "main", vec![]);
    let root = analysis.tree.root;
    let main = analysis.prog.module.func_by_name("main").unwrap();
    let the_loop = analysis.prog.forest(main).loops.keys().next().unwrap();

    let peel = analysis.enable_peel(root, the_loop);
    assert_eq!(analysis.tree.peels[peel].status, IterStatus::Final);
    assert_eq!(analysis.tree.peels[peel].iterations.len(), 3);

    // Each iteration's store targets a distinct offset of the array.
    let g = find_inst(&analysis, "main", |op| matches!(op, Op::Gep { .. }));
    let a_global = analysis.prog.module.global_by_name("a").unwrap();
    let a_value = analysis.prog.module.global_value(a_global);
    let iters = analysis.tree.peels[peel].iterations.clone();
    for (k, iter) in iters.into_iter().enumerate() {
        let (base, off) =
            speval::alias::base_and_offset(&analysis.prog, &analysis.tree, iter, g).unwrap();
        assert_eq!(base.value, a_value);
        assert_eq!(off, 4 * k as i64);
    }

    // The load of a[1] after the loop resolves through the peel.
    let r = find_inst(&analysis, "main", |op| matches!(op, Op::Load { .. }));
    assert_eq!(analysis.replacement(r, root), Some(Const::int(32, 1)));
}

#[test]
fn s4_optimistic_admits_what_pessimistic_rejects() {
    let mut analysis = analyze(
        r#"
        func @main(%c: i1) -> ptr {
        entry:
          %p = alloca i32
          %u = call @opaque()
          %q = inttoptr ptr, %u
          br %c, left, right
        left:
          br join
        right:
          br join
        join:
          %m = phi ptr, [ %p, left ], [ %q, right ]
          ret %m
        }
        "#,
        "main",
        vec![None],
    );
    let root = analysis.tree.root;
    let alloca = find_inst(&analysis, "main", |op| matches!(op, Op::Alloca { .. }));
    let m = find_inst(&analysis, "main", |op| matches!(op, Op::Phi { .. }));

    analysis.tree.erase_pb(root, m);
    analysis.update_base_pointer(m, root, false);
    let optimistic = analysis.tree.ctxs[root].pointer_bases[&m].clone();
    assert!(!optimistic.overdef);
    assert_eq!(optimistic.kind, SetKind::Pointer);
    assert_eq!(optimistic.is_singleton().unwrap().value, alloca);

    analysis.update_base_pointer(m, root, true);
    let pessimistic = analysis.tree.ctxs[root].pointer_bases[&m].clone();
    assert!(pessimistic.overdef);
}

const S5: &str = r#"
func @main() -> i32 {
entry:
  %p = alloca i32
  store i32 5, %p
  call @helper(%p)
  %r = load i32, %p
  ret %r
}
func @helper(%q: ptr) {
entry:
  store i32 9, %q
  ret
}
"#;

#[test]
fn s5_unresolved_call_blocks_until_inlined() {
    let mut analysis = analyze(S5, "main", vec![]);
    let root = analysis.tree.root;
    let call = find_inst(&analysis, "main", |op| {
        matches!(op, Op::Call { callee: speval::ir::Callee::Direct(_), .. })
    });
    let r = find_inst(&analysis, "main", |op| matches!(op, Op::Load { .. }));

    // Blocked: the un-entered call may write the slot.
    assert!(analysis.pointer_base(r, root).overdef);
    let status = analysis.forward_status(r, root).unwrap();
    assert!(status.contains("Blocked by call helper"), "status was: {}", status);

    // Making the call explorable re-queues and refines the load.
    let child = analysis.enable_inline(root, call).unwrap();
    assert_eq!(analysis.replacement(r, root), Some(Const::int(32, 9)));

    // The refined fact depends on the callee's store now.
    let store9 = find_inst(&analysis, "helper", |op| matches!(op, Op::Store { .. }));
    let effects = &analysis.tree.ctxs[child].mem_writer_effects[&store9];
    assert!(effects.contains(&(r, root)));
}

const S6: &str = r#"
func @main() -> i32 {
entry:
  %p = alloca i16
  store i16 0x1234, %p
  %p1 = gep i8, %p, i64 1
  %r = load i8, %p1
  ret %r
}
"#;

#[test]
fn s6_partial_store_respects_byte_order() {
    let little = analyze(S6, "main", vec![]);
    let r = find_inst(&little, "main", |op| matches!(op, Op::Load { .. }));
    assert_eq!(little.replacement(r, little.tree.root), Some(Const::int(8, 0x12)));

    let big = analyze_with(S6, "main", vec![], TargetLayout::big_endian());
    let r = find_inst(&big, "main", |op| matches!(op, Op::Load { .. }));
    assert_eq!(big.replacement(r, big.tree.root), Some(Const::int(8, 0x34)));
}

#[test]
fn rerunning_the_solver_is_idempotent() {
    let mut analysis = analyze(S3, "main", vec![]);
    let root = analysis.tree.root;
    let before = analysis.tree.ctxs[root].pointer_bases.clone();
    analysis.run();
    let after = &analysis.tree.ctxs[root].pointer_bases;
    assert_eq!(before.len(), after.len());
    for (v, pb) in &before {
        assert_eq!(after.get(v), Some(pb), "fact for {} drifted across runs", v);
    }
}

#[test]
fn cached_and_uncached_forwarding_agree() {
    let mut analysis = analyze(
        r#"
        func @main() -> i32 {
        entry:
          %p = alloca [4 x i32]
          %q = gep i32, %p, i64 2
          store i32 7, %q
          %r = load i32, %q
          ret %r
        }
        "#,
        "main",
        vec![],
    );
    let root = analysis.tree.root;
    let r = find_inst(&analysis, "main", |op| matches!(op, Op::Load { .. }));
    let cached = analysis.pointer_base(r, root);

    analysis.tree.zap_def_or_clobber_cache(&analysis.prog, root, r);
    assert!(!analysis.tree.ctxs[root].def_or_clobber_cache.contains_key(&r));
    analysis.tree.erase_pb(root, r);
    analysis.update_base_pointer(r, root, false);
    analysis.update_base_pointer(r, root, true);

    assert_eq!(analysis.pointer_base(r, root), cached);
    // The fresh walk repopulated the cache and its reverse edges.
    let store = find_inst(&analysis, "main", |op| matches!(op, Op::Store { .. }));
    assert!(analysis.tree.ctxs[root].mem_writer_effects[&store].contains(&(r, root)));
}

#[test]
fn dead_edges_only_improve_facts() {
    let mut analysis = analyze(
        r#"
        func @main(%c: i1) -> i32 {
        entry:
          br %c, left, right
        left:
          br join
        right:
          br join
        join:
          %m = phi i32, [ i32 1, left ], [ i32 2, right ]
          ret %m
        }
        "#,
        "main",
        vec![None],
    );
    let root = analysis.tree.root;
    let m = find_inst(&analysis, "main", |op| matches!(op, Op::Phi { .. }));
    let before = analysis.pointer_base(m, root);
    assert_eq!(before.values.len(), 2);

    let right = block_by_name(&analysis, "main", "right");
    let join = block_by_name(&analysis, "main", "join");
    analysis.tree.set_edge_dead(root, right, join);
    analysis.tree.erase_pb(root, m);
    analysis.update_base_pointer(m, root, false);
    analysis.update_base_pointer(m, root, true);

    let after = analysis.pointer_base(m, root);
    assert!(after.no_worse_than(&before));
    assert_eq!(after.is_singleton().map(|_| ()), Some(()));
    assert_eq!(analysis.replacement(m, root), Some(Const::int(32, 1)));
}

#[test]
fn modelled_calls_do_not_clobber_unrelated_memory() {
    let analysis = analyze(
        r#"
        func @main() -> i32 {
        entry:
          %p = alloca i32
          store i32 3, %p
          %pid = call @getpid()
          %r = load i32, %p
          ret %r
        }
        "#,
        "main",
        vec![],
    );
    let root = analysis.tree.root;
    let r = find_inst(&analysis, "main", |op| matches!(op, Op::Load { .. }));
    assert_eq!(analysis.replacement(r, root), Some(Const::int(32, 3)));
}

#[test]
fn modelled_calls_clobber_their_written_buffers() {
    let analysis = analyze(
        r#"
        func @main(%fd: i32) -> i32 {
        entry:
          %p = alloca i32
          %buf = alloca [16 x i8]
          store i32 3, %p
          %n = call @read(%fd, %buf, i64 16)
          %r = load i32, %p
          %b = load i8, %buf
          ret %r
        }
        "#,
        "main",
        vec![None],
    );
    let root = analysis.tree.root;
    let r = find_inst(&analysis, "main", |op| matches!(op, Op::Load { .. }));
    // The read() model writes only its buffer: %p survives...
    assert_eq!(analysis.replacement(r, root), Some(Const::int(32, 3)));
    // ...while the buffer itself is clobbered.
    let f = analysis.prog.module.func_by_name("main").unwrap();
    let b = analysis.prog.module.functions[f]
        .blocks
        .iter()
        .flat_map(|(_, d)| d.insts.iter().copied())
        .filter(|&v| matches!(analysis.prog.module.inst_op(v), Some(Op::Load { .. })))
        .nth(1)
        .unwrap();
    assert!(analysis.pointer_base(b, root).overdef);
}

#[test]
fn global_initializer_defines_untouched_loads() {
    let analysis = analyze(
        r#"
        global @tab : [4 x i32] = [10, 20, 30, 40]

        func @main() -> i32 {
        entry:
          %p = gep i32, @tab, i64 2
          %r = load i32, %p
          ret %r
        }
        "#,
        "main",
        vec![],
    );
    let root = analysis.tree.root;
    let r = find_inst(&analysis, "main", |op| matches!(op, Op::Load { .. }));
    assert_eq!(analysis.replacement(r, root), Some(Const::int(32, 30)));
}

#[test]
fn hypothesis_arguments_flow_through() {
    let analysis = analyze(
        r#"
        func @main(%x: i32) -> i32 {
        entry:
          %d = mul %x, i32 1
          %y = add %x, i32 1
          ret %y
        }
        "#,
        "main",
        vec![Some(Const::int(32, 41))],
    );
    let root = analysis.tree.root;
    let y = find_inst(&analysis, "main", |op| {
        matches!(op, Op::Bin { op: speval::ir::BinOp::Add, .. })
    });
    assert_eq!(analysis.replacement(y, root), Some(Const::int(32, 42)));
}

#[test]
fn variadic_slots_map_to_call_site_operands() {
    let analysis = analyze(
        r#"
        func @main() -> i32 {
        entry:
          %r = call @first(i32 1, i32 20, i32 30)
          ret %r
        }
        func @first(%n: i32, ...) -> i32 {
        entry:
          ret %n
        }
        "#,
        "main",
        vec![],
    );
    let root = analysis.tree.root;
    let child = analysis
        .tree
        .ctxs
        .iter()
        .find(|(_, d)| matches!(d.kind, speval::state::CtxKind::Inline { .. }))
        .map(|(c, _)| c)
        .unwrap();
    let (slot0, ctx) = analysis.vararg_operand(child, speval::value::VaKind::Int, 0).unwrap();
    assert_eq!(ctx, root);
    assert_eq!(analysis.prog.module.as_const(slot0), Some(&Const::int(32, 20)));
    let (slot1, _) = analysis.vararg_operand(child, speval::value::VaKind::Int, 1).unwrap();
    assert_eq!(analysis.prog.module.as_const(slot1), Some(&Const::int(32, 30)));
    assert!(analysis.vararg_operand(child, speval::value::VaKind::BasePtr, 0).is_none());

    // The direct return of the first named parameter folds as usual.
    let call = find_inst(&analysis, "main", |op| matches!(op, Op::Call { .. }));
    assert_eq!(analysis.replacement(call, root), Some(Const::int(32, 1)));
}

#[test]
fn memset_fills_forwarded_bytes() {
    let analysis = analyze(
        r#"
        func @main() -> i32 {
        entry:
          %p = alloca [8 x i8]
          memset %p, i8 65, i64 8
          %q = gep i8, %p, i64 3
          %r = load i8, %q
          ret %r
        }
        "#,
        "main",
        vec![],
    );
    let root = analysis.tree.root;
    let r = find_inst(&analysis, "main", |op| matches!(op, Op::Load { .. }));
    assert_eq!(analysis.replacement(r, root), Some(Const::int(8, 65)));
}

#[test]
fn memcpy_translates_to_the_source_bytes() {
    let analysis = analyze(
        r#"
        global @src : [4 x i32] = [5, 6, 7, 8]

        func @main() -> i32 {
        entry:
          %dst = alloca [4 x i32]
          memcpy %dst, @src, i64 16
          %q = gep i32, %dst, i64 1
          %r = load i32, %q
          ret %r
        }
        "#,
        "main",
        vec![],
    );
    let root = analysis.tree.root;
    let r = find_inst(&analysis, "main", |op| matches!(op, Op::Load { .. }));
    assert_eq!(analysis.replacement(r, root), Some(Const::int(32, 6)));
}
