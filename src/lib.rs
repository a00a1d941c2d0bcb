//! Speculative, context-sensitive constant and pointer propagation for
//! a low-level SSA IR.
//!
//! The engine explores a program under a hypothesis — an entry function
//! invoked with concrete arguments, calls inlined into their sites,
//! loops peeled into explicit iterations — and computes, per IR value
//! and per context, the tightest lattice description of its runtime
//! value: a constant, a bounded set of candidate constants or symbolic
//! pointer bases, or overdefined.

pub mod alias;
pub mod eval;
pub mod forward;
pub mod ir;
pub mod loops;
pub mod parser;
pub mod state;
pub mod stats;
pub mod target;
pub mod value;
pub mod vfs;
pub mod walk;

pub use eval::Analysis;
pub use state::{Ctx, IterStatus, Program, SpecTree};
pub use target::TargetLayout;
pub use value::{PointerBase, SetKind, ValueRef, PB_MAX};
