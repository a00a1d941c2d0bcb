//! SSA intermediate representation: modules, functions, blocks, and
//! instructions-as-values.
//!
//! Values are module-wide entities so that analysis facts can be keyed on
//! a single id regardless of which function (or inlined copy of it) the
//! value lives in. Instructions, arguments, globals and constants all
//! occupy the same `Value` space; constants are interned.

use cranelift_entity::{entity_impl, PrimaryMap};
use fxhash::FxHashMap;
use smallvec::SmallVec;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Function(u32);
entity_impl!(Function, "fn");

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "bb");

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(u32);
entity_impl!(Value, "v");

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Global(u32);
entity_impl!(Global, "g");

/// IR types. Pointers are opaque; loads and GEPs carry the pointee type
/// they operate at.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    Void,
    /// Integer of the given bit width (1, 8, 16, 32 or 64).
    Int(u32),
    Ptr,
    Array(Box<Type>, u64),
    Struct(Vec<Type>),
}

impl Type {
    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Ptr)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn int_bits(&self) -> Option<u32> {
        match self {
            Type::Int(b) => Some(*b),
            _ => None,
        }
    }
}

/// A compile-time constant. `Int` stores its bits zero-extended.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Const {
    Int { bits: u32, value: u64 },
    Null,
    Undef(Type),
    /// Zero-initializer of the given type.
    Zero(Type),
    Array(Type, Vec<Const>),
    Struct(Vec<Const>),
    GlobalAddr(Global),
    /// Address of a global plus a byte offset (`&g[3]`, `&s.field`).
    GlobalOffset(Global, i64),
    FuncAddr(Function),
}

impl Const {
    pub fn int(bits: u32, value: i64) -> Const {
        let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
        Const::Int { bits, value: (value as u64) & mask }
    }

    pub fn ty(&self) -> Type {
        match self {
            Const::Int { bits, .. } => Type::Int(*bits),
            Const::Null | Const::GlobalAddr(_) | Const::GlobalOffset(..) | Const::FuncAddr(_) => {
                Type::Ptr
            }
            Const::Undef(ty) | Const::Zero(ty) => ty.clone(),
            Const::Array(elem, elems) => Type::Array(Box::new(elem.clone()), elems.len() as u64),
            Const::Struct(fields) => Type::Struct(fields.iter().map(|f| f.ty()).collect()),
        }
    }

    /// Unsigned bits of an integer constant, if it is one.
    pub fn as_int(&self) -> Option<(u32, u64)> {
        match self {
            &Const::Int { bits, value } => Some((bits, value)),
            Const::Zero(Type::Int(bits)) => Some((*bits, 0)),
            _ => None,
        }
    }

    /// Sign-extended value of an integer constant.
    pub fn as_i64(&self) -> Option<i64> {
        let (bits, value) = self.as_int()?;
        if bits >= 64 {
            Some(value as i64)
        } else {
            let shift = 64 - bits;
            Some(((value << shift) as i64) >> shift)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CastKind {
    BitCast,
    SExt,
    ZExt,
    Trunc,
    IntToPtr,
    PtrToInt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmpPred {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Callee {
    Direct(Function),
    External(String),
}

/// An instruction. The last instruction of every block is a terminator
/// (`Ret`, `Br`, `CondBr` or `Unreachable`).
#[derive(Clone, Debug)]
pub enum Op {
    Alloca { ty: Type },
    Load { ptr: Value },
    Store { val: Value, ptr: Value },
    Memcpy { dst: Value, src: Value, len: Value },
    Memset { dst: Value, byte: Value, len: Value },
    Gep { elem_ty: Type, base: Value, indices: SmallVec<[Value; 2]> },
    Cast { kind: CastKind, arg: Value },
    Bin { op: BinOp, lhs: Value, rhs: Value },
    Cmp { pred: CmpPred, lhs: Value, rhs: Value },
    Phi { incoming: SmallVec<[(Block, Value); 2]> },
    Select { cond: Value, if_true: Value, if_false: Value },
    Call { callee: Callee, args: SmallVec<[Value; 4]> },
    Ret { value: Option<Value> },
    Br { dest: Block },
    CondBr { cond: Value, if_true: Block, if_false: Block },
    Unreachable,
}

impl Op {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Op::Ret { .. } | Op::Br { .. } | Op::CondBr { .. } | Op::Unreachable)
    }

    pub fn visit_operands<F: FnMut(Value)>(&self, mut f: F) {
        match self {
            Op::Alloca { .. } | Op::Br { .. } | Op::Unreachable => {}
            Op::Load { ptr } => f(*ptr),
            Op::Store { val, ptr } => {
                f(*val);
                f(*ptr);
            }
            Op::Memcpy { dst, src, len } => {
                f(*dst);
                f(*src);
                f(*len);
            }
            Op::Memset { dst, byte, len } => {
                f(*dst);
                f(*byte);
                f(*len);
            }
            Op::Gep { base, indices, .. } => {
                f(*base);
                for &i in indices {
                    f(i);
                }
            }
            Op::Cast { arg, .. } => f(*arg),
            Op::Bin { lhs, rhs, .. } | Op::Cmp { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            Op::Phi { incoming } => {
                for &(_, v) in incoming {
                    f(v);
                }
            }
            Op::Select { cond, if_true, if_false } => {
                f(*cond);
                f(*if_true);
                f(*if_false);
            }
            Op::Call { args, .. } => {
                for &a in args {
                    f(a);
                }
            }
            Op::Ret { value } => {
                if let Some(v) = value {
                    f(*v);
                }
            }
            Op::CondBr { cond, .. } => f(*cond),
        }
    }

    pub fn successors(&self) -> SmallVec<[Block; 2]> {
        match self {
            Op::Br { dest } => smallvec::smallvec![*dest],
            Op::CondBr { if_true, if_false, .. } => smallvec::smallvec![*if_true, *if_false],
            _ => SmallVec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct InstData {
    pub func: Function,
    pub block: Block,
    pub op: Op,
}

#[derive(Clone, Debug)]
pub enum ValueKind {
    Inst(InstData),
    Arg { func: Function, index: u32 },
    Global(Global),
    Const(Const),
}

#[derive(Clone, Debug)]
pub struct ValueData {
    pub ty: Type,
    pub kind: ValueKind,
}

#[derive(Clone, Debug, Default)]
pub struct BlockData {
    pub name: String,
    /// Instructions in order; the last one is the terminator.
    pub insts: Vec<Value>,
    pub preds: Vec<Block>,
}

#[derive(Clone, Debug)]
pub struct FunctionData {
    pub name: String,
    pub params: Vec<Value>,
    pub ret_ty: Type,
    pub blocks: PrimaryMap<Block, BlockData>,
    pub entry: Block,
    pub is_variadic: bool,
}

#[derive(Clone, Debug)]
pub struct GlobalData {
    pub name: String,
    pub ty: Type,
    /// `None` for external declarations without a definitive initializer.
    pub init: Option<Const>,
}

#[derive(Default)]
pub struct Module {
    pub functions: PrimaryMap<Function, FunctionData>,
    pub globals: PrimaryMap<Global, GlobalData>,
    pub values: PrimaryMap<Value, ValueData>,
    const_cache: FxHashMap<Const, Value>,
    global_values: FxHashMap<Global, Value>,
    funcs_by_name: FxHashMap<String, Function>,
    globals_by_name: FxHashMap<String, Global>,
}

impl Module {
    pub fn new() -> Module {
        Module::default()
    }

    pub fn add_function(
        &mut self,
        name: &str,
        param_tys: &[Type],
        ret_ty: Type,
    ) -> Function {
        let func = self.functions.push(FunctionData {
            name: name.to_string(),
            params: Vec::new(),
            ret_ty,
            blocks: PrimaryMap::new(),
            entry: Block::from_u32(0),
            is_variadic: false,
        });
        for (i, ty) in param_tys.iter().enumerate() {
            let arg = self.values.push(ValueData {
                ty: ty.clone(),
                kind: ValueKind::Arg { func, index: i as u32 },
            });
            self.functions[func].params.push(arg);
        }
        self.funcs_by_name.insert(name.to_string(), func);
        func
    }

    pub fn add_global(&mut self, name: &str, ty: Type, init: Option<Const>) -> Global {
        let g = self.globals.push(GlobalData { name: name.to_string(), ty, init });
        self.globals_by_name.insert(name.to_string(), g);
        let v = self.values.push(ValueData { ty: Type::Ptr, kind: ValueKind::Global(g) });
        self.global_values.insert(g, v);
        g
    }

    pub fn func_by_name(&self, name: &str) -> Option<Function> {
        self.funcs_by_name.get(name).copied()
    }

    pub fn global_by_name(&self, name: &str) -> Option<Global> {
        self.globals_by_name.get(name).copied()
    }

    pub fn add_block(&mut self, func: Function, name: &str) -> Block {
        self.functions[func].blocks.push(BlockData {
            name: name.to_string(),
            insts: Vec::new(),
            preds: Vec::new(),
        })
    }

    /// Append an instruction producing a value of type `ty` to `block`.
    pub fn add_inst(&mut self, func: Function, block: Block, ty: Type, op: Op) -> Value {
        let v = self.values.push(ValueData {
            ty,
            kind: ValueKind::Inst(InstData { func, block, op }),
        });
        self.functions[func].blocks[block].insts.push(v);
        v
    }

    /// Interned constant value. A bare global address is normalized to
    /// the global's own value so facts about the two unify.
    pub fn const_value(&mut self, c: Const) -> Value {
        if let Const::GlobalAddr(g) = c {
            return self.global_value(g);
        }
        if let Some(&v) = self.const_cache.get(&c) {
            return v;
        }
        let ty = c.ty();
        let v = self.values.push(ValueData { ty, kind: ValueKind::Const(c.clone()) });
        self.const_cache.insert(c, v);
        v
    }

    pub fn int_const(&mut self, bits: u32, value: i64) -> Value {
        self.const_value(Const::int(bits, value))
    }

    /// The value standing for a global's address (created with the
    /// global itself).
    pub fn global_value(&self, g: Global) -> Value {
        self.global_values[&g]
    }

    pub fn value_ty(&self, v: Value) -> &Type {
        &self.values[v].ty
    }

    pub fn as_const(&self, v: Value) -> Option<&Const> {
        match &self.values[v].kind {
            ValueKind::Const(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_inst(&self, v: Value) -> Option<&InstData> {
        match &self.values[v].kind {
            ValueKind::Inst(i) => Some(i),
            _ => None,
        }
    }

    pub fn inst_op(&self, v: Value) -> Option<&Op> {
        self.as_inst(v).map(|i| &i.op)
    }

    pub fn terminator(&self, func: Function, block: Block) -> Value {
        *self.functions[func].blocks[block]
            .insts
            .last()
            .expect("block has no terminator")
    }

    pub fn successors(&self, func: Function, block: Block) -> SmallVec<[Block; 2]> {
        let term = self.terminator(func, block);
        match &self.values[term].kind {
            ValueKind::Inst(i) => i.op.successors(),
            _ => unreachable!("terminator is not an instruction"),
        }
    }

    /// Recompute predecessor lists from terminators. Call once after a
    /// function's body is complete.
    pub fn seal_function(&mut self, func: Function) {
        let blocks: Vec<Block> = self.functions[func].blocks.keys().collect();
        for &b in &blocks {
            self.functions[func].blocks[b].preds.clear();
        }
        for &b in &blocks {
            for succ in self.successors(func, b) {
                self.functions[func].blocks[succ].preds.push(b);
            }
        }
    }

    /// True if `call` is a known allocation function returning fresh,
    /// non-aliased memory.
    pub fn is_alloc_callee(callee: &Callee) -> bool {
        match callee {
            Callee::External(name) => name == "malloc" || name == "calloc",
            Callee::Direct(_) => false,
        }
    }

    /// Map from each value to the instructions that use it as an operand.
    pub fn compute_users(&self) -> FxHashMap<Value, Vec<Value>> {
        let mut users: FxHashMap<Value, Vec<Value>> = FxHashMap::default();
        for (v, data) in self.values.iter() {
            if let ValueKind::Inst(inst) = &data.kind {
                inst.op.visit_operands(|operand| {
                    users.entry(operand).or_default().push(v);
                });
            }
        }
        users
    }

    pub fn display_value(&self, v: Value) -> String {
        match &self.values[v].kind {
            ValueKind::Const(c) => format!("{:?}", c),
            ValueKind::Global(g) => format!("@{}", self.globals[*g].name),
            ValueKind::Arg { func, index } => {
                format!("{}.arg{}", self.functions[*func].name, index)
            }
            ValueKind::Inst(i) => {
                format!("{}:{}:{}", self.functions[i.func].name, self.functions[i.func].blocks[i.block].name, v)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_interning() {
        let mut m = Module::new();
        let a = m.int_const(32, 7);
        let b = m.int_const(32, 7);
        let c = m.int_const(64, 7);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn int_const_sign_semantics() {
        let c = Const::int(8, -1);
        assert_eq!(c.as_int(), Some((8, 0xff)));
        assert_eq!(c.as_i64(), Some(-1));
        let c = Const::int(32, -2);
        assert_eq!(c.as_i64(), Some(-2));
    }

    #[test]
    fn seal_computes_preds() {
        let mut m = Module::new();
        let f = m.add_function("f", &[], Type::Void);
        let e = m.add_block(f, "entry");
        let b1 = m.add_block(f, "left");
        let b2 = m.add_block(f, "join");
        let t = m.int_const(1, 1);
        m.add_inst(f, e, Type::Void, Op::CondBr { cond: t, if_true: b1, if_false: b2 });
        m.add_inst(f, b1, Type::Void, Op::Br { dest: b2 });
        m.add_inst(f, b2, Type::Void, Op::Ret { value: None });
        m.functions[f].entry = e;
        m.seal_function(f);
        assert_eq!(m.functions[f].blocks[b2].preds.len(), 2);
    }
}
