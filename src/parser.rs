//! Textual IR front end.
//!
//! A small line-oriented syntax for writing analysis inputs by hand:
//!
//! ```text
//! global @tab : [4 x i32] = [1, 2, 3, 4]
//!
//! func @sum(%x: i32) -> i32 {
//! entry:
//!   %p = alloca i32
//!   store %x, %p
//!   %v = load i32, %p
//!   %r = add %v, i32 1
//!   ret %r
//! }
//! ```
//!
//! `;` starts a comment. Operands are `%value`, `@global-or-function`,
//! `null`, or a typed integer literal (`i32 7`). Forward references are
//! allowed for blocks everywhere and for values in phi operands.

use anyhow::{anyhow, bail, ensure, Context, Result};
use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::ir::{
    BinOp, Block, Callee, CastKind, CmpPred, Const, Function, Module, Op, Type, Value, ValueKind,
};

pub fn parse_module(text: &str) -> Result<Module> {
    let mut p = Parser::new(text);
    p.parse()?;
    Ok(p.module)
}

struct Parser<'a> {
    lines: Vec<(usize, &'a str)>,
    pos: usize,
    module: Module,
}

/// One line split into primitive tokens.
struct Cursor<'a> {
    toks: Vec<&'a str>,
    pos: usize,
    line_no: usize,
}

impl<'a> Cursor<'a> {
    fn new(line: &'a str, line_no: usize) -> Cursor<'a> {
        let mut toks = Vec::new();
        let mut rest = line;
        while let Some(ch) = rest.chars().next() {
            if ch.is_whitespace() {
                rest = &rest[ch.len_utf8()..];
            } else if ",:=()[]{}".contains(ch) {
                toks.push(&rest[..1]);
                rest = &rest[1..];
            } else {
                let end = rest
                    .find(|c: char| c.is_whitespace() || ",:=()[]{}".contains(c))
                    .unwrap_or(rest.len());
                toks.push(&rest[..end]);
                rest = &rest[end..];
            }
        }
        Cursor { toks, pos: 0, line_no }
    }

    fn peek(&self) -> Option<&'a str> {
        self.toks.get(self.pos).copied()
    }

    fn next(&mut self) -> Result<&'a str> {
        let t = self
            .peek()
            .ok_or_else(|| anyhow!("line {}: unexpected end of line", self.line_no))?;
        self.pos += 1;
        Ok(t)
    }

    fn eat(&mut self, tok: &str) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &str) -> Result<()> {
        let t = self.next()?;
        ensure!(t == tok, "line {}: expected `{}`, found `{}`", self.line_no, tok, t);
        Ok(())
    }

    fn done(&self) -> bool {
        self.pos >= self.toks.len()
    }
}

/// An operand that may not be resolvable yet (phi forward refs).
enum RawOperand {
    Value(Value),
    Forward(String),
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Parser<'a> {
        let lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| {
                let l = l.split(';').next().unwrap_or("").trim_end();
                (i + 1, l)
            })
            .filter(|(_, l)| !l.trim().is_empty())
            .collect();
        Parser { lines, pos: 0, module: Module::new() }
    }

    fn parse(&mut self) -> Result<()> {
        self.scan_declarations()?;
        while self.pos < self.lines.len() {
            let (line_no, line) = self.lines[self.pos];
            let mut cur = Cursor::new(line, line_no);
            match cur.peek() {
                Some("global") | Some("extern") => {
                    self.parse_global_body(&mut cur)?;
                    self.pos += 1;
                }
                Some("func") => self.parse_function()?,
                other => bail!("line {}: expected a declaration, found {:?}", line_no, other),
            }
        }
        Ok(())
    }

    /// First pass: register every function signature and global so
    /// bodies and initializers can reference them in any order.
    fn scan_declarations(&mut self) -> Result<()> {
        for idx in 0..self.lines.len() {
            let (line_no, line) = self.lines[idx];
            let mut cur = Cursor::new(line, line_no);
            match cur.peek() {
                Some("func") => {
                    cur.next()?;
                    let name = global_name(cur.next()?, line_no)?;
                    cur.expect("(")?;
                    let mut param_tys = Vec::new();
                    let mut variadic = false;
                    if !cur.eat(")") {
                        loop {
                            if cur.eat("...") {
                                variadic = true;
                                cur.expect(")")?;
                                break;
                            }
                            let t = cur.next()?;
                            ensure!(
                                t.starts_with('%'),
                                "line {}: expected parameter name, found `{}`",
                                line_no,
                                t
                            );
                            cur.expect(":")?;
                            param_tys.push(parse_type(&mut cur)?);
                            if cur.eat(")") {
                                break;
                            }
                            cur.expect(",")?;
                        }
                    }
                    let ret_ty = if cur.eat("->") { parse_type(&mut cur)? } else { Type::Void };
                    let f = self.module.add_function(&name, &param_tys, ret_ty);
                    self.module.functions[f].is_variadic = variadic;
                }
                Some("global") | Some("extern") => {
                    let external = cur.eat("extern");
                    cur.expect("global")?;
                    let name = global_name(cur.next()?, line_no)?;
                    cur.expect(":")?;
                    let ty = parse_type(&mut cur)?;
                    let _ = external;
                    self.module.add_global(&name, ty, None);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Second pass over a `global` line: attach the initializer.
    fn parse_global_body(&mut self, cur: &mut Cursor) -> Result<()> {
        let external = cur.eat("extern");
        cur.expect("global")?;
        let line_no = cur.line_no;
        let name = global_name(cur.next()?, line_no)?;
        cur.expect(":")?;
        let ty = parse_type(cur)?;
        let g = self.module.global_by_name(&name).unwrap();
        if external {
            ensure!(cur.done(), "line {}: extern global takes no initializer", line_no);
            return Ok(());
        }
        cur.expect("=")?;
        let init = self.parse_init(cur, &ty)?;
        self.module.globals[g].init = Some(init);
        Ok(())
    }

    fn parse_init(&mut self, cur: &mut Cursor, ty: &Type) -> Result<Const> {
        let line_no = cur.line_no;
        if cur.eat("zero") {
            return Ok(Const::Zero(ty.clone()));
        }
        if cur.eat("null") {
            ensure!(ty.is_pointer(), "line {}: null initializer for non-pointer", line_no);
            return Ok(Const::Null);
        }
        if let Some(tok) = cur.peek() {
            if tok.starts_with('@') {
                let name = global_name(cur.next()?, line_no)?;
                let base = self
                    .module
                    .global_by_name(&name)
                    .map(Const::GlobalAddr)
                    .or_else(|| self.module.func_by_name(&name).map(Const::FuncAddr))
                    .ok_or_else(|| anyhow!("line {}: unknown symbol @{}", line_no, name))?;
                if cur.eat("+") {
                    let off = parse_int(cur.next()?, line_no)?;
                    let Const::GlobalAddr(g) = base else {
                        bail!("line {}: offset from a function address", line_no);
                    };
                    return Ok(Const::GlobalOffset(g, off));
                }
                return Ok(base);
            }
        }
        match ty {
            Type::Int(bits) => {
                let v = parse_int(cur.next()?, line_no)?;
                Ok(Const::int(*bits, v))
            }
            Type::Array(elem, n) => {
                cur.expect("[")?;
                let mut elems = Vec::new();
                if !cur.eat("]") {
                    loop {
                        elems.push(self.parse_init(cur, elem)?);
                        if cur.eat("]") {
                            break;
                        }
                        cur.expect(",")?;
                    }
                }
                ensure!(
                    elems.len() as u64 == *n,
                    "line {}: initializer has {} elements, type wants {}",
                    line_no,
                    elems.len(),
                    n
                );
                Ok(Const::Array((**elem).clone(), elems))
            }
            Type::Struct(fields) => {
                cur.expect("{")?;
                let mut out = Vec::new();
                for (i, fty) in fields.iter().enumerate() {
                    if i != 0 {
                        cur.expect(",")?;
                    }
                    out.push(self.parse_init(cur, fty)?);
                }
                cur.expect("}")?;
                Ok(Const::Struct(out))
            }
            _ => bail!("line {}: cannot parse initializer for {:?}", line_no, ty),
        }
    }

    fn parse_function(&mut self) -> Result<()> {
        let (line_no, line) = self.lines[self.pos];
        let mut cur = Cursor::new(line, line_no);
        cur.expect("func")?;
        let name = global_name(cur.next()?, line_no)?;
        let func = self.module.func_by_name(&name).unwrap();

        // Bind parameter names.
        let mut values: FxHashMap<String, Value> = FxHashMap::default();
        cur.expect("(")?;
        let mut i = 0;
        if !cur.eat(")") {
            loop {
                if cur.eat("...") {
                    cur.expect(")")?;
                    break;
                }
                let pname = cur.next()?.trim_start_matches('%').to_string();
                values.insert(pname, self.module.functions[func].params[i]);
                i += 1;
                cur.expect(":")?;
                parse_type(&mut cur)?;
                if cur.eat(")") {
                    break;
                }
                cur.expect(",")?;
            }
        }
        if cur.eat("->") {
            parse_type(&mut cur)?;
        }
        cur.expect("{")?;
        self.pos += 1;

        let mut blocks: FxHashMap<String, Block> = FxHashMap::default();
        let mut fixups: Vec<(Value, usize, String)> = Vec::new();
        let mut block: Option<Block> = None;
        let mut first_block: Option<Block> = None;

        loop {
            ensure!(self.pos < self.lines.len(), "line {}: unterminated function", line_no);
            let (lno, line) = self.lines[self.pos];
            self.pos += 1;
            let trimmed = line.trim();
            if trimmed == "}" {
                break;
            }
            if let Some(label) = trimmed.strip_suffix(':') {
                ensure!(
                    !label.contains(char::is_whitespace),
                    "line {}: bad block label `{}`",
                    lno,
                    label
                );
                let b = get_or_create_block(&mut self.module, func, &mut blocks, label);
                block = Some(b);
                first_block.get_or_insert(b);
                continue;
            }
            let b = block.ok_or_else(|| anyhow!("line {}: instruction before any block", lno))?;
            let mut cur = Cursor::new(line, lno);
            self.parse_inst(&mut cur, func, b, &mut values, &mut blocks, &mut fixups)
                .with_context(|| format!("line {}: `{}`", lno, trimmed))?;
        }

        // Patch phi forward references.
        for (phi, index, name) in fixups {
            let v = *values
                .get(&name)
                .ok_or_else(|| anyhow!("undefined value %{} referenced from a phi", name))?;
            match &mut self.module.values[phi].kind {
                ValueKind::Inst(inst) => match &mut inst.op {
                    Op::Phi { incoming } => incoming[index].1 = v,
                    _ => unreachable!(),
                },
                _ => unreachable!(),
            }
        }

        let entry = first_block
            .ok_or_else(|| anyhow!("line {}: function @{} has no blocks", line_no, name))?;
        self.module.functions[func].entry = entry;
        self.module.seal_function(func);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn parse_inst(
        &mut self,
        cur: &mut Cursor,
        func: Function,
        block: Block,
        values: &mut FxHashMap<String, Value>,
        blocks: &mut FxHashMap<String, Block>,
        fixups: &mut Vec<(Value, usize, String)>,
    ) -> Result<()> {
        let line_no = cur.line_no;
        let first = cur.next()?;
        let (dest, op_tok) = if let Some(name) = first.strip_prefix('%') {
            cur.expect("=")?;
            (Some(name.to_string()), cur.next()?)
        } else {
            (None, first)
        };

        let (ty, op) = match op_tok {
            "alloca" => {
                let ty = parse_type(cur)?;
                (Type::Ptr, Op::Alloca { ty })
            }
            "load" => {
                let ty = parse_type(cur)?;
                cur.expect(",")?;
                let ptr = self.operand_strict(cur, values)?;
                (ty, Op::Load { ptr })
            }
            "store" => {
                let val = self.operand_strict(cur, values)?;
                cur.expect(",")?;
                let ptr = self.operand_strict(cur, values)?;
                (Type::Void, Op::Store { val, ptr })
            }
            "memcpy" | "memset" => {
                let a = self.operand_strict(cur, values)?;
                cur.expect(",")?;
                let b = self.operand_strict(cur, values)?;
                cur.expect(",")?;
                let len = self.operand_strict(cur, values)?;
                let op = if op_tok == "memcpy" {
                    Op::Memcpy { dst: a, src: b, len }
                } else {
                    Op::Memset { dst: a, byte: b, len }
                };
                (Type::Void, op)
            }
            "gep" => {
                let elem_ty = parse_type(cur)?;
                cur.expect(",")?;
                let base = self.operand_strict(cur, values)?;
                let mut indices = SmallVec::new();
                while cur.eat(",") {
                    indices.push(self.operand_strict(cur, values)?);
                }
                ensure!(!indices.is_empty(), "gep needs at least one index");
                (Type::Ptr, Op::Gep { elem_ty, base, indices })
            }
            "zext" | "sext" | "trunc" | "bitcast" | "inttoptr" | "ptrtoint" => {
                let kind = match op_tok {
                    "zext" => CastKind::ZExt,
                    "sext" => CastKind::SExt,
                    "trunc" => CastKind::Trunc,
                    "bitcast" => CastKind::BitCast,
                    "inttoptr" => CastKind::IntToPtr,
                    _ => CastKind::PtrToInt,
                };
                let ty = parse_type(cur)?;
                cur.expect(",")?;
                let arg = self.operand_strict(cur, values)?;
                (ty, Op::Cast { kind, arg })
            }
            "add" | "sub" | "mul" | "udiv" | "sdiv" | "urem" | "srem" | "and" | "or" | "xor"
            | "shl" | "lshr" | "ashr" => {
                let op = match op_tok {
                    "add" => BinOp::Add,
                    "sub" => BinOp::Sub,
                    "mul" => BinOp::Mul,
                    "udiv" => BinOp::UDiv,
                    "sdiv" => BinOp::SDiv,
                    "urem" => BinOp::URem,
                    "srem" => BinOp::SRem,
                    "and" => BinOp::And,
                    "or" => BinOp::Or,
                    "xor" => BinOp::Xor,
                    "shl" => BinOp::Shl,
                    "lshr" => BinOp::LShr,
                    _ => BinOp::AShr,
                };
                let lhs = self.operand_strict(cur, values)?;
                cur.expect(",")?;
                let rhs = self.operand_strict(cur, values)?;
                let ty = self.module.value_ty(lhs).clone();
                (ty, Op::Bin { op, lhs, rhs })
            }
            "icmp" => {
                let pred = match cur.next()? {
                    "eq" => CmpPred::Eq,
                    "ne" => CmpPred::Ne,
                    "ult" => CmpPred::Ult,
                    "ule" => CmpPred::Ule,
                    "ugt" => CmpPred::Ugt,
                    "uge" => CmpPred::Uge,
                    "slt" => CmpPred::Slt,
                    "sle" => CmpPred::Sle,
                    "sgt" => CmpPred::Sgt,
                    p => bail!("unknown icmp predicate `{}`", p),
                };
                let lhs = self.operand_strict(cur, values)?;
                cur.expect(",")?;
                let rhs = self.operand_strict(cur, values)?;
                (Type::Int(1), Op::Cmp { pred, lhs, rhs })
            }
            "select" => {
                let cond = self.operand_strict(cur, values)?;
                cur.expect(",")?;
                let if_true = self.operand_strict(cur, values)?;
                cur.expect(",")?;
                let if_false = self.operand_strict(cur, values)?;
                let ty = self.module.value_ty(if_true).clone();
                (ty, Op::Select { cond, if_true, if_false })
            }
            "phi" => {
                let ty = parse_type(cur)?;
                let mut incoming: SmallVec<[(Block, Value); 2]> = SmallVec::new();
                let mut pending: Vec<(usize, String)> = Vec::new();
                while cur.eat(",") || cur.peek() == Some("[") {
                    cur.expect("[")?;
                    let raw = self.parse_operand(cur, values)?;
                    cur.expect(",")?;
                    let label = cur.next()?;
                    cur.expect("]")?;
                    let b = get_or_create_block(&mut self.module, func, blocks, label);
                    match raw {
                        RawOperand::Value(v) => incoming.push((b, v)),
                        RawOperand::Forward(name) => {
                            pending.push((incoming.len(), name));
                            // Placeholder patched from the fixup list.
                            incoming.push((b, Value::from_u32(0)));
                        }
                    }
                }
                ensure!(!incoming.is_empty(), "phi needs at least one incoming");
                let v = self.module.add_inst(func, block, ty, Op::Phi { incoming });
                for (index, name) in pending {
                    fixups.push((v, index, name));
                }
                if let Some(name) = dest {
                    values.insert(name, v);
                }
                return Ok(());
            }
            "call" => {
                let target = cur.next()?;
                let name = global_name(target, line_no)?;
                let callee = match self.module.func_by_name(&name) {
                    Some(f) => Callee::Direct(f),
                    None => Callee::External(name),
                };
                cur.expect("(")?;
                let mut args = SmallVec::new();
                if !cur.eat(")") {
                    loop {
                        args.push(self.operand_strict(cur, values)?);
                        if cur.eat(")") {
                            break;
                        }
                        cur.expect(",")?;
                    }
                }
                let ty = match &callee {
                    Callee::Direct(f) => self.module.functions[*f].ret_ty.clone(),
                    Callee::External(_) if Module::is_alloc_callee(&callee) => Type::Ptr,
                    Callee::External(_) if dest.is_some() => Type::Int(32),
                    Callee::External(_) => Type::Void,
                };
                (ty, Op::Call { callee, args })
            }
            "br" => {
                if cur.peek().map(|t| t.starts_with('%')).unwrap_or(false) {
                    let cond = self.operand_strict(cur, values)?;
                    cur.expect(",")?;
                    let t = get_or_create_block(&mut self.module, func, blocks, cur.next()?);
                    cur.expect(",")?;
                    let f = get_or_create_block(&mut self.module, func, blocks, cur.next()?);
                    (Type::Void, Op::CondBr { cond, if_true: t, if_false: f })
                } else {
                    let dest = get_or_create_block(&mut self.module, func, blocks, cur.next()?);
                    (Type::Void, Op::Br { dest })
                }
            }
            "ret" => {
                let value = if cur.done() { None } else { Some(self.operand_strict(cur, values)?) };
                (Type::Void, Op::Ret { value })
            }
            "unreachable" => (Type::Void, Op::Unreachable),
            other => bail!("unknown instruction `{}`", other),
        };

        ensure!(cur.done(), "trailing tokens after instruction");
        let v = self.module.add_inst(func, block, ty, op);
        if let Some(name) = dest {
            values.insert(name, v);
        }
        Ok(())
    }

    /// An operand that must already be defined (everything except phi
    /// incomings).
    fn operand_strict(
        &mut self,
        cur: &mut Cursor,
        values: &FxHashMap<String, Value>,
    ) -> Result<Value> {
        let line_no = cur.line_no;
        match self.parse_operand(cur, values)? {
            RawOperand::Value(v) => Ok(v),
            RawOperand::Forward(name) => {
                bail!("line {}: %{} used before definition", line_no, name)
            }
        }
    }

    fn parse_operand(
        &mut self,
        cur: &mut Cursor,
        values: &FxHashMap<String, Value>,
    ) -> Result<RawOperand> {
        let line_no = cur.line_no;
        let tok = cur.next()?;
        if let Some(name) = tok.strip_prefix('%') {
            return Ok(match values.get(name) {
                Some(&v) => RawOperand::Value(v),
                None => RawOperand::Forward(name.to_string()),
            });
        }
        if tok.starts_with('@') {
            let name = global_name(tok, line_no)?;
            if let Some(g) = self.module.global_by_name(&name) {
                return Ok(RawOperand::Value(self.module.global_value(g)));
            }
            if let Some(f) = self.module.func_by_name(&name) {
                let v = self.module.const_value(Const::FuncAddr(f));
                return Ok(RawOperand::Value(v));
            }
            bail!("line {}: unknown symbol @{}", line_no, name);
        }
        if tok == "null" {
            return Ok(RawOperand::Value(self.module.const_value(Const::Null)));
        }
        if tok == "undef" {
            let ty = parse_type(cur)?;
            return Ok(RawOperand::Value(self.module.const_value(Const::Undef(ty))));
        }
        // A typed integer literal: `i32 7`.
        if let Some(bits) = int_type_bits(tok) {
            let v = parse_int(cur.next()?, line_no)?;
            return Ok(RawOperand::Value(self.module.int_const(bits, v)));
        }
        bail!("line {}: cannot parse operand `{}`", line_no, tok)
    }
}

fn get_or_create_block(
    module: &mut Module,
    func: Function,
    blocks: &mut FxHashMap<String, Block>,
    label: &str,
) -> Block {
    if let Some(&b) = blocks.get(label) {
        return b;
    }
    let b = module.add_block(func, label);
    blocks.insert(label.to_string(), b);
    b
}

fn global_name(tok: &str, line_no: usize) -> Result<String> {
    tok.strip_prefix('@')
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("line {}: expected @name, found `{}`", line_no, tok))
}

fn int_type_bits(tok: &str) -> Option<u32> {
    match tok {
        "i1" => Some(1),
        "i8" => Some(8),
        "i16" => Some(16),
        "i32" => Some(32),
        "i64" => Some(64),
        _ => None,
    }
}

fn parse_int(tok: &str, line_no: usize) -> Result<i64> {
    let (neg, body) = match tok.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, tok),
    };
    let value = if let Some(hex) = body.strip_prefix("0x") {
        i64::from_str_radix(hex, 16)
    } else {
        body.parse::<i64>()
    }
    .map_err(|_| anyhow!("line {}: bad integer `{}`", line_no, tok))?;
    Ok(if neg { -value } else { value })
}

fn parse_type(cur: &mut Cursor) -> Result<Type> {
    let line_no = cur.line_no;
    let tok = cur.next()?;
    if let Some(bits) = int_type_bits(tok) {
        return Ok(Type::Int(bits));
    }
    match tok {
        "ptr" => Ok(Type::Ptr),
        "void" => Ok(Type::Void),
        "[" => {
            let n = parse_int(cur.next()?, line_no)?;
            ensure!(n >= 0, "line {}: negative array length", line_no);
            let x = cur.next()?;
            ensure!(x == "x", "line {}: expected `x` in array type", line_no);
            let elem = parse_type(cur)?;
            cur.expect("]")?;
            Ok(Type::Array(Box::new(elem), n as u64))
        }
        "{" => {
            let mut fields = Vec::new();
            if !cur.eat("}") {
                loop {
                    fields.push(parse_type(cur)?);
                    if cur.eat("}") {
                        break;
                    }
                    cur.expect(",")?;
                }
            }
            Ok(Type::Struct(fields))
        }
        other => bail!("line {}: unknown type `{}`", line_no, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_function() {
        let m = parse_module(
            r#"
            func @sum(%x: i32) -> i32 {
            entry:
              %p = alloca i32
              store %x, %p
              %v = load i32, %p
              %r = add %v, i32 1
              ret %r
            }
            "#,
        )
        .unwrap();
        let f = m.func_by_name("sum").unwrap();
        assert_eq!(m.functions[f].blocks.len(), 1);
        assert_eq!(m.functions[f].blocks[m.functions[f].entry].insts.len(), 5);
    }

    #[test]
    fn parses_loop_with_phi_forward_ref() {
        let m = parse_module(
            r#"
            func @count() -> i32 {
            entry:
              br header
            header:
              %i = phi i32, [ i32 0, entry ], [ %next, header ]
              %next = add %i, i32 1
              %c = icmp slt %next, i32 3
              br %c, header, exit
            exit:
              ret %i
            }
            "#,
        )
        .unwrap();
        let f = m.func_by_name("count").unwrap();
        assert_eq!(m.functions[f].blocks.len(), 3);
    }

    #[test]
    fn parses_globals() {
        let m = parse_module(
            r#"
            global @tab : [4 x i32] = [1, 2, 3, 4]
            global @zeroed : [8 x i8] = zero
            extern global @ext : i32
            "#,
        )
        .unwrap();
        let tab = m.global_by_name("tab").unwrap();
        assert!(matches!(m.globals[tab].init, Some(Const::Array(..))));
        let ext = m.global_by_name("ext").unwrap();
        assert!(m.globals[ext].init.is_none());
    }

    #[test]
    fn rejects_unknown_value() {
        let err = parse_module(
            r#"
            func @f() -> i32 {
            entry:
              %r = add %missing, i32 1
              ret %r
            }
            "#,
        );
        assert!(err.is_err());
    }
}
