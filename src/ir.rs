//! Intermediate representation handed to the execution engine.
//!
//! Every value is a `double` except the `i1` results of comparisons. Locals are
//! entry-block stack slots accessed through `load`/`store`, so there are no phi
//! nodes: control-flow merges go through a slot as well.

use super::error::{Error, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg(pub usize);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Const(f64),
    Param(usize),
    Reg(Reg),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    Double,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    FAdd,
    FSub,
    FMul,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpPred {
    /// Unordered or less than.
    Ult,
    /// Ordered and not equal.
    One,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    Load(Reg, Slot),
    Store(Value, Slot),
    Arith(Reg, ArithOp, Value, Value),
    FCmp(Reg, CmpPred, Value, Value),
    UIToFP(Reg, Value),
    Call(Reg, String, Vec<Value>),
    Br(BlockId),
    CondBr(Value, BlockId, BlockId),
    Ret(Value),
}

impl Inst {
    pub fn is_terminator(&self) -> bool {
        match self {
            Inst::Br(_) | Inst::CondBr(..) | Inst::Ret(_) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub label: String,
    pub insts: Vec<Inst>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Body {
    /// Names of the entry-block slots.
    pub slots: Vec<String>,
    pub blocks: Vec<Block>,
    pub regs: Vec<Ty>,
}

impl Body {
    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    #[cfg(test)]
    pub fn stores_to(&self, slot: Slot) -> usize {
        self.blocks
            .iter()
            .flat_map(|b| b.insts.iter())
            .filter(|i| match i {
                Inst::Store(_, s) => *s == slot,
                _ => false,
            })
            .count()
    }

    #[cfg(test)]
    pub fn store_count(&self) -> usize {
        self.blocks
            .iter()
            .flat_map(|b| b.insts.iter())
            .filter(|i| match i {
                Inst::Store(..) => true,
                _ => false,
            })
            .count()
    }
}

/// A function of N doubles returning a double. Without a body it is a declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Option<Body>,
}

impl Function {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn is_declaration(&self) -> bool {
        self.body.is_none()
    }
}

/// One compilation unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    functions: Vec<Function>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Module {
        Module {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    pub fn get_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn get_function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    /// Adds an external declaration unless one with this name already exists.
    pub fn declare(&mut self, name: &str, params: &[String]) -> &mut Function {
        let index = match self.function_index(name) {
            Some(index) => index,
            None => {
                self.functions.push(Function {
                    name: name.to_owned(),
                    params: params.to_vec(),
                    body: None,
                });
                self.functions.len() - 1
            }
        };
        &mut self.functions[index]
    }

    pub fn remove_function(&mut self, name: &str) -> Option<Function> {
        self.function_index(name)
            .map(|index| self.functions.remove(index))
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Instruction builder for one function body.
#[derive(Debug, Default)]
pub struct FunctionBuilder {
    body: Body,
    current: usize,
}

impl FunctionBuilder {
    pub fn new() -> FunctionBuilder {
        FunctionBuilder::default()
    }

    pub fn append_block(&mut self, label: &str) -> BlockId {
        self.body.blocks.push(Block {
            label: label.to_owned(),
            insts: Vec::new(),
        });
        BlockId(self.body.blocks.len() - 1)
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        self.current = block.0;
    }

    /// Storage slot living for the whole function.
    pub fn alloca(&mut self, name: &str) -> Slot {
        self.body.slots.push(name.to_owned());
        Slot(self.body.slots.len() - 1)
    }

    fn new_reg(&mut self, ty: Ty) -> Reg {
        self.body.regs.push(ty);
        Reg(self.body.regs.len() - 1)
    }

    fn push(&mut self, inst: Inst) {
        self.body.blocks[self.current].insts.push(inst);
    }

    pub fn load(&mut self, slot: Slot) -> Value {
        let r = self.new_reg(Ty::Double);
        self.push(Inst::Load(r, slot));
        Value::Reg(r)
    }

    pub fn store(&mut self, value: Value, slot: Slot) {
        self.push(Inst::Store(value, slot));
    }

    pub fn arith(&mut self, op: ArithOp, lhs: Value, rhs: Value) -> Value {
        let r = self.new_reg(Ty::Double);
        self.push(Inst::Arith(r, op, lhs, rhs));
        Value::Reg(r)
    }

    pub fn fcmp(&mut self, pred: CmpPred, lhs: Value, rhs: Value) -> Value {
        let r = self.new_reg(Ty::Bool);
        self.push(Inst::FCmp(r, pred, lhs, rhs));
        Value::Reg(r)
    }

    pub fn ui_to_fp(&mut self, value: Value) -> Value {
        let r = self.new_reg(Ty::Double);
        self.push(Inst::UIToFP(r, value));
        Value::Reg(r)
    }

    pub fn call(&mut self, callee: &str, args: Vec<Value>) -> Value {
        let r = self.new_reg(Ty::Double);
        self.push(Inst::Call(r, callee.to_owned(), args));
        Value::Reg(r)
    }

    pub fn br(&mut self, target: BlockId) {
        self.push(Inst::Br(target));
    }

    pub fn cond_br(&mut self, cond: Value, then: BlockId, otherwise: BlockId) {
        self.push(Inst::CondBr(cond, then, otherwise));
    }

    pub fn ret(&mut self, value: Value) {
        self.push(Inst::Ret(value));
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn finish(self) -> Body {
        self.body
    }
}

fn verify_error(func: &str, msg: String) -> Error {
    Error::codegen(format!("invalid function '{}': {}", func, msg))
}

/// Structural consistency checks on a defined function within its unit.
pub fn verify_function(module: &Module, func: &Function) -> Result<()> {
    let body = match &func.body {
        Some(body) => body,
        None => return Ok(()),
    };
    let fail = |msg: String| verify_error(&func.name, msg);
    if body.blocks.is_empty() {
        return Err(fail("no entry block".to_owned()));
    }

    let check_value = |v: &Value, want: Ty| -> Result<()> {
        let ty = match *v {
            Value::Const(_) => Ty::Double,
            Value::Param(i) if i < func.params.len() => Ty::Double,
            Value::Param(i) => return Err(fail(format!("parameter {} out of range", i))),
            Value::Reg(Reg(r)) => match body.regs.get(r) {
                Some(ty) => *ty,
                None => return Err(fail(format!("undefined register %{}", r))),
            },
        };
        if ty != want {
            return Err(fail(format!("operand has type {:?}, expected {:?}", ty, want)));
        }
        Ok(())
    };
    let check_slot = |s: &Slot| -> Result<()> {
        if s.0 >= body.slots.len() {
            return Err(fail(format!("undefined slot {}", s.0)));
        }
        Ok(())
    };
    let check_block = |b: &BlockId| -> Result<()> {
        if b.0 >= body.blocks.len() {
            return Err(fail(format!("undefined block {}", b.0)));
        }
        Ok(())
    };

    for block in &body.blocks {
        match block.insts.last() {
            Some(last) if last.is_terminator() => {}
            _ => return Err(fail(format!("block '{}' lacks a terminator", block.label))),
        }
        let early = block.insts[..block.insts.len() - 1]
            .iter()
            .any(|i| i.is_terminator());
        if early {
            return Err(fail(format!(
                "terminator in the middle of block '{}'",
                block.label
            )));
        }
        for inst in &block.insts {
            match inst {
                Inst::Load(_, slot) => check_slot(slot)?,
                Inst::Store(v, slot) => {
                    check_value(v, Ty::Double)?;
                    check_slot(slot)?;
                }
                Inst::Arith(_, _, l, r) | Inst::FCmp(_, _, l, r) => {
                    check_value(l, Ty::Double)?;
                    check_value(r, Ty::Double)?;
                }
                Inst::UIToFP(_, v) => check_value(v, Ty::Bool)?,
                Inst::Call(_, callee, args) => {
                    let target = module
                        .get_function(callee)
                        .ok_or_else(|| fail(format!("call to undeclared function '{}'", callee)))?;
                    if target.arity() != args.len() {
                        return Err(fail(format!(
                            "call to '{}' with {} arguments, expected {}",
                            callee,
                            args.len(),
                            target.arity()
                        )));
                    }
                    for a in args {
                        check_value(a, Ty::Double)?;
                    }
                }
                Inst::Br(target) => check_block(target)?,
                Inst::CondBr(c, t, e) => {
                    check_value(c, Ty::Bool)?;
                    check_block(t)?;
                    check_block(e)?;
                }
                Inst::Ret(v) => check_value(v, Ty::Double)?,
            }
        }
    }
    Ok(())
}

fn symbol(name: &str) -> String {
    if name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        name.to_owned()
    } else {
        format!("\"{}\"", name)
    }
}

struct Operand<'a>(&'a Value, &'a Function);

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self.0 {
            Value::Const(c) => write!(f, "{:e}", c),
            Value::Param(i) => write!(f, "%{}", symbol(&self.1.params[i])),
            Value::Reg(Reg(r)) => write!(f, "%{}", r),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|p| format!("double %{}", symbol(p)))
            .collect::<Vec<_>>()
            .join(", ");
        let body = match &self.body {
            Some(body) => body,
            None => return writeln!(f, "declare double @{}({})", symbol(&self.name), params),
        };
        writeln!(f, "define double @{}({}) {{", symbol(&self.name), params)?;
        let slot = |s: &Slot| format!("%{}.{}", symbol(&body.slots[s.0]), s.0);
        let label = |b: &BlockId| format!("%{}{}", body.blocks[b.0].label, b.0);
        for (i, block) in body.blocks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}{}:", block.label, i)?;
            if i == 0 {
                for s in 0..body.slots.len() {
                    writeln!(f, "  {} = alloca double", slot(&Slot(s)))?;
                }
            }
            for inst in &block.insts {
                match inst {
                    Inst::Load(r, s) => writeln!(f, "  %{} = load double, double* {}", r.0, slot(s))?,
                    Inst::Store(v, s) => writeln!(
                        f,
                        "  store double {}, double* {}",
                        Operand(v, self),
                        slot(s)
                    )?,
                    Inst::Arith(r, op, l, rhs) => {
                        let name = match op {
                            ArithOp::FAdd => "fadd",
                            ArithOp::FSub => "fsub",
                            ArithOp::FMul => "fmul",
                        };
                        writeln!(
                            f,
                            "  %{} = {} double {}, {}",
                            r.0,
                            name,
                            Operand(l, self),
                            Operand(rhs, self)
                        )?
                    }
                    Inst::FCmp(r, pred, l, rhs) => {
                        let pred = match pred {
                            CmpPred::Ult => "ult",
                            CmpPred::One => "one",
                        };
                        writeln!(
                            f,
                            "  %{} = fcmp {} double {}, {}",
                            r.0,
                            pred,
                            Operand(l, self),
                            Operand(rhs, self)
                        )?
                    }
                    Inst::UIToFP(r, v) => writeln!(
                        f,
                        "  %{} = uitofp i1 {} to double",
                        r.0,
                        Operand(v, self)
                    )?,
                    Inst::Call(r, callee, args) => {
                        let args = args
                            .iter()
                            .map(|a| format!("double {}", Operand(a, self)))
                            .collect::<Vec<_>>()
                            .join(", ");
                        writeln!(f, "  %{} = call double @{}({})", r.0, symbol(callee), args)?
                    }
                    Inst::Br(b) => writeln!(f, "  br label {}", label(b))?,
                    Inst::CondBr(c, t, e) => writeln!(
                        f,
                        "  br i1 {}, label {}, label {}",
                        Operand(c, self),
                        label(t),
                        label(e)
                    )?,
                    Inst::Ret(v) => writeln!(f, "  ret double {}", Operand(v, self))?,
                }
            }
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        for func in &self.functions {
            writeln!(f)?;
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}
