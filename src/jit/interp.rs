use super::super::builtins::{self, Builtin};
use super::super::error::{Error, Result};
use super::super::ir::{ArithOp, BlockId, Body, CmpPred, Function, Inst, Module, Reg, Value};
use super::{Engine, ResourceTracker};
use std::collections::{HashMap, HashSet};

/// Frames are heap allocated, so this only stops runaway recursion.
const MAX_CALL_DEPTH: usize = 100_000;

#[derive(Debug, Clone, Copy)]
enum Definition {
    Builtin(Builtin),
    Compiled { unit: usize, index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    unit: usize,
    index: usize,
}

#[derive(Debug)]
struct Unit {
    module: Module,
    tracker: Option<u64>,
}

/// Engine that executes IR directly. Calls between units are resolved by name
/// through one session-wide symbol table, the way a JIT's dylib would.
#[derive(Debug)]
pub struct Interpreter {
    units: Vec<Option<Unit>>,
    symbols: HashMap<String, Definition>,
    next_tracker: u64,
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter {
            units: Vec::new(),
            symbols: builtins::BUILTINS
                .iter()
                .map(|&(name, builtin)| (name.to_owned(), Definition::Builtin(builtin)))
                .collect(),
            next_tracker: 0,
        }
    }
}

/// One activation of a compiled function.
struct Frame<'a> {
    func: &'a Function,
    body: &'a Body,
    args: Vec<f64>,
    slots: Vec<f64>,
    regs: Vec<f64>,
    block: BlockId,
    pc: usize,
    /// Caller register that receives the return value.
    result: Option<Reg>,
}

impl<'a> Frame<'a> {
    fn enter(func: &'a Function, args: Vec<f64>, result: Option<Reg>) -> Result<Frame<'a>> {
        let body = func
            .body
            .as_ref()
            .ok_or_else(|| Error::session(format!("'{}' has no body", func.name)))?;
        if args.len() != func.arity() {
            return Err(Error::session(format!(
                "'{}' called with {} arguments, expected {}",
                func.name,
                args.len(),
                func.arity()
            )));
        }
        Ok(Frame {
            func,
            body,
            args,
            slots: vec![0.0; body.slots.len()],
            regs: vec![0.0; body.regs.len()],
            block: body.entry(),
            pc: 0,
            result,
        })
    }

    fn operand(&self, v: &Value) -> f64 {
        match *v {
            Value::Const(c) => c,
            Value::Param(i) => self.args[i],
            Value::Reg(r) => self.regs[r.0],
        }
    }

    fn jump(&mut self, target: BlockId) {
        self.block = target;
        self.pc = 0;
    }
}

fn truth(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

impl Interpreter {
    pub fn new() -> Interpreter {
        Interpreter::default()
    }

    /// Whether a compiled (non-builtin) function called `name` is loaded.
    pub fn is_defined(&self, name: &str) -> bool {
        match self.symbols.get(name) {
            Some(Definition::Compiled { .. }) => true,
            _ => false,
        }
    }

    /// Number of compiled functions currently loaded.
    pub fn symbol_count(&self) -> usize {
        self.symbols
            .values()
            .filter(|d| match d {
                Definition::Compiled { .. } => true,
                _ => false,
            })
            .count()
    }

    pub fn unit_count(&self) -> usize {
        self.units.iter().filter(|u| u.is_some()).count()
    }

    /// Looks up `name` and calls it with `args`.
    pub fn run(&mut self, name: &str, args: &[f64]) -> Result<f64> {
        let symbol = self.lookup(name)?;
        let func = self.function(symbol.unit, symbol.index)?;
        self.execute(func, args)
    }

    fn function(&self, unit: usize, index: usize) -> Result<&Function> {
        self.units
            .get(unit)
            .and_then(Option::as_ref)
            .and_then(|u| u.module.functions().get(index))
            .ok_or_else(|| Error::session("stale symbol"))
    }

    fn arity_of(&self, def: Definition) -> Result<usize> {
        match def {
            Definition::Builtin(b) => Ok(b.arity()),
            Definition::Compiled { unit, index } => Ok(self.function(unit, index)?.arity()),
        }
    }

    /// Checks that every function called from `unit` resolves with a matching arity.
    fn link(&self, unit: usize) -> Result<()> {
        let module = match self.units.get(unit).and_then(Option::as_ref) {
            Some(u) => &u.module,
            None => return Err(Error::session("stale symbol")),
        };
        let callees: HashSet<&str> = module
            .functions()
            .iter()
            .filter_map(|f| f.body.as_ref())
            .flat_map(|b| b.blocks.iter())
            .flat_map(|b| b.insts.iter())
            .filter_map(|i| match i {
                Inst::Call(_, callee, _) => Some(callee.as_str()),
                _ => None,
            })
            .collect();
        for callee in callees {
            let def = *self
                .symbols
                .get(callee)
                .ok_or_else(|| Error::session(format!("unresolved external symbol '{}'", callee)))?;
            let declared = module.get_function(callee).map(Function::arity);
            let actual = self.arity_of(def)?;
            if declared.map_or(false, |n| n != actual) {
                return Err(Error::session(format!(
                    "symbol '{}' takes {} arguments but was declared with {}",
                    callee,
                    actual,
                    declared.unwrap_or_default()
                )));
            }
        }
        Ok(())
    }

    fn execute(&self, func: &Function, args: &[f64]) -> Result<f64> {
        let mut stack = vec![Frame::enter(func, args.to_vec(), None)?];
        loop {
            let frame = match stack.last_mut() {
                Some(frame) => frame,
                None => return Err(Error::session("call stack underflow")),
            };
            let body = frame.body;
            let inst = body.block(frame.block).insts.get(frame.pc).ok_or_else(|| {
                Error::session(format!("block without terminator in '{}'", frame.func.name))
            })?;
            frame.pc += 1;

            match inst {
                Inst::Load(r, s) => frame.regs[r.0] = frame.slots[s.0],
                Inst::Store(v, s) => {
                    let value = frame.operand(v);
                    frame.slots[s.0] = value;
                }
                Inst::Arith(r, op, l, rhs) => {
                    let (l, rhs) = (frame.operand(l), frame.operand(rhs));
                    frame.regs[r.0] = match op {
                        ArithOp::FAdd => l + rhs,
                        ArithOp::FSub => l - rhs,
                        ArithOp::FMul => l * rhs,
                    };
                }
                Inst::FCmp(r, pred, l, rhs) => {
                    let (l, rhs) = (frame.operand(l), frame.operand(rhs));
                    frame.regs[r.0] = truth(match pred {
                        CmpPred::Ult => !(l >= rhs),
                        CmpPred::One => l < rhs || l > rhs,
                    });
                }
                Inst::UIToFP(r, v) => {
                    let value = truth(frame.operand(v) != 0.0);
                    frame.regs[r.0] = value;
                }
                Inst::Call(r, callee, call_args) => {
                    let vals: Vec<f64> = call_args.iter().map(|a| frame.operand(a)).collect();
                    match self.symbols.get(callee.as_str()) {
                        Some(Definition::Builtin(b)) => {
                            frame.regs[r.0] = b.call(&vals).ok_or_else(|| {
                                Error::session(format!(
                                    "'{}' called with {} arguments",
                                    callee,
                                    vals.len()
                                ))
                            })?;
                        }
                        Some(&Definition::Compiled { unit, index }) => {
                            if stack.len() >= MAX_CALL_DEPTH {
                                return Err(Error::session(format!(
                                    "call depth limit of {} exceeded in '{}'",
                                    MAX_CALL_DEPTH, callee
                                )));
                            }
                            let next = Frame::enter(self.function(unit, index)?, vals, Some(*r))?;
                            stack.push(next);
                        }
                        None => {
                            return Err(Error::session(format!("unresolved symbol '{}'", callee)))
                        }
                    }
                }
                Inst::Br(target) => frame.jump(*target),
                Inst::CondBr(c, t, e) => {
                    let target = if frame.operand(c) != 0.0 { *t } else { *e };
                    frame.jump(target);
                }
                Inst::Ret(v) => {
                    let value = frame.operand(v);
                    let result = frame.result;
                    stack.pop();
                    match (stack.last_mut(), result) {
                        (Some(caller), Some(r)) => caller.regs[r.0] = value,
                        _ => return Ok(value),
                    }
                }
            }
        }
    }
}

impl Engine for Interpreter {
    type Symbol = Symbol;

    fn create_tracker(&mut self) -> ResourceTracker {
        self.next_tracker += 1;
        ResourceTracker::new(self.next_tracker)
    }

    fn add_module(&mut self, module: Module, tracker: Option<&ResourceTracker>) -> Result<()> {
        for f in module.functions().iter().filter(|f| !f.is_declaration()) {
            if self.is_defined(&f.name) {
                return Err(Error::session(format!(
                    "duplicate definition of symbol '{}'",
                    f.name
                )));
            }
        }
        let unit = self.units.len();
        for (index, f) in module.functions().iter().enumerate() {
            if !f.is_declaration() {
                self.symbols
                    .insert(f.name.clone(), Definition::Compiled { unit, index });
            }
        }
        self.units.push(Some(Unit {
            module,
            tracker: tracker.map(ResourceTracker::id),
        }));
        Ok(())
    }

    fn lookup(&mut self, name: &str) -> Result<Symbol> {
        match self.symbols.get(name) {
            Some(&Definition::Compiled { unit, index }) => {
                self.link(unit)?;
                Ok(Symbol { unit, index })
            }
            Some(Definition::Builtin(_)) => Err(Error::session(format!(
                "'{}' is a runtime builtin, not a compiled function",
                name
            ))),
            None => Err(Error::session(format!("symbol '{}' not found", name))),
        }
    }

    fn invoke(&mut self, symbol: &Symbol) -> Result<f64> {
        let func = self.function(symbol.unit, symbol.index)?;
        self.execute(func, &[])
    }

    fn remove(&mut self, tracker: ResourceTracker) -> Result<()> {
        let mut released = Vec::new();
        for (i, slot) in self.units.iter_mut().enumerate() {
            let owned = slot
                .as_ref()
                .map_or(false, |u| u.tracker == Some(tracker.id()));
            if owned {
                if let Some(unit) = slot.take() {
                    released.push((i, unit));
                }
            }
        }
        for (i, unit) in released {
            for f in unit.module.functions() {
                let points_here = match self.symbols.get(&f.name) {
                    Some(Definition::Compiled { unit, .. }) => *unit == i,
                    _ => false,
                };
                if points_here {
                    self.symbols.remove(&f.name);
                    if let Some(builtin) = builtins::lookup(&f.name) {
                        self.symbols
                            .insert(f.name.clone(), Definition::Builtin(builtin));
                    }
                }
            }
        }
        Ok(())
    }
}
