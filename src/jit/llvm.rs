//! Native code through LLVM's MCJIT. Built with the `llvm` feature.

use super::super::builtins;
use super::super::error::{Error, Result};
use super::super::ir::{self, ArithOp, CmpPred, Inst, Module, Value};
use super::{Engine, ResourceTracker};

use llvm_sys::execution_engine::{self, LLVMExecutionEngineRef, LLVMMCJITCompilerOptions};
use llvm_sys::prelude::*;
use llvm_sys::{core, support, target, LLVMRealPredicate};

use libc::c_char;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::mem;
use std::ptr::null_mut;

const TMP: *const c_char = b"tmp\0".as_ptr() as *const _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol(u64);

struct Unit {
    module: LLVMModuleRef,
    tracker: Option<u64>,
    defines: Vec<String>,
    /// Callee name and the arity this unit declared for it.
    calls: Vec<(String, usize)>,
}

pub struct LlvmEngine {
    context: LLVMContextRef,
    engine: LLVMExecutionEngineRef,
    units: Vec<Unit>,
    /// Arity of every resolvable symbol, builtins included.
    symbols: HashMap<String, usize>,
    next_tracker: u64,
}

fn cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| Error::session(format!("symbol '{}' contains a NUL byte", s)))
}

/// Takes ownership of an LLVM-allocated message.
unsafe fn take_message(msg: *mut c_char) -> String {
    if msg.is_null() {
        return "unknown LLVM error".to_owned();
    }
    let s = CStr::from_ptr(msg).to_string_lossy().into_owned();
    core::LLVMDisposeMessage(msg);
    s
}

impl LlvmEngine {
    pub fn new() -> Result<LlvmEngine> {
        unsafe {
            execution_engine::LLVMLinkInMCJIT();
            if target::LLVM_InitializeNativeTarget() != 0
                || target::LLVM_InitializeNativeAsmPrinter() != 0
            {
                return Err(Error::session("failed to initialize the native target"));
            }

            let mut symbols = HashMap::new();
            for &(name, builtin) in builtins::BUILTINS {
                let cname = cstring(name)?;
                support::LLVMAddSymbol(cname.as_ptr(), builtin.address() as *mut _);
                symbols.insert(name.to_owned(), builtin.arity());
            }

            let context = core::LLVMContextCreate();
            let root = core::LLVMModuleCreateWithNameInContext(
                b"kscope\0".as_ptr() as *const _,
                context,
            );
            let mut options: LLVMMCJITCompilerOptions = mem::zeroed();
            let size = mem::size_of::<LLVMMCJITCompilerOptions>();
            execution_engine::LLVMInitializeMCJITCompilerOptions(&mut options, size);
            let mut engine = null_mut();
            let mut err = null_mut();
            if execution_engine::LLVMCreateMCJITCompilerForModule(
                &mut engine,
                root,
                &mut options,
                size,
                &mut err,
            ) != 0
            {
                core::LLVMContextDispose(context);
                return Err(Error::session(take_message(err)));
            }

            Ok(LlvmEngine {
                context,
                engine,
                units: Vec::new(),
                symbols,
                next_tracker: 0,
            })
        }
    }

    unsafe fn lower(&self, module: &Module) -> Result<LLVMModuleRef> {
        let name = cstring(&module.name)?;
        let m = core::LLVMModuleCreateWithNameInContext(name.as_ptr(), self.context);
        let double = core::LLVMDoubleTypeInContext(self.context);

        let mut funcs = HashMap::new();
        for f in module.functions() {
            let mut params = vec![double; f.arity()];
            let fn_ty = core::LLVMFunctionType(double, params.as_mut_ptr(), params.len() as u32, 0);
            let cname = cstring(&f.name)?;
            funcs.insert(f.name.as_str(), core::LLVMAddFunction(m, cname.as_ptr(), fn_ty));
        }

        let builder = core::LLVMCreateBuilderInContext(self.context);
        let mut result = Ok(());
        for f in module.functions() {
            if let Some(body) = &f.body {
                result = self.lower_body(builder, double, &funcs, funcs[f.name.as_str()], body);
                if result.is_err() {
                    break;
                }
            }
        }
        core::LLVMDisposeBuilder(builder);
        match result {
            Ok(()) => Ok(m),
            Err(e) => {
                core::LLVMDisposeModule(m);
                Err(e)
            }
        }
    }

    unsafe fn lower_body(
        &self,
        builder: LLVMBuilderRef,
        double: LLVMTypeRef,
        funcs: &HashMap<&str, LLVMValueRef>,
        function: LLVMValueRef,
        body: &ir::Body,
    ) -> Result<()> {
        let mut blocks = Vec::with_capacity(body.blocks.len());
        for block in &body.blocks {
            let label = cstring(&block.label)?;
            blocks.push(core::LLVMAppendBasicBlockInContext(
                self.context,
                function,
                label.as_ptr(),
            ));
        }

        core::LLVMPositionBuilderAtEnd(builder, blocks[body.entry().0]);
        let mut slots = Vec::with_capacity(body.slots.len());
        for name in &body.slots {
            let cname = cstring(name)?;
            slots.push(core::LLVMBuildAlloca(builder, double, cname.as_ptr()));
        }

        let mut regs: Vec<Option<LLVMValueRef>> = vec![None; body.regs.len()];
        for (i, block) in body.blocks.iter().enumerate() {
            core::LLVMPositionBuilderAtEnd(builder, blocks[i]);
            for inst in &block.insts {
                let operand = |v: &Value| -> Result<LLVMValueRef> {
                    match *v {
                        Value::Const(c) => Ok(core::LLVMConstReal(double, c)),
                        Value::Param(p) => Ok(core::LLVMGetParam(function, p as u32)),
                        Value::Reg(r) => regs[r.0]
                            .ok_or_else(|| Error::session(format!("%{} used before definition", r.0))),
                    }
                };
                let defined = match inst {
                    Inst::Load(r, s) => Some((*r, core::LLVMBuildLoad(builder, slots[s.0], TMP))),
                    Inst::Store(v, s) => {
                        core::LLVMBuildStore(builder, operand(v)?, slots[s.0]);
                        None
                    }
                    Inst::Arith(r, op, l, rhs) => {
                        let (l, rhs) = (operand(l)?, operand(rhs)?);
                        let v = match op {
                            ArithOp::FAdd => core::LLVMBuildFAdd(builder, l, rhs, TMP),
                            ArithOp::FSub => core::LLVMBuildFSub(builder, l, rhs, TMP),
                            ArithOp::FMul => core::LLVMBuildFMul(builder, l, rhs, TMP),
                        };
                        Some((*r, v))
                    }
                    Inst::FCmp(r, pred, l, rhs) => {
                        let pred = match pred {
                            CmpPred::Ult => LLVMRealPredicate::LLVMRealULT,
                            CmpPred::One => LLVMRealPredicate::LLVMRealONE,
                        };
                        let (l, rhs) = (operand(l)?, operand(rhs)?);
                        Some((*r, core::LLVMBuildFCmp(builder, pred, l, rhs, TMP)))
                    }
                    Inst::UIToFP(r, v) => {
                        let v = operand(v)?;
                        Some((*r, core::LLVMBuildUIToFP(builder, v, double, TMP)))
                    }
                    Inst::Call(r, callee, args) => {
                        let callee = *funcs
                            .get(callee.as_str())
                            .ok_or_else(|| Error::session(format!("undeclared callee '{}'", callee)))?;
                        let mut args = args.iter().map(|a| operand(a)).collect::<Result<Vec<_>>>()?;
                        let v = core::LLVMBuildCall(
                            builder,
                            callee,
                            args.as_mut_ptr(),
                            args.len() as u32,
                            TMP,
                        );
                        Some((*r, v))
                    }
                    Inst::Br(target) => {
                        core::LLVMBuildBr(builder, blocks[target.0]);
                        None
                    }
                    Inst::CondBr(c, t, e) => {
                        core::LLVMBuildCondBr(builder, operand(c)?, blocks[t.0], blocks[e.0]);
                        None
                    }
                    Inst::Ret(v) => {
                        core::LLVMBuildRet(builder, operand(v)?);
                        None
                    }
                };
                if let Some((r, v)) = defined {
                    regs[r.0] = Some(v);
                }
            }
        }
        Ok(())
    }

    fn link(&self, unit: &Unit) -> Result<()> {
        for (callee, declared) in &unit.calls {
            match self.symbols.get(callee) {
                Some(arity) if arity == declared => {}
                Some(arity) => {
                    return Err(Error::session(format!(
                        "symbol '{}' takes {} arguments but was declared with {}",
                        callee, arity, declared
                    )))
                }
                None => {
                    return Err(Error::session(format!(
                        "unresolved external symbol '{}'",
                        callee
                    )))
                }
            }
        }
        Ok(())
    }
}

impl Drop for LlvmEngine {
    fn drop(&mut self) {
        unsafe {
            // the engine owns every module still added to it
            execution_engine::LLVMDisposeExecutionEngine(self.engine);
            core::LLVMContextDispose(self.context);
        }
    }
}

impl Engine for LlvmEngine {
    type Symbol = Symbol;

    fn create_tracker(&mut self) -> ResourceTracker {
        self.next_tracker += 1;
        ResourceTracker::new(self.next_tracker)
    }

    fn add_module(&mut self, module: Module, tracker: Option<&ResourceTracker>) -> Result<()> {
        let defines: Vec<String> = module
            .functions()
            .iter()
            .filter(|f| !f.is_declaration())
            .map(|f| f.name.clone())
            .collect();
        if let Some(dup) = defines
            .iter()
            .find(|name| self.symbols.contains_key(*name) && builtins::lookup(name).is_none())
        {
            return Err(Error::session(format!("duplicate definition of symbol '{}'", dup)));
        }
        let mut calls = Vec::new();
        for f in module.functions() {
            for inst in f.body.iter().flat_map(|b| b.blocks.iter()).flat_map(|b| b.insts.iter()) {
                if let Inst::Call(_, callee, args) = inst {
                    calls.push((callee.clone(), args.len()));
                }
            }
        }

        let lowered = unsafe { self.lower(&module)? };
        unsafe { execution_engine::LLVMAddModule(self.engine, lowered) };
        for f in module.functions().iter().filter(|f| !f.is_declaration()) {
            self.symbols.insert(f.name.clone(), f.arity());
        }
        self.units.push(Unit {
            module: lowered,
            tracker: tracker.map(ResourceTracker::id),
            defines,
            calls,
        });
        Ok(())
    }

    fn lookup(&mut self, name: &str) -> Result<Symbol> {
        let unit = self
            .units
            .iter()
            .find(|u| u.defines.iter().any(|d| d == name))
            .ok_or_else(|| Error::session(format!("symbol '{}' not found", name)))?;
        self.link(unit)?;
        let cname = cstring(name)?;
        match unsafe { execution_engine::LLVMGetFunctionAddress(self.engine, cname.as_ptr()) } {
            0 => Err(Error::session(format!("symbol '{}' not found", name))),
            addr => Ok(Symbol(addr)),
        }
    }

    fn invoke(&mut self, symbol: &Symbol) -> Result<f64> {
        let f: extern "C" fn() -> f64 = unsafe { mem::transmute(symbol.0 as usize) };
        Ok(f())
    }

    fn remove(&mut self, tracker: ResourceTracker) -> Result<()> {
        let (released, kept): (Vec<Unit>, Vec<Unit>) = self
            .units
            .drain(..)
            .partition(|u| u.tracker == Some(tracker.id()));
        self.units = kept;
        for unit in released {
            for name in &unit.defines {
                self.symbols.remove(name);
                if let Some(builtin) = builtins::lookup(name) {
                    self.symbols.insert(name.clone(), builtin.arity());
                }
            }
            unsafe {
                let mut out = null_mut();
                let mut err = null_mut();
                if execution_engine::LLVMRemoveModule(self.engine, unit.module, &mut out, &mut err) != 0 {
                    return Err(Error::session(take_message(err)));
                }
                core::LLVMDisposeModule(out);
            }
        }
        Ok(())
    }
}
