use super::ast::{binary_function_name, unary_function_name, Expr, Function, Prototype};
use super::error::{Error, Result};
use super::ir::{self, ArithOp, BlockId, CmpPred, FunctionBuilder, Module, Slot, Value};
use super::operators::OperatorTable;
use super::symbols::{NamedValues, PrototypeRegistry};

/// Lowers AST into one compilation unit. Session-wide tables are borrowed for
/// the duration of a statement.
pub struct CodeGen<'a> {
    module: &'a mut Module,
    protos: &'a mut PrototypeRegistry,
    operators: &'a mut OperatorTable,
    named_values: NamedValues,
    builder: FunctionBuilder,
    /// Bindings shadowed by `var` inside each open block, innermost last.
    scopes: Vec<Vec<(String, Option<Slot>)>>,
}

impl<'a> CodeGen<'a> {
    pub fn new(
        module: &'a mut Module,
        protos: &'a mut PrototypeRegistry,
        operators: &'a mut OperatorTable,
    ) -> CodeGen<'a> {
        CodeGen {
            module,
            protos,
            operators,
            named_values: NamedValues::new(),
            builder: FunctionBuilder::new(),
            scopes: Vec::new(),
        }
    }

    pub fn named_values(&self) -> &NamedValues {
        &self.named_values
    }

    /// Finds `name` in the current unit, or re-declares it there from the
    /// registry. Returns its arity.
    fn resolve(&mut self, name: &str) -> Option<usize> {
        if let Some(f) = self.module.get_function(name) {
            return Some(f.arity());
        }
        let proto = self.protos.get(name)?;
        Some(self.module.declare(&proto.name, &proto.params).arity())
    }

    fn unknown_variable(name: &str) -> Error {
        Error::codegen(format!("unknown variable name '{}'", name))
    }

    pub fn codegen_expr(&mut self, e: &Expr) -> Result<Value> {
        match e {
            Expr::Number(n) => Ok(Value::Const(*n)),
            Expr::Variable(name) => {
                let slot = self
                    .named_values
                    .get(name)
                    .ok_or_else(|| Self::unknown_variable(name))?;
                Ok(self.builder.load(slot))
            }
            Expr::Var(name, init) => {
                let init_val = match init {
                    Some(init) => self.codegen_expr(init)?,
                    None => Value::Const(0.0),
                };
                let slot = self.builder.alloca(name);
                self.builder.store(init_val, slot);
                let shadowed = self.named_values.bind(name, slot);
                if let Some(scope) = self.scopes.last_mut() {
                    scope.push((name.clone(), shadowed));
                }
                Ok(init_val)
            }
            Expr::Unary(op, operand) => {
                let operand = self.codegen_expr(operand)?;
                let callee = unary_function_name(*op);
                if self.resolve(&callee).is_none() {
                    return Err(Error::codegen(format!("unknown unary operator '{}'", op)));
                }
                Ok(self.builder.call(&callee, vec![operand]))
            }
            Expr::Binary(op, lhs, rhs) if op == "=" => {
                let name = match **lhs {
                    Expr::Variable(ref name) => name,
                    _ => return Err(Error::codegen("destination of '=' must be a variable")),
                };
                let val = self.codegen_expr(rhs)?;
                let slot = self
                    .named_values
                    .get(name)
                    .ok_or_else(|| Self::unknown_variable(name))?;
                self.builder.store(val, slot);
                Ok(val)
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = self.codegen_expr(lhs)?;
                let r = self.codegen_expr(rhs)?;
                match op.as_str() {
                    "+" => Ok(self.builder.arith(ArithOp::FAdd, l, r)),
                    "-" => Ok(self.builder.arith(ArithOp::FSub, l, r)),
                    "*" => Ok(self.builder.arith(ArithOp::FMul, l, r)),
                    "<" => {
                        // i1 -> 0.0 or 1.0
                        let cmp = self.builder.fcmp(CmpPred::Ult, l, r);
                        Ok(self.builder.ui_to_fp(cmp))
                    }
                    _ => {
                        let callee = binary_function_name(op);
                        match self.resolve(&callee) {
                            Some(_) => Ok(self.builder.call(&callee, vec![l, r])),
                            None => Err(Error::codegen(format!("unknown binary operator '{}'", op))),
                        }
                    }
                }
            }
            Expr::Call(callee, args) => {
                let arity = self
                    .resolve(callee)
                    .ok_or_else(|| Error::codegen(format!("unknown function referenced '{}'", callee)))?;
                if arity != args.len() {
                    return Err(Error::codegen(format!(
                        "incorrect number of arguments passed to '{}': expected {}, got {}",
                        callee,
                        arity,
                        args.len()
                    )));
                }
                let mut vals = Vec::with_capacity(args.len());
                for arg in args {
                    vals.push(self.codegen_expr(arg)?);
                }
                Ok(self.builder.call(callee, vals))
            }
            Expr::If(cond, then, otherwise) => {
                let result = self.builder.alloca("if.result");
                let cond = self.codegen_expr(cond)?;
                let cond = self.builder.fcmp(CmpPred::One, cond, Value::Const(0.0));

                let then_bb = self.builder.append_block("if.then");
                let else_bb = self.builder.append_block("if.else");
                let merge_bb = self.builder.append_block("if.end");
                self.builder.cond_br(cond, then_bb, else_bb);

                self.builder.position_at_end(then_bb);
                let then_val = self.codegen_expr(then)?;
                self.builder.store(then_val, result);
                self.builder.br(merge_bb);

                self.builder.position_at_end(else_bb);
                let else_val = match otherwise {
                    Some(otherwise) => self.codegen_expr(otherwise)?,
                    None => Value::Const(0.0),
                };
                self.builder.store(else_val, result);
                self.builder.br(merge_bb);

                self.builder.position_at_end(merge_bb);
                Ok(self.builder.load(result))
            }
            Expr::For(name, start, end, step, body) => {
                let slot = self.builder.alloca(name);
                let start_val = self.codegen_expr(start)?;
                self.builder.store(start_val, slot);

                let test_bb = self.builder.append_block("for.test");
                let body_bb = self.builder.append_block("for.body");
                let after_bb = self.builder.append_block("for.end");
                self.builder.br(test_bb);

                let shadowed = self.named_values.bind(name, slot);
                let looped = self.codegen_loop(
                    end,
                    step.as_deref(),
                    body,
                    slot,
                    (test_bb, body_bb, after_bb),
                );
                self.named_values.restore(name, shadowed);
                looped?;
                Ok(Value::Const(0.0))
            }
            Expr::Block(exprs) => {
                self.scopes.push(Vec::new());
                let result = self.codegen_sequence(exprs);
                if let Some(scope) = self.scopes.pop() {
                    for (name, shadowed) in scope.into_iter().rev() {
                        self.named_values.restore(&name, shadowed);
                    }
                }
                result
            }
        }
    }

    fn codegen_sequence(&mut self, exprs: &[Expr]) -> Result<Value> {
        let mut last = Value::Const(0.0);
        for e in exprs {
            last = self.codegen_expr(e)?;
        }
        Ok(last)
    }

    fn codegen_loop(
        &mut self,
        end: &Expr,
        step: Option<&Expr>,
        body: &Expr,
        slot: Slot,
        (test_bb, body_bb, after_bb): (BlockId, BlockId, BlockId),
    ) -> Result<()> {
        self.builder.position_at_end(test_bb);
        let end_val = self.codegen_expr(end)?;
        let cond = self.builder.fcmp(CmpPred::One, end_val, Value::Const(0.0));
        self.builder.cond_br(cond, body_bb, after_bb);

        self.builder.position_at_end(body_bb);
        self.codegen_expr(body)?;
        let step_val = match step {
            Some(step) => self.codegen_expr(step)?,
            None => Value::Const(0.0),
        };
        self.builder.store(step_val, slot);
        self.builder.br(test_bb);

        self.builder.position_at_end(after_bb);
        Ok(())
    }

    /// Emits an external declaration and records it in the registry. A name
    /// whose body already compiled keeps its registered prototype.
    pub fn codegen_extern(&mut self, proto: Prototype) -> Result<ir::Function> {
        let known = self
            .protos
            .get(&proto.name)
            .map(|p| p.params.len())
            .or_else(|| self.module.get_function(&proto.name).map(|f| f.arity()));
        if let Some(arity) = known {
            if arity != proto.params.len() {
                return Err(Error::codegen(format!(
                    "conflicting declaration of '{}': expected {} parameters, got {}",
                    proto.name,
                    arity,
                    proto.params.len()
                )));
            }
        }
        let decl = self.module.declare(&proto.name, &proto.params).clone();
        if !self.protos.is_defined(&proto.name) {
            self.protos.register(proto);
        }
        Ok(decl)
    }

    /// Compiles a definition into the current unit and returns its name. On
    /// failure the unit, the registry and the operator table are left as they were.
    pub fn codegen_func(&mut self, func: Function) -> Result<String> {
        let Function(proto, body) = func;
        let name = proto.name.clone();

        let has_body = self
            .module
            .get_function(&name)
            .map_or(false, |f| !f.is_declaration());
        if has_body || self.protos.is_defined(&name) {
            return Err(Error::codegen(format!("function '{}' cannot be redefined", name)));
        }

        let operator = match proto.operator() {
            Some(op) if proto.is_binary_op() => Some((op.to_owned(), proto.precedence)),
            _ => None,
        };
        let previous_entry = self.protos.register(proto);
        let previous_prec = operator
            .as_ref()
            .map(|(op, prec)| self.operators.set_precedence(op, *prec));

        match self.codegen_body(&name, &body) {
            Ok(()) => {
                self.protos.mark_defined(&name);
                Ok(name)
            }
            Err(e) => {
                self.module.remove_function(&name);
                self.protos.restore(&name, previous_entry);
                if let (Some((op, _)), Some(prev)) = (operator, previous_prec) {
                    self.operators.restore_precedence(&op, prev);
                }
                Err(e)
            }
        }
    }

    fn codegen_body(&mut self, name: &str, body: &Expr) -> Result<()> {
        let params = match self.protos.get(name) {
            Some(proto) => proto.params.clone(),
            None => return Err(Error::codegen(format!("no prototype for '{}'", name))),
        };
        let arity = self
            .resolve(name)
            .ok_or_else(|| Error::codegen(format!("failed to declare '{}'", name)))?;
        if arity != params.len() {
            return Err(Error::codegen(format!(
                "definition of '{}' takes {} parameters but it was declared with {}",
                name,
                params.len(),
                arity
            )));
        }
        if let Some(decl) = self.module.get_function_mut(name) {
            if decl.params != params {
                decl.params = params.clone();
            }
        }

        self.builder = FunctionBuilder::new();
        self.named_values.clear();
        self.scopes.clear();
        let entry = self.builder.append_block("entry");
        self.builder.position_at_end(entry);
        for (i, param) in params.iter().enumerate() {
            let slot = self.builder.alloca(param);
            self.builder.store(Value::Param(i), slot);
            self.named_values.bind(param, slot);
        }
        let ret = self.builder.alloca("ret");

        let ret_val = self.codegen_expr(body)?;
        self.builder.store(ret_val, ret);
        let ret_val = self.builder.load(ret);
        self.builder.ret(ret_val);

        let built = std::mem::replace(&mut self.builder, FunctionBuilder::new()).finish();
        if let Some(func) = self.module.get_function_mut(name) {
            func.body = Some(built);
        }
        let module = &*self.module;
        let func = module
            .get_function(name)
            .ok_or_else(|| Error::codegen(format!("'{}' vanished from the unit", name)))?;
        ir::verify_function(module, func)
    }
}

#[cfg(test)]
mod test {
    use super::super::error::ErrorKind;
    use super::super::parser::Parser;
    use super::*;

    struct Fixture {
        module: Module,
        protos: PrototypeRegistry,
        ops: OperatorTable,
    }

    impl Fixture {
        fn new() -> Fixture {
            Fixture {
                module: Module::new("test"),
                protos: PrototypeRegistry::new(),
                ops: OperatorTable::new(),
            }
        }

        fn codegen(&mut self) -> CodeGen {
            CodeGen::new(&mut self.module, &mut self.protos, &mut self.ops)
        }

        fn define(&mut self, src: &str) -> Result<String> {
            let mut p = Parser::new(src);
            p.advance().unwrap();
            let func = p.parse_definition(&self.ops).unwrap();
            self.codegen().codegen_func(func)
        }

        fn extern_(&mut self, src: &str) -> Result<ir::Function> {
            let mut p = Parser::new(src);
            p.advance().unwrap();
            let proto = p.parse_extern(&self.ops).unwrap();
            self.codegen().codegen_extern(proto)
        }
    }

    fn open_entry(cg: &mut CodeGen) {
        let entry = cg.builder.append_block("entry");
        cg.builder.position_at_end(entry);
    }

    fn num(n: f64) -> Box<Expr> {
        Box::new(Expr::Number(n))
    }

    fn kind(r: Result<String>) -> ErrorKind {
        r.unwrap_err().kind().clone()
    }

    #[test]
    fn test_define() {
        let mut fx = Fixture::new();
        assert_eq!(fx.define("def add(a b) a + b").unwrap(), "add");
        let f = fx.module.get_function("add").unwrap();
        assert!(!f.is_declaration());
        assert!(fx.protos.is_defined("add"));
        let text = f.to_string();
        assert!(text.contains("fadd double"));
        assert!(text.contains("ret double"));
    }

    #[test]
    fn test_comparison_is_unsigned() {
        let mut fx = Fixture::new();
        fx.define("def lt(a b) a < b").unwrap();
        let text = fx.module.get_function("lt").unwrap().to_string();
        assert!(text.contains("fcmp ult"));
        assert!(text.contains("uitofp i1"));
    }

    #[test]
    fn test_assign_to_non_variable() {
        let mut fx = Fixture::new();
        let mut cg = fx.codegen();
        open_entry(&mut cg);
        let e = Expr::Binary("=".to_owned(), num(1.0), num(2.0));
        let err = cg.codegen_expr(&e).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Codegen("destination of '=' must be a variable".to_owned())
        );
        assert_eq!(cg.builder.body().store_count(), 0);
    }

    #[test]
    fn test_for_restores_outer_binding() {
        let mut fx = Fixture::new();
        let mut cg = fx.codegen();
        open_entry(&mut cg);
        let outer = cg.builder.alloca("i");
        cg.named_values.bind("i", outer);

        let l = Expr::For(
            "i".to_owned(),
            num(0.0),
            Box::new(Expr::Binary(
                "<".to_owned(),
                Box::new(Expr::Variable("i".to_owned())),
                num(3.0),
            )),
            Some(num(1.0)),
            Box::new(Expr::Variable("i".to_owned())),
        );
        assert_eq!(cg.codegen_expr(&l).unwrap(), Value::Const(0.0));
        assert_eq!(cg.named_values().get("i"), Some(outer));
        assert_eq!(cg.named_values().len(), 1);
    }

    #[test]
    fn test_for_leaves_no_binding() {
        let mut fx = Fixture::new();
        let mut cg = fx.codegen();
        open_entry(&mut cg);
        let l = Expr::For(
            "i".to_owned(),
            num(0.0),
            num(0.0),
            None,
            Box::new(Expr::Variable("i".to_owned())),
        );
        cg.codegen_expr(&l).unwrap();
        assert!(!cg.named_values().contains("i"));

        // a failing body still unwinds the binding
        let l = Expr::For(
            "i".to_owned(),
            num(0.0),
            num(0.0),
            None,
            Box::new(Expr::Variable("nope".to_owned())),
        );
        assert!(cg.codegen_expr(&l).is_err());
        assert!(!cg.named_values().contains("i"));
    }

    #[test]
    fn test_block_scope() {
        let mut fx = Fixture::new();
        let mut cg = fx.codegen();
        open_entry(&mut cg);
        cg.codegen_expr(&Expr::Var("x".to_owned(), Some(num(1.0))))
            .unwrap();
        let outer = cg.named_values().get("x").unwrap();

        let inner = Expr::Block(vec![
            Expr::Var("x".to_owned(), Some(num(2.0))),
            Expr::Var("y".to_owned(), None),
            Expr::Variable("x".to_owned()),
        ]);
        cg.codegen_expr(&inner).unwrap();
        assert_eq!(cg.named_values().get("x"), Some(outer));
        assert!(!cg.named_values().contains("y"));
    }

    #[test]
    fn test_empty_block_is_zero() {
        let mut fx = Fixture::new();
        let mut cg = fx.codegen();
        open_entry(&mut cg);
        assert_eq!(
            cg.codegen_expr(&Expr::Block(vec![])).unwrap(),
            Value::Const(0.0)
        );
    }

    #[test]
    fn test_if_uses_result_slot() {
        let mut fx = Fixture::new();
        fx.define("def f(x) if x 1 else 2").unwrap();
        let body = fx.module.get_function("f").unwrap().body.clone().unwrap();
        // x, ret and the hidden if result
        assert_eq!(body.slots.len(), 3);
        assert_eq!(body.stores_to(Slot(2)), 2);
        let labels: Vec<&str> = body.blocks.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["entry", "if.then", "if.else", "if.end"]);
    }

    #[test]
    fn test_redefinition() {
        let mut fx = Fixture::new();
        fx.define("def f(a) a").unwrap();
        // a later unit
        fx.module = Module::new("next");
        assert_eq!(
            kind(fx.define("def f(a b) a")),
            ErrorKind::Codegen("function 'f' cannot be redefined".to_owned())
        );
        assert_eq!(fx.protos.get("f").unwrap().params, vec!["a".to_owned()]);
        assert!(fx.protos.is_defined("f"));
        assert!(fx.module.get_function("f").is_none());
    }

    #[test]
    fn test_failed_definition_rolls_back() {
        let mut fx = Fixture::new();
        assert!(fx.define("def binary@> 10 (a b) c").is_err());
        assert_eq!(fx.ops.precedence(">"), None);
        assert!(fx.protos.get("binary@>").is_none());
        assert!(fx.module.get_function("binary@>").is_none());

        fx.define("def binary@> 10 (a b) b < a").unwrap();
        assert_eq!(fx.ops.precedence(">"), Some(10));
    }

    #[test]
    fn test_extern_then_define_renames() {
        let mut fx = Fixture::new();
        let decl = fx.extern_("extern foo(x)").unwrap();
        assert!(decl.is_declaration());
        fx.define("def foo(y) y").unwrap();
        assert_eq!(
            fx.module.get_function("foo").unwrap().params,
            vec!["y".to_owned()]
        );
        assert_eq!(fx.protos.get("foo").unwrap().params, vec!["y".to_owned()]);
    }

    #[test]
    fn test_extern_conflict() {
        let mut fx = Fixture::new();
        fx.extern_("extern foo(x)").unwrap();
        assert!(fx.extern_("extern foo(x y)").is_err());
        assert!(fx.extern_("extern foo(z)").is_ok());
    }

    #[test]
    fn test_cross_unit_resolution() {
        let mut fx = Fixture::new();
        fx.define("def g(a) a * 2").unwrap();
        fx.module = Module::new("next");
        fx.define("def f() g(3)").unwrap();
        let g = fx.module.get_function("g").unwrap();
        assert!(g.is_declaration());
        assert_eq!(g.arity(), 1);
    }

    #[test]
    fn test_call_errors() {
        let mut fx = Fixture::new();
        fx.define("def g(a) a").unwrap();
        assert_eq!(
            kind(fx.define("def f() g(1, 2)")),
            ErrorKind::Codegen(
                "incorrect number of arguments passed to 'g': expected 1, got 2".to_owned()
            )
        );
        assert!(fx.define("def h() nope()").is_err());
        assert!(fx.define("def k(x) !x").is_err());
        // f failed, so its name is free again
        fx.define("def f() g(1)").unwrap();
    }

    #[test]
    fn test_user_operators() {
        let mut fx = Fixture::new();
        fx.define("def unary@!(v) if v 0 else 1").unwrap();
        fx.define("def k(x) !x").unwrap();
        let text = fx.module.get_function("k").unwrap().to_string();
        assert!(text.contains("call double @\"unary@!\""));
    }
}
