use super::codegen::CodeGen;
use super::error::{Error, Result};
use super::ir::{self, Module};
use super::jit::Engine;
use super::operators::OperatorTable;
use super::parser::Parser;
use super::symbols::PrototypeRegistry;
use super::token::Token;
use std::io::{self, Write};
use std::mem;

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Echo every compiled function to the diagnostic sink.
    pub dump_ir: bool,
}

/// What one top-level statement did.
#[derive(Debug)]
pub enum Outcome {
    /// A definition compiled and was loaded for the rest of the session.
    Defined(ir::Function),
    Declared(ir::Function),
    /// A top-level expression ran. Its anonymous wrapper is already unloaded.
    Evaluated(ir::Function, f64),
    Skipped,
    /// The statement was abandoned; the session goes on.
    Failed(Error),
}

/// Drives one source text through parse, codegen and the engine, one
/// statement at a time.
pub struct Session<E: Engine> {
    parser: Parser,
    operators: OperatorTable,
    protos: PrototypeRegistry,
    module: Module,
    engine: E,
    config: SessionConfig,
    units: usize,
}

impl<E: Engine> Session<E> {
    pub fn new(source: impl Into<String>, engine: E, config: SessionConfig) -> Session<E> {
        Session {
            parser: Parser::new(source),
            operators: OperatorTable::new(),
            protos: PrototypeRegistry::new(),
            module: Module::new("kscope.0"),
            engine,
            config,
            units: 0,
        }
    }

    /// The unit statements are currently compiled into.
    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn prototypes(&self) -> &PrototypeRegistry {
        &self.protos
    }

    /// Handles the statement at the current token. `None` at end of input;
    /// fatal errors come back as `Err`, all others as `Outcome::Failed`.
    pub fn handle_next(&mut self) -> Result<Option<Outcome>> {
        let outcome = match self.parser.current() {
            Token::Eof => return Ok(None),
            Token::ExprEnd => self.parser.advance().map(|()| Outcome::Skipped),
            Token::Def => self.handle_definition(),
            Token::Extern => self.handle_extern(),
            _ => self.handle_top_level(),
        };
        match outcome {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(Some(Outcome::Failed(e))),
        }
    }

    /// Runs to end of input, reporting each statement to `out`.
    pub fn run(&mut self, out: &mut impl Write) -> Result<()> {
        while let Some(outcome) = self.handle_next()? {
            self.report(out, outcome).ok();
        }
        Ok(())
    }

    fn report(&self, out: &mut impl Write, outcome: Outcome) -> io::Result<()> {
        match outcome {
            Outcome::Defined(func) => {
                if self.config.dump_ir {
                    write!(out, "{}", func)?;
                }
            }
            Outcome::Declared(decl) => write!(out, "Read extern:\n{}\n", decl)?,
            Outcome::Evaluated(func, value) => {
                if self.config.dump_ir {
                    write!(out, "{}", func)?;
                }
                writeln!(out, "Evaluated to {:.6}", value)?;
            }
            Outcome::Failed(e) => writeln!(out, "Error: {}", e)?,
            Outcome::Skipped => {}
        }
        Ok(())
    }

    fn codegen(&mut self) -> CodeGen<'_> {
        CodeGen::new(&mut self.module, &mut self.protos, &mut self.operators)
    }

    /// Runs one parse entry point. On failure at least one token is dropped
    /// so the next statement starts past the error.
    fn parse<T>(&mut self, f: impl FnOnce(&mut Parser, &OperatorTable) -> Result<T>) -> Result<T> {
        let parsed = f(&mut self.parser, &self.operators);
        if parsed.is_err() {
            self.parser.advance().ok();
        }
        parsed
    }

    fn take_module(&mut self) -> Module {
        self.units += 1;
        mem::replace(&mut self.module, Module::new(format!("kscope.{}", self.units)))
    }

    fn compiled(&self, name: &str) -> Result<ir::Function> {
        self.module
            .get_function(name)
            .cloned()
            .ok_or_else(|| Error::session(format!("'{}' is missing from the unit", name)))
    }

    fn handle_definition(&mut self) -> Result<Outcome> {
        let func = self.parse(Parser::parse_definition)?;
        let name = self.codegen().codegen_func(func)?;
        let compiled = self.compiled(&name)?;
        let module = self.take_module();
        self.engine.add_module(module, None)?;
        Ok(Outcome::Defined(compiled))
    }

    fn handle_extern(&mut self) -> Result<Outcome> {
        let proto = self.parse(Parser::parse_extern)?;
        let decl = self.codegen().codegen_extern(proto)?;
        Ok(Outcome::Declared(decl))
    }

    fn handle_top_level(&mut self) -> Result<Outcome> {
        let func = self.parse(Parser::parse_top_level)?;
        let name = self.codegen().codegen_func(func)?;
        let compiled = self.compiled(&name)?;

        let tracker = self.engine.create_tracker();
        let module = self.take_module();
        self.engine.add_module(module, Some(&tracker))?;
        let symbol = self.engine.lookup(&name)?;
        let value = self.engine.invoke(&symbol)?;
        self.engine.remove(tracker)?;
        self.protos.remove(&name);
        Ok(Outcome::Evaluated(compiled, value))
    }
}

#[cfg(test)]
mod test {
    use super::super::jit::Interpreter;
    use super::*;

    fn session(src: &str) -> Session<Interpreter> {
        Session::new(src, Interpreter::new(), SessionConfig::default())
    }

    fn outcomes(s: &mut Session<Interpreter>) -> Vec<Outcome> {
        let mut all = Vec::new();
        while let Some(o) = s.handle_next().unwrap() {
            match o {
                Outcome::Skipped => {}
                o => all.push(o),
            }
        }
        all
    }

    fn values(src: &str) -> Vec<f64> {
        outcomes(&mut session(src))
            .into_iter()
            .filter_map(|o| match o {
                Outcome::Evaluated(_, v) => Some(v),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_evaluate() {
        assert_eq!(values("1+2*3; (1+2)*3;"), vec![7.0, 9.0]);
        assert_eq!(values("4 < 5; 5 < 4"), vec![1.0, 0.0]);
    }

    #[test]
    fn test_definition_flushes_unit() {
        let mut s = session("extern putchard(c); def f(x) x*2;");
        let all = outcomes(&mut s);
        assert!(match &all[0] {
            Outcome::Declared(d) => d.name == "putchard" && d.is_declaration(),
            _ => false,
        });
        assert!(match &all[1] {
            Outcome::Defined(f) => f.name == "f" && !f.is_declaration(),
            _ => false,
        });
        assert!(s.module().is_empty());
        assert!(s.engine().is_defined("f"));
    }

    #[test]
    fn test_anonymous_wrappers_unloaded() {
        let mut s = session("def f(x) x+1; f(1); f(2); f(3);");
        outcomes(&mut s);
        assert_eq!(s.engine().symbol_count(), 1);
        assert_eq!(s.engine().unit_count(), 1);
        assert_eq!(s.prototypes().len(), 1);
    }

    #[test]
    fn test_parse_error_recovers() {
        let mut s = session("def (x) 1; 2+2;");
        let all = outcomes(&mut s);
        assert!(match &all[0] {
            Outcome::Failed(e) => !e.is_fatal(),
            _ => false,
        });
        assert!(match all.last() {
            Some(Outcome::Evaluated(_, v)) => *v == 4.0,
            _ => false,
        });
    }

    #[test]
    fn test_unresolved_extern_is_fatal() {
        let mut s = session("extern nowhere(); nowhere();");
        let mut out = Vec::new();
        assert!(s.run(&mut out).unwrap_err().is_fatal());
    }

    #[test]
    fn test_run_reports() {
        let mut s = session("extern tab(); def f(x) x; f(3); g(1);");
        let mut out = Vec::new();
        s.run(&mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("Read extern:\ndeclare double @tab()\n"));
        assert!(out.contains("Evaluated to 3.000000\n"));
        assert!(out.contains("Error: codegen error: "));
    }

    #[test]
    fn test_dump_ir() {
        let mut s = Session::new(
            "def f(x) x;",
            Interpreter::new(),
            SessionConfig { dump_ir: true },
        );
        let mut out = Vec::new();
        s.run(&mut out).unwrap();
        assert!(String::from_utf8(out)
            .unwrap()
            .starts_with("define double @f(double %x) {"));
    }
}
