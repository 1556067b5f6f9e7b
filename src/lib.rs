//! Incremental compiler for the Kaleidoscope toy language.
//!
//! Source text is lexed and parsed one top-level statement at a time, lowered
//! into a small SSA-style IR, and handed to an execution engine. Definitions
//! stay loaded for the whole session; bare expressions are wrapped in an
//! anonymous function, run once and unloaded.

pub mod ast;
pub mod builtins;
pub mod codegen;
pub mod error;
pub mod ir;
pub mod jit;
pub mod lexer;
pub mod operators;
pub mod parser;
pub mod symbols;
pub mod token;
pub mod toplevel;

pub use error::{Error, ErrorKind, Result};
pub use jit::{Engine, Interpreter};
pub use toplevel::{Outcome, Session, SessionConfig};
