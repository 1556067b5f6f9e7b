//! Runtime functions callable from compiled code after an `extern` declaration.

use libc::{c_void, STDERR_FILENO};

#[derive(Clone, Copy, Debug)]
pub enum Builtin {
    Nullary(extern "C" fn() -> f64),
    Unary(extern "C" fn(f64) -> f64),
}

impl Builtin {
    pub fn arity(self) -> usize {
        match self {
            Builtin::Nullary(_) => 0,
            Builtin::Unary(_) => 1,
        }
    }

    pub fn call(self, args: &[f64]) -> Option<f64> {
        match (self, args) {
            (Builtin::Nullary(f), []) => Some(f()),
            (Builtin::Unary(f), [x]) => Some(f(*x)),
            _ => None,
        }
    }

    pub fn address(self) -> *const c_void {
        match self {
            Builtin::Nullary(f) => f as *const c_void,
            Builtin::Unary(f) => f as *const c_void,
        }
    }
}

pub const BUILTINS: &[(&str, Builtin)] = &[
    ("putchard", Builtin::Unary(putchard)),
    ("tab", Builtin::Nullary(tab)),
    ("endl", Builtin::Nullary(endl)),
    ("printNum", Builtin::Unary(print_num)),
];

pub fn lookup(name: &str) -> Option<Builtin> {
    BUILTINS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|&(_, builtin)| builtin)
}

fn write_stderr(bytes: &[u8]) {
    unsafe {
        libc::write(STDERR_FILENO, bytes.as_ptr() as *const c_void, bytes.len());
    }
}

pub extern "C" fn putchard(x: f64) -> f64 {
    write_stderr(&[x as u8]);
    0.0
}

pub extern "C" fn tab() -> f64 {
    putchard(9.0)
}

pub extern "C" fn endl() -> f64 {
    putchard(10.0)
}

/// Prints the integer part of `x`.
pub extern "C" fn print_num(x: f64) -> f64 {
    write_stderr((x as i32).to_string().as_bytes());
    0.0
}
