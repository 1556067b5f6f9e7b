pub const UNARY_MARKER: &str = "unary@";
pub const BINARY_MARKER: &str = "binary@";
pub const DEFAULT_BINARY_PRECEDENCE: u32 = 30;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    /// `var name [= init]`
    Var(String, Option<Box<Expr>>),
    Unary(char, Box<Expr>),
    Binary(String, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    If(Box<Expr>, Box<Expr>, Option<Box<Expr>>),
    /// Loop variable, start, end, step, body.
    For(String, Box<Expr>, Box<Expr>, Option<Box<Expr>>, Box<Expr>),
    Block(Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoKind {
    Function,
    Unary,
    Binary,
}

impl ProtoKind {
    /// Operand count an operator prototype must declare.
    pub fn arity(self) -> Option<usize> {
        match self {
            ProtoKind::Function => None,
            ProtoKind::Unary => Some(1),
            ProtoKind::Binary => Some(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prototype {
    pub name: String,
    pub params: Vec<String>,
    pub kind: ProtoKind,
    pub precedence: u32,
}

impl Prototype {
    pub fn new(name: impl Into<String>, params: Vec<String>) -> Prototype {
        Prototype {
            name: name.into(),
            params,
            kind: ProtoKind::Function,
            precedence: 0,
        }
    }

    pub fn unary(op: char, param: String) -> Prototype {
        Prototype {
            name: unary_function_name(op),
            params: vec![param],
            kind: ProtoKind::Unary,
            precedence: 0,
        }
    }

    pub fn binary(op: &str, precedence: u32, lhs: String, rhs: String) -> Prototype {
        Prototype {
            name: binary_function_name(op),
            params: vec![lhs, rhs],
            kind: ProtoKind::Binary,
            precedence,
        }
    }

    /// Operator spelling for unary and binary operator prototypes.
    pub fn operator(&self) -> Option<&str> {
        match self.kind {
            ProtoKind::Function => None,
            ProtoKind::Unary => self.name.get(UNARY_MARKER.len()..),
            ProtoKind::Binary => self.name.get(BINARY_MARKER.len()..),
        }
    }

    pub fn is_binary_op(&self) -> bool {
        self.kind == ProtoKind::Binary
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function(pub Prototype, pub Expr);

impl Function {
    pub fn name(&self) -> &str {
        &self.0.name
    }
}

pub fn unary_function_name(op: char) -> String {
    format!("{}{}", UNARY_MARKER, op)
}

pub fn binary_function_name(op: &str) -> String {
    format!("{}{}", BINARY_MARKER, op)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_operator_names() {
        let p = Prototype::binary("==", 9, "a".to_owned(), "b".to_owned());
        assert_eq!(p.name, "binary@==");
        assert_eq!(p.operator(), Some("=="));
        assert_eq!(p.name, binary_function_name("=="));

        let u = Prototype::unary('!', "v".to_owned());
        assert_eq!(u.name, unary_function_name('!'));
        assert_eq!(u.operator(), Some("!"));
        assert_eq!(u.kind.arity(), Some(1));

        assert_eq!(Prototype::new("f", vec![]).operator(), None);
    }
}
