use std::collections::{HashMap, HashSet};

/// Every spelling the parser may combine into one operator, longest first.
const SPELLINGS: &[&str] = &[
    "<<=", ">>=", "==", "!=", "+=", "-=", "*=", "/=", "%=", ">=", "<=", "^=", "&=", "|=", "&&",
    "||", "<<", ">>", "=", "+", "-", "*", "/", "%", ">", "<", "^", "&", "|", ",",
];

const BUILTIN_PRECEDENCE: &[(&str, u32)] = &[("=", 2), ("<", 10), ("+", 20), ("-", 20), ("*", 40)];

pub const MAX_SPELLING_LEN: usize = 3;

/// Recognized operator spellings and the precedence of each binary operator.
#[derive(Debug, Clone)]
pub struct OperatorTable {
    spellings: HashSet<&'static str>,
    precedence: HashMap<String, u32>,
}

impl Default for OperatorTable {
    fn default() -> Self {
        OperatorTable {
            spellings: SPELLINGS.iter().cloned().collect(),
            precedence: BUILTIN_PRECEDENCE
                .iter()
                .map(|&(op, prec)| (op.to_owned(), prec))
                .collect(),
        }
    }
}

impl OperatorTable {
    pub fn new() -> OperatorTable {
        OperatorTable::default()
    }

    pub fn is_spelling(&self, op: &str) -> bool {
        self.spellings.contains(op)
    }

    /// Longest prefix of `candidate` that is a known spelling.
    pub fn longest_spelling<'a>(&self, candidate: &'a str) -> Option<&'a str> {
        let chars: Vec<(usize, char)> = candidate.char_indices().collect();
        (1..=chars.len().min(MAX_SPELLING_LEN))
            .rev()
            .map(|n| match chars.get(n) {
                Some(&(end, _)) => &candidate[..end],
                None => candidate,
            })
            .find(|op| self.is_spelling(op))
    }

    pub fn precedence(&self, op: &str) -> Option<u32> {
        self.precedence.get(op).cloned()
    }

    /// Installs `prec` for `op`, returning the entry it replaced.
    pub fn set_precedence(&mut self, op: &str, prec: u32) -> Option<u32> {
        self.precedence.insert(op.to_owned(), prec)
    }

    /// Puts back the entry displaced by `set_precedence`.
    pub fn restore_precedence(&mut self, op: &str, previous: Option<u32>) {
        match previous {
            Some(prec) => {
                self.precedence.insert(op.to_owned(), prec);
            }
            None => {
                self.precedence.remove(op);
            }
        }
    }
}
