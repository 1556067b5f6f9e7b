use super::ast::{Expr, Function, ProtoKind, Prototype, DEFAULT_BINARY_PRECEDENCE};
use super::error::{Error, Result};
use super::lexer::Lexer;
use super::operators::{OperatorTable, MAX_SPELLING_LEN};
use super::token::Token;

pub const ANON_EXPR_NAME: &str = "__anon_expr";

/// Recursive-descent parser. The operator table is passed into every entry point
/// because definitions compiled between statements may change it.
pub struct Parser {
    lexer: Lexer,
    cur: Token,
    anon_count: usize,
}

impl Parser {
    /// The current token starts out as a statement terminator, so the driver's
    /// first step pulls the real first token.
    pub fn new(source: impl Into<String>) -> Parser {
        Parser {
            lexer: Lexer::new(source),
            cur: Token::ExprEnd,
            anon_count: 0,
        }
    }

    pub fn current(&self) -> &Token {
        &self.cur
    }

    /// Moves to the next token. On a lex error the offending text is
    /// consumed and the current token is left as it was.
    pub fn advance(&mut self) -> Result<()> {
        self.cur = self.lexer.next_token()?;
        Ok(())
    }

    fn expect_kwd(&mut self, c: char, msg: &str) -> Result<()> {
        if self.cur != Token::Kwd(c) {
            return Err(Error::parse(msg));
        }
        self.advance()
    }

    /// Probes up to three adjacent operator characters starting at the current
    /// token without consuming them.
    fn peek_operator(&mut self, ops: &OperatorTable) -> Option<String> {
        let first = match self.cur {
            Token::Kwd(c) => c,
            _ => return None,
        };
        let mut spelling = first.to_string();
        let checkpoint = self.lexer.checkpoint();
        while spelling.chars().count() < MAX_SPELLING_LEN {
            let end = self.lexer.position();
            match self.lexer.next_token() {
                Ok(Token::Kwd(c)) if self.lexer.token_start() == end => spelling.push(c),
                _ => break,
            }
        }
        self.lexer.restore(checkpoint);
        ops.longest_spelling(&spelling).map(|op| op.to_owned())
    }

    /// Consumes the operator spelling found by `peek_operator`.
    fn take_operator(&mut self, ops: &OperatorTable) -> Result<Option<String>> {
        let op = match self.peek_operator(ops) {
            Some(op) => op,
            None => return Ok(None),
        };
        for _ in 0..op.chars().count() {
            self.advance()?;
        }
        Ok(Some(op))
    }

    fn token_precedence(&mut self, ops: &OperatorTable) -> Option<u32> {
        self.peek_operator(ops).and_then(|op| ops.precedence(&op))
    }

    fn parse_number(&mut self, n: f64) -> Result<Expr> {
        self.advance()?;
        Ok(Expr::Number(n))
    }

    fn parse_paren(&mut self, ops: &OperatorTable) -> Result<Expr> {
        self.advance()?;
        let e = self.parse_expression(ops)?;
        self.expect_kwd(')', "expected ')'")?;
        Ok(e)
    }

    fn parse_identifier(&mut self, ops: &OperatorTable, name: String) -> Result<Expr> {
        self.advance()?;
        if self.cur != Token::Kwd('(') {
            return Ok(Expr::Variable(name));
        }
        self.advance()?;
        let mut args = Vec::new();
        if self.cur != Token::Kwd(')') {
            loop {
                args.push(self.parse_expression(ops)?);
                if self.cur == Token::Kwd(')') {
                    break;
                }
                if self.cur != Token::Kwd(',') {
                    return Err(Error::parse("expected ')' or ',' in argument list"));
                }
                self.advance()?;
            }
        }
        self.advance()?;
        Ok(Expr::Call(name, args))
    }

    fn parse_var(&mut self, ops: &OperatorTable) -> Result<Expr> {
        self.advance()?;
        let name = match &self.cur {
            Token::Ident(name) => name.clone(),
            _ => return Err(Error::parse("expected identifier after var")),
        };
        self.advance()?;
        let init = if self.cur == Token::Kwd('=') {
            self.advance()?;
            Some(Box::new(self.parse_expression(ops)?))
        } else {
            None
        };
        Ok(Expr::Var(name, init))
    }

    fn parse_if(&mut self, ops: &OperatorTable) -> Result<Expr> {
        self.advance()?;
        let cond = self.parse_expression(ops)?;
        if self.cur == Token::Then {
            self.advance()?;
        }
        let then = self.parse_expression(ops)?;
        if self.cur == Token::ExprEnd {
            self.advance()?;
        }
        let mut otherwise = None;
        if self.cur == Token::Else {
            self.advance()?;
            otherwise = Some(Box::new(self.parse_expression(ops)?));
            if self.cur == Token::ExprEnd {
                self.advance()?;
            }
        }
        Ok(Expr::If(Box::new(cond), Box::new(then), otherwise))
    }

    fn parse_for(&mut self, ops: &OperatorTable) -> Result<Expr> {
        self.advance()?;
        let name = match &self.cur {
            Token::Ident(name) => name.clone(),
            _ => return Err(Error::parse("expected identifier after for")),
        };
        self.advance()?;
        self.expect_kwd('=', "expected '=' after for")?;

        let start = self.parse_expression(ops)?;
        if self.cur != Token::ExprEnd {
            return Err(Error::parse("expected ';' after for start value"));
        }
        self.advance()?;

        let end = self.parse_expression(ops)?;
        if self.cur != Token::ExprEnd {
            return Err(Error::parse("expected ';' after for end value"));
        }
        self.advance()?;

        let step = if self.cur != Token::Kwd('{') {
            Some(Box::new(self.parse_expression(ops)?))
        } else {
            None
        };
        if self.cur != Token::Kwd('{') {
            return Err(Error::parse("expected '{' after for step"));
        }
        let body = self.parse_expression(ops)?;
        if self.cur == Token::ExprEnd {
            self.advance()?;
        }
        Ok(Expr::For(
            name,
            Box::new(start),
            Box::new(end),
            step,
            Box::new(body),
        ))
    }

    fn parse_block(&mut self, ops: &OperatorTable) -> Result<Expr> {
        self.expect_kwd('{', "expected '{'")?;
        let mut body = Vec::new();
        while self.cur != Token::Kwd('}') {
            if self.cur == Token::Eof {
                return Err(Error::parse("expected '}' at end of block"));
            }
            let e = self.parse_expression(ops)?;
            // if and for swallow their own trailing ';'
            let self_terminated = match e {
                Expr::If(..) | Expr::For(..) => true,
                _ => false,
            };
            if !self_terminated {
                match self.cur {
                    Token::ExprEnd => self.advance()?,
                    Token::Kwd('}') => {}
                    _ => return Err(Error::parse("expected ';' after expression in block")),
                }
            }
            body.push(e);
        }
        self.advance()?;
        Ok(Expr::Block(body))
    }

    fn parse_primary(&mut self, ops: &OperatorTable) -> Result<Expr> {
        match self.cur.clone() {
            Token::Ident(name) => self.parse_identifier(ops, name),
            Token::Number(n) => self.parse_number(n),
            Token::If => self.parse_if(ops),
            Token::For => self.parse_for(ops),
            Token::Var => self.parse_var(ops),
            Token::Kwd('(') => self.parse_paren(ops),
            Token::Kwd('{') => self.parse_block(ops),
            Token::Str(_) => Err(Error::parse("string literals are not expressions")),
            _ => Err(Error::parse("unknown token when expecting an expression")),
        }
    }

    fn parse_unary(&mut self, ops: &OperatorTable) -> Result<Expr> {
        let op = match self.cur {
            Token::Kwd(c) if c.is_ascii() && c != '(' && c != ',' && c != '{' => c,
            _ => return self.parse_primary(ops),
        };
        self.advance()?;
        let operand = self.parse_unary(ops)?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_bin_op_rhs(&mut self, ops: &OperatorTable, min_prec: u32, lhs: Expr) -> Result<Expr> {
        let mut lhs = lhs;
        loop {
            let prec = match self.token_precedence(ops) {
                Some(prec) if prec >= min_prec => prec,
                _ => return Ok(lhs),
            };
            let op = match self.take_operator(ops)? {
                Some(op) => op,
                None => return Ok(lhs),
            };
            let mut rhs = self.parse_unary(ops)?;
            match self.token_precedence(ops) {
                Some(next) if prec < next => {
                    rhs = self.parse_bin_op_rhs(ops, prec + 1, rhs)?;
                }
                _ => {}
            }
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    pub fn parse_expression(&mut self, ops: &OperatorTable) -> Result<Expr> {
        let lhs = self.parse_unary(ops)?;
        self.parse_bin_op_rhs(ops, 0, lhs)
    }

    fn parse_prototype(&mut self, ops: &OperatorTable) -> Result<Prototype> {
        let (kind, op, precedence) = match self.cur.clone() {
            Token::Ident(name) => {
                self.advance()?;
                (ProtoKind::Function, name, 0)
            }
            Token::Unary => {
                self.advance()?;
                self.expect_kwd('@', "expected '@' after unary")?;
                let op = match self.cur {
                    Token::Kwd(c) if c.is_ascii() && c != '(' => c,
                    _ => return Err(Error::parse("expected unary operator")),
                };
                self.advance()?;
                (ProtoKind::Unary, op.to_string(), 0)
            }
            Token::Binary => {
                self.advance()?;
                self.expect_kwd('@', "expected '@' after binary")?;
                let op = self
                    .take_operator(ops)?
                    .ok_or_else(|| Error::parse("expected binary operator"))?;
                let mut precedence = DEFAULT_BINARY_PRECEDENCE;
                if let Token::Number(n) = self.cur {
                    if n < 1.0 || n > 100.0 {
                        return Err(Error::parse("invalid precedence: must be 1..100"));
                    }
                    precedence = n as u32;
                    self.advance()?;
                }
                (ProtoKind::Binary, op, precedence)
            }
            _ => return Err(Error::parse("expected function name in prototype")),
        };

        self.expect_kwd('(', "expected '(' in prototype")?;
        let mut params = Vec::new();
        loop {
            match &self.cur {
                Token::Ident(name) => params.push(name.clone()),
                Token::Kwd(',') if !params.is_empty() => {
                    self.advance()?;
                    match self.cur {
                        Token::Ident(_) => continue,
                        _ => return Err(Error::parse("expected parameter name after ','")),
                    }
                }
                _ => break,
            }
            self.advance()?;
        }
        self.expect_kwd(')', "expected ')' in prototype")?;

        if let Some(arity) = kind.arity() {
            if params.len() != arity {
                return Err(Error::parse("invalid number of operands for operator"));
            }
        }
        let mut params = params.into_iter();
        Ok(match kind {
            ProtoKind::Function => Prototype::new(op, params.collect()),
            ProtoKind::Unary => {
                let c = op.chars().next().unwrap_or_default();
                Prototype::unary(c, params.next().unwrap_or_default())
            }
            ProtoKind::Binary => {
                let lhs = params.next().unwrap_or_default();
                let rhs = params.next().unwrap_or_default();
                Prototype::binary(&op, precedence, lhs, rhs)
            }
        })
    }

    /// `def <prototype> <expr>`
    pub fn parse_definition(&mut self, ops: &OperatorTable) -> Result<Function> {
        self.advance()?;
        let proto = self.parse_prototype(ops)?;
        let body = self.parse_expression(ops)?;
        Ok(Function(proto, body))
    }

    /// `extern <prototype>`
    pub fn parse_extern(&mut self, ops: &OperatorTable) -> Result<Prototype> {
        self.advance()?;
        self.parse_prototype(ops)
    }

    /// Wraps a bare expression into a fresh zero-parameter function.
    pub fn parse_top_level(&mut self, ops: &OperatorTable) -> Result<Function> {
        let body = self.parse_expression(ops)?;
        let name = format!("{}_{}", ANON_EXPR_NAME, self.anon_count);
        self.anon_count += 1;
        Ok(Function(Prototype::new(name, vec![]), body))
    }
}
