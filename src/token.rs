#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Def,
    Extern,
    If,
    Then,
    Else,
    For,
    Var,
    Unary,
    Binary,
    /// `;` that is not the last character of the input.
    ExprEnd,
    Ident(String),
    Number(f64),
    Str(String),
    Kwd(char),
    Eof,
}

impl Token {
    pub(crate) fn keyword(word: &str) -> Option<Token> {
        match word {
            "def" => Some(Token::Def),
            "extern" => Some(Token::Extern),
            "if" => Some(Token::If),
            "then" => Some(Token::Then),
            "else" => Some(Token::Else),
            "for" => Some(Token::For),
            "var" => Some(Token::Var),
            "unary" => Some(Token::Unary),
            "binary" => Some(Token::Binary),
            _ => None,
        }
    }
}
