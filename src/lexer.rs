use super::error::{Error, Result};
use super::token::Token;
use combine::error::ParseError;
use combine::parser::char::space;
use combine::parser::Parser;
use combine::stream::Stream;
use combine::{any, choice, eof, many, many1, optional, satisfy, skip_many, token};

/// Raw spelling of one token, before keyword and literal checks.
#[derive(Debug, PartialEq)]
enum Lexeme {
    Word(String),
    Digits(String),
    Quoted(String, bool),
    Punct(char),
    End,
}

fn comment<Input>() -> impl Parser<Input, Output = ()>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    (
        token('#'),
        skip_many(satisfy(|c: char| c != '\n' && c != '\r')),
    )
        .map(|_| ())
}

fn trivia<Input>() -> impl Parser<Input, Output = ()>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    skip_many(choice((space().map(|_| ()), comment())))
}

fn word<Input>() -> impl Parser<Input, Output = String>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    (
        satisfy(|c: char| c.is_ascii_alphabetic()),
        many::<String, _, _>(satisfy(|c: char| c.is_ascii_alphanumeric() || c == '_')),
    )
        .map(|(first, rest): (char, String)| {
            let mut w = String::with_capacity(rest.len() + 1);
            w.push(first);
            w.push_str(&rest);
            w
        })
}

fn digits<Input>() -> impl Parser<Input, Output = String>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    many1::<String, _, _>(satisfy(|c: char| c.is_ascii_digit() || c == '.'))
}

fn quoted<Input>() -> impl Parser<Input, Output = (String, bool)>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    token('"').with((
        many::<String, _, _>(satisfy(|c: char| c != '"')),
        optional(token('"')).map(|close: Option<char>| close.is_some()),
    ))
}

fn lexeme<Input>() -> impl Parser<Input, Output = Lexeme>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    choice((
        word().map(Lexeme::Word),
        digits().map(Lexeme::Digits),
        quoted().map(|(text, closed)| Lexeme::Quoted(text, closed)),
        eof().map(|_| Lexeme::End),
        any().map(Lexeme::Punct),
    ))
}

/// Lexer position saved before a lookahead probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Checkpoint {
    pos: usize,
    token_start: usize,
}

/// Pull lexer over a whole source text. Each call to `next_token` yields one token.
pub struct Lexer {
    source: String,
    pos: usize,
    token_start: usize,
}

impl Lexer {
    pub fn new(source: impl Into<String>) -> Lexer {
        Lexer {
            source: source.into(),
            pos: 0,
            token_start: 0,
        }
    }

    /// Byte offset just past the last token produced.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Byte offset where the last token produced began.
    pub fn token_start(&self) -> usize {
        self.token_start
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pos: self.pos,
            token_start: self.token_start,
        }
    }

    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.pos = checkpoint.pos;
        self.token_start = checkpoint.token_start;
    }

    pub fn next_token(&mut self) -> Result<Token> {
        let input = &self.source[self.pos..];
        let (_, input) = trivia()
            .parse(input)
            .map_err(|e| Error::lex(e.to_string()))?;
        self.token_start = self.source.len() - input.len();
        let (lexeme, rest) = lexeme()
            .parse(input)
            .map_err(|e| Error::lex(e.to_string()))?;
        let at_end = rest.is_empty();
        self.pos = self.source.len() - rest.len();

        match lexeme {
            Lexeme::Word(w) => Ok(Token::keyword(&w).unwrap_or(Token::Ident(w))),
            Lexeme::Digits(d) => d
                .parse::<f64>()
                .map(Token::Number)
                .map_err(|_| Error::lex(format!("malformed number literal '{}'", d))),
            Lexeme::Quoted(text, true) => Ok(Token::Str(text)),
            Lexeme::Quoted(text, false) => Err(Error::lex(format!(
                "unterminated string literal \"{}",
                text
            ))),
            Lexeme::Punct(';') if at_end => Ok(Token::Eof),
            Lexeme::Punct(';') => Ok(Token::ExprEnd),
            Lexeme::Punct(c) => Ok(Token::Kwd(c)),
            Lexeme::End => Ok(Token::Eof),
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::error::ErrorKind;
    use super::super::token::Token::*;
    use super::*;

    fn lex_all(s: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(s);
        let mut tokens = Vec::new();
        loop {
            match lexer.next_token().unwrap() {
                Eof => break,
                t => tokens.push(t),
            }
        }
        tokens
    }

    #[test]
    fn test_number() {
        assert_eq!(
            digits().parse("1.0").map(|x| x.0),
            Ok("1.0".to_owned())
        );
        assert_eq!(lex_all("1.0 .5"), vec![Number(1.0), Number(0.5)]);
    }

    #[test]
    fn test_malformed_number() {
        let mut lexer = Lexer::new("1.2.3 4");
        let err = lexer.next_token().unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Lex("malformed number literal '1.2.3'".to_owned())
        );
        assert_eq!(lexer.next_token().unwrap(), Number(4.0));
    }

    #[test]
    fn test_ident() {
        assert_eq!(
            word().parse("test_1 x").map(|x| x.0),
            Ok("test_1".to_owned())
        );
        assert_eq!(
            lex_all("def extern if then else for var unary binary foo"),
            vec![
                Def,
                Extern,
                If,
                Then,
                Else,
                For,
                Var,
                Unary,
                Binary,
                Ident("foo".to_owned())
            ]
        );
    }

    #[test]
    fn test_comment() {
        assert_eq!(comment().parse("#hoge").map(|x| x.0), Ok(()));
        assert_eq!(
            lex_all(
                r#"#comment
1.0 # trailing
"#
            ),
            vec![Number(1.0)]
        );
    }

    #[test]
    fn test_string() {
        assert_eq!(lex_all(r#""a b" x"#), vec![Str("a b".to_owned()), Ident("x".to_owned())]);
        let mut lexer = Lexer::new(r#""open"#);
        assert!(lexer.next_token().is_err());
        assert_eq!(lexer.next_token().unwrap(), Eof);
    }

    #[test]
    fn test_terminator() {
        assert_eq!(
            lex_all("a; b;"),
            vec![Ident("a".to_owned()), ExprEnd, Ident("b".to_owned())]
        );
        assert_eq!(lex_all("a;\n"), vec![Ident("a".to_owned()), ExprEnd]);
    }

    #[test]
    fn test_punct_is_single_char() {
        assert_eq!(lex_all("<<="), vec![Kwd('<'), Kwd('<'), Kwd('=')]);
    }

    #[test]
    fn test_checkpoint() {
        let mut lexer = Lexer::new("a + b");
        assert_eq!(lexer.next_token().unwrap(), Ident("a".to_owned()));
        let cp = lexer.checkpoint();
        assert_eq!(lexer.next_token().unwrap(), Kwd('+'));
        assert_eq!(lexer.token_start(), 2);
        lexer.restore(cp);
        assert_eq!(lexer.position(), 1);
        assert_eq!(lexer.next_token().unwrap(), Kwd('+'));
        assert_eq!(lexer.next_token().unwrap(), Ident("b".to_owned()));
    }
}
