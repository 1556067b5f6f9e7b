use failure::{Backtrace, Context, Fail};
use std::fmt;

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

#[derive(Clone, Debug, Eq, PartialEq, Fail)]
pub enum ErrorKind {
    #[fail(display = "lex error: {}", _0)]
    Lex(String),
    #[fail(display = "parse error: {}", _0)]
    Parse(String),
    #[fail(display = "codegen error: {}", _0)]
    Codegen(String),
    #[fail(display = "session error: {}", _0)]
    Session(String),
    #[fail(display = "failed to read '{}'", _0)]
    Io(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.inner.get_context()
    }

    /// Errors that end the session instead of only the current statement.
    pub fn is_fatal(&self) -> bool {
        match self.kind() {
            ErrorKind::Session(_) | ErrorKind::Io(_) => true,
            _ => false,
        }
    }

    pub(crate) fn lex(msg: impl Into<String>) -> Error {
        Error::from(ErrorKind::Lex(msg.into()))
    }

    pub(crate) fn parse(msg: impl Into<String>) -> Error {
        Error::from(ErrorKind::Parse(msg.into()))
    }

    pub(crate) fn codegen(msg: impl Into<String>) -> Error {
        Error::from(ErrorKind::Codegen(msg.into()))
    }

    pub(crate) fn session(msg: impl Into<String>) -> Error {
        Error::from(ErrorKind::Session(msg.into()))
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error { inner }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display() {
        let e = Error::from(ErrorKind::Codegen("unknown variable name 'x'".to_owned()));
        assert_eq!(e.to_string(), "codegen error: unknown variable name 'x'");
        assert!(!e.is_fatal());
    }

    #[test]
    fn test_fatal() {
        assert!(Error::session("duplicate definition").is_fatal());
        assert!(!Error::parse("expected ')'").is_fatal());
    }
}
