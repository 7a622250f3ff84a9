use std::{
    error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

pub mod assembler;
pub mod compiler;
pub mod grammar;
pub mod lexer;
pub mod opcodes;
pub mod parser;

pub use assembler::{assemble, Assembler, Bank};
pub use compiler::{compile, Compiled, Compiler, Program};
pub use grammar::{Grammar, Shape, Slot};
pub use lexer::{tokenize, Lexer, Tok, Token};
pub use parser::{parse, Child, Instruction, Parser};

/// Size of one memory bank in bytes.
pub const BANK_SIZE: usize = 256;

pub fn parse_defines<T, U>(s: &str) -> Result<(T, U), Box<dyn error::Error + Send + Sync + 'static>>
where
    T: FromStr,
    T::Err: error::Error + Send + Sync + 'static,
    U: FromStr,
    U::Err: error::Error + Send + Sync + 'static,
{
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid SYMBOL=value: no `=` found in `{s}`"))?;
    Ok((s[..pos].parse()?, s[pos + 1..].parse()?))
}

/// One-indexed source location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
}

impl Pos {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl Display for Pos {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Lexical,
    Structural,
    Semantic,
    Label,
    Layout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    IllegalCharacter,
    UnrecognizedToken,
    EmptyInstruction,
    ReservedLabel,
    ExpectedMnemonic,
    Nesting,
    UnrecognizedGrammar,
    ExpectedDatum,
    ExpectedConstant,
    DuplicateLabel,
    UndefinedLabel,
    VoidBank,
    BankOverflow,
    Overlap,
    Vector,
}

impl ErrorKind {
    pub fn category(self) -> Category {
        match self {
            Self::IllegalCharacter | Self::UnrecognizedToken | Self::EmptyInstruction => {
                Category::Lexical
            }
            Self::ExpectedMnemonic | Self::Nesting => Category::Structural,
            Self::UnrecognizedGrammar | Self::ExpectedDatum | Self::ExpectedConstant => {
                Category::Semantic
            }
            Self::ReservedLabel | Self::DuplicateLabel | Self::UndefinedLabel => Category::Label,
            Self::VoidBank | Self::BankOverflow | Self::Overlap | Self::Vector => Category::Layout,
        }
    }
}

/// A fatal assembly error. The first one raised ends the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub pos: Pos,
    pub msg: String,
}

impl Error {
    pub fn new(kind: ErrorKind, pos: Pos, msg: impl Into<String>) -> Self {
        Self {
            kind,
            pos,
            msg: msg.into(),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.pos, self.msg)
    }
}

impl error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defines_split_on_equals() {
        let (name, value) = parse_defines::<String, u8>("screen=128").unwrap();
        assert_eq!(name, "screen");
        assert_eq!(value, 128);
        assert!(parse_defines::<String, u8>("screen").is_err());
        assert!(parse_defines::<String, u8>("screen=256").is_err());
    }

    #[test]
    fn error_display_carries_location() {
        let err = Error::new(ErrorKind::Nesting, Pos::new(3, 7), "oops");
        assert_eq!(err.to_string(), "3:7: oops");
        assert_eq!(err.kind.category(), Category::Structural);
    }
}
