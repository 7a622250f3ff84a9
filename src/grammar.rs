//! Shape-keyed instruction dispatch.
//!
//! Every instruction is reduced to a [`Shape`]: its mnemonic plus the token
//! types of its arguments, with bracketed arguments kept as nested groups.
//! Handlers are registered against shapes that may use the abstract
//! `<Register>` and `<Number>` classes; those are expanded into every
//! concrete combination before storage, so lookups are exact matches on
//! fully concrete shapes.

use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
    iter::Peekable,
    str::{Chars, FromStr},
    sync::Arc,
};

use crate::{
    lexer::{Tok, Token},
    parser::{Child, Instruction},
    Error, ErrorKind, Pos,
};

pub const REGISTERS: &[Tok] = &[Tok::Index, Tok::Status, Tok::Pointer];

pub const NUMBERS: &[Tok] = &[
    Tok::Digit,
    Tok::Decimal,
    Tok::Hexadecimal,
    Tok::Character,
    Tok::Reference,
    Tok::Loop,
    Tok::Skip,
];

// token types that can appear as instruction arguments
const ARGUMENTS: &[Tok] = &[
    Tok::Index,
    Tok::Status,
    Tok::Pointer,
    Tok::Digit,
    Tok::Decimal,
    Tok::Hexadecimal,
    Tok::Character,
    Tok::String,
    Tok::Reference,
    Tok::Loop,
    Tok::Skip,
    Tok::Newline,
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Arg {
    Tok(Tok),
    Group(Vec<Arg>),
    /// Any of [`REGISTERS`]. Only valid in declarations.
    Register,
    /// Any of [`NUMBERS`]. Only valid in declarations.
    Number,
}

impl Arg {
    fn members(&self) -> &'static [Tok] {
        match self {
            Self::Register => REGISTERS,
            Self::Number => NUMBERS,
            _ => &[],
        }
    }

    fn of(child: &Child) -> Self {
        match child {
            Child::Token(token) => Self::Tok(token.tok),
            Child::Group(children) => Self::Group(children.iter().map(Self::of).collect()),
        }
    }
}

impl Display for Arg {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tok(tok) => write!(f, "<{tok}>"),
            Self::Register => f.write_str("<Register>"),
            Self::Number => f.write_str("<Number>"),
            Self::Group(args) => {
                f.write_str("[")?;
                write_args(f, args)?;
                f.write_str("]")
            }
        }
    }
}

fn write_args(f: &mut Formatter<'_>, args: &[Arg]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

/// The structural signature of an instruction, used as the dispatch key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    pub mnemonic: String,
    pub args: Vec<Arg>,
}

impl Shape {
    pub fn new(mnemonic: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            mnemonic: mnemonic.into(),
            args,
        }
    }

    /// The concrete shape of a parsed instruction. `DATA` takes any arguments,
    /// so its shape is the bare mnemonic.
    pub fn of(instruction: &Instruction) -> Self {
        if instruction.mnemonic == "DATA" {
            return Self::new("DATA", Vec::new());
        }
        Self::new(
            instruction.mnemonic.as_str(),
            instruction.children.iter().map(Arg::of).collect(),
        )
    }

    pub fn is_concrete(&self) -> bool {
        first_abstract(&self.args).is_none()
    }

    /// Replace the first abstract class with each of its members, recursively,
    /// until only concrete shapes remain.
    pub fn expand(self) -> Vec<Shape> {
        let Some(path) = first_abstract(&self.args) else {
            return vec![self];
        };
        let members = arg_at(&self.args, &path).members();
        members
            .iter()
            .flat_map(|tok| {
                let mut shape = self.clone();
                *arg_at_mut(&mut shape.args, &path) = Arg::Tok(*tok);
                shape.expand()
            })
            .collect()
    }
}

fn first_abstract(args: &[Arg]) -> Option<Vec<usize>> {
    for (i, arg) in args.iter().enumerate() {
        match arg {
            Arg::Register | Arg::Number => return Some(vec![i]),
            Arg::Group(inner) => {
                if let Some(mut path) = first_abstract(inner) {
                    path.insert(0, i);
                    return Some(path);
                }
            }
            Arg::Tok(_) => {}
        }
    }
    None
}

fn arg_at<'a>(args: &'a [Arg], path: &[usize]) -> &'a Arg {
    match path {
        [index] => &args[*index],
        [index, rest @ ..] => match &args[*index] {
            Arg::Group(inner) => arg_at(inner, rest),
            _ => unreachable!(),
        },
        [] => unreachable!(),
    }
}

fn arg_at_mut<'a>(args: &'a mut [Arg], path: &[usize]) -> &'a mut Arg {
    match path {
        [index] => &mut args[*index],
        [index, rest @ ..] => match &mut args[*index] {
            Arg::Group(inner) => arg_at_mut(inner, rest),
            _ => unreachable!(),
        },
        [] => unreachable!(),
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mnemonic)?;
        if !self.args.is_empty() {
            f.write_str(" ")?;
            write_args(f, &self.args)?;
        }
        Ok(())
    }
}

impl FromStr for Shape {
    type Err = String;

    /// Parses the rendered form, e.g. `load <Index> [<Number>]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (mnemonic, rest) = s.split_once(' ').unwrap_or((s, ""));
        if mnemonic.is_empty() {
            return Err("pattern has no mnemonic".to_string());
        }
        let mut chars = rest.chars().peekable();
        let args = parse_args(&mut chars, false)?;
        Ok(Self::new(mnemonic, args))
    }
}

fn parse_args(chars: &mut Peekable<Chars<'_>>, nested: bool) -> Result<Vec<Arg>, String> {
    let mut args = Vec::new();
    while let Some(c) = chars.next() {
        match c {
            ' ' => {}
            '[' => args.push(Arg::Group(parse_args(chars, true)?)),
            ']' if nested => return Ok(args),
            '<' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('>') => break,
                        Some(c) => name.push(c),
                        None => return Err(format!("unclosed class `<{name}`")),
                    }
                }
                args.push(match name.as_str() {
                    "Register" => Arg::Register,
                    "Number" => Arg::Number,
                    _ => ARGUMENTS
                        .iter()
                        .find(|tok| tok.name() == name)
                        .map(|tok| Arg::Tok(*tok))
                        .ok_or_else(|| format!("unknown class `<{name}>`"))?,
                });
            }
            c => return Err(format!("unexpected `{c}` in pattern")),
        }
    }
    if nested {
        return Err("unclosed group".to_string());
    }
    Ok(args)
}

/// Builds a [`Shape`] from a mnemonic and its argument classes:
/// `shape!("load", Index, [Number, Index])`.
#[macro_export]
macro_rules! shape {
    ($mnemonic:expr $(, $arg:tt)* $(,)?) => {
        $crate::grammar::Shape::new($mnemonic, vec![$($crate::shape_arg!($arg)),*])
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! shape_arg {
    ([$($inner:tt),* $(,)?]) => {
        $crate::grammar::Arg::Group(vec![$($crate::shape_arg!($inner)),*])
    };
    (Register) => {
        $crate::grammar::Arg::Register
    };
    (Number) => {
        $crate::grammar::Arg::Number
    };
    ($tok:ident) => {
        $crate::grammar::Arg::Tok($crate::lexer::Tok::$tok)
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Backward,
    Forward,
}

/// One output byte position. Labels and vectors stay pending until every
/// instruction has been compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Byte(u8),
    Label {
        name: String,
        pos: Pos,
    },
    Vector {
        direction: Direction,
        steps: usize,
        pos: Pos,
    },
}

type Encode = dyn Fn(&Instruction) -> Result<Vec<Slot>, Error> + Send + Sync;

#[derive(Clone)]
pub struct Handler(Arc<Encode>);

impl Handler {
    pub fn encode(&self, instruction: &Instruction) -> Result<Vec<Slot>, Error> {
        (self.0)(instruction)
    }
}

/// The dispatch table. Built once, then only read.
#[derive(Clone, Default)]
pub struct Grammar {
    handlers: HashMap<Shape, Handler>,
}

impl Grammar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `encode` for every concrete expansion of every pattern.
    pub fn register<I, F>(&mut self, patterns: I, encode: F)
    where
        I: IntoIterator<Item = Shape>,
        F: Fn(&Instruction) -> Result<Vec<Slot>, Error> + Send + Sync + 'static,
    {
        let handler = Handler(Arc::new(encode));
        for pattern in patterns {
            for shape in pattern.expand() {
                self.handlers.insert(shape, handler.clone());
            }
        }
    }

    /// Register a constant single-byte encoding.
    pub fn opcode<I>(&mut self, patterns: I, opcode: u8)
    where
        I: IntoIterator<Item = Shape>,
    {
        self.register(patterns, move |_| Ok(vec![Slot::Byte(opcode)]));
    }

    pub fn get(&self, shape: &Shape) -> Option<&Handler> {
        self.handlers.get(shape)
    }

    pub fn lookup(&self, instruction: &Instruction) -> Result<&Handler, Error> {
        let shape = Shape::of(instruction);
        self.get(&shape).ok_or_else(|| {
            Error::new(
                ErrorKind::UnrecognizedGrammar,
                instruction.pos,
                format!("incomprehensible grammar, {shape}"),
            )
        })
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn shapes(&self) -> impl Iterator<Item = &Shape> {
        self.handlers.keys()
    }
}

/// The `index`th argument, which the matched shape guarantees is a token.
pub fn operand(instruction: &Instruction, index: usize) -> &Token {
    match &instruction.children[index] {
        Child::Token(token) => token,
        Child::Group(_) => unreachable!("argument {index} is a group"),
    }
}

/// The `inner`th token of the bracketed `index`th argument.
pub fn indirect(instruction: &Instruction, index: usize, inner: usize) -> &Token {
    match &instruction.children[index] {
        Child::Group(children) => match &children[inner] {
            Child::Token(token) => token,
            Child::Group(_) => unreachable!("argument {index}.{inner} is a group"),
        },
        Child::Token(_) => unreachable!("argument {index} is not a group"),
    }
}

const ENCODABLE_REGISTERS: &[&str] = &["x", "y", "z", "pc", "sp", "fx"];

/// Offset a base opcode by the register's enumeration.
pub fn reg(base: u8, register: &Token) -> u8 {
    let index = ENCODABLE_REGISTERS
        .iter()
        .position(|name| *name == register.value)
        .unwrap_or_else(|| unreachable!("register `{}` has no encoding", register.value));
    base + index as u8
}

/// The slot for a numeric argument. References and vectors stay pending.
pub fn num(literal: &Token) -> Slot {
    match literal.tok {
        Tok::Reference => Slot::Label {
            name: literal.value.clone(),
            pos: literal.pos,
        },
        Tok::Loop | Tok::Skip => Slot::Vector {
            direction: if literal.tok == Tok::Loop {
                Direction::Backward
            } else {
                Direction::Forward
            },
            steps: literal.steps(),
            pos: literal.pos,
        },
        tok => Slot::Byte(
            literal
                .number()
                .unwrap_or_else(|| unreachable!("{tok} is not a number")),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn instruction(source: &str) -> Instruction {
        parse(source).next().unwrap().unwrap()
    }

    fn shape(s: &str) -> Shape {
        s.parse().unwrap()
    }

    #[test]
    fn renders_instruction_shapes() {
        let cases = [
            ("halt", "halt"),
            ("add 5", "add <Digit>"),
            ("load x [#80]", "load <Index> [<Hexadecimal>]"),
            ("store [+3 y]", "store [<Decimal> <Index>]"),
            ("inc []", "inc []"),
            ("jump <<", "jump <Loop>"),
            ("DATA 1 \"two\" |", "DATA"),
        ];
        for (source, rendered) in cases {
            assert_eq!(Shape::of(&instruction(source)).to_string(), rendered);
        }
    }

    #[test]
    fn parses_rendered_patterns() {
        let parsed = shape("load <Index> [<Number> <Register>]");
        assert_eq!(parsed, crate::shape!("load", Index, [Number, Register]));
        assert_eq!(parsed.to_string(), "load <Index> [<Number> <Register>]");
        assert_eq!(shape("inc []"), crate::shape!("inc", []));
        assert!("load <Bogus>".parse::<Shape>().is_err());
        assert!("load [<Index>".parse::<Shape>().is_err());
        assert!("load ]".parse::<Shape>().is_err());
    }

    #[test]
    fn expands_number_into_every_literal() {
        let shapes: Vec<String> = crate::shape!("add", Number)
            .expand()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            shapes,
            vec![
                "add <Digit>",
                "add <Decimal>",
                "add <Hexadecimal>",
                "add <Character>",
                "add <Reference>",
                "add <Loop>",
                "add <Skip>",
            ]
        );
    }

    #[test]
    fn expands_nested_and_repeated_classes() {
        let shapes = crate::shape!("load", Register, [Number, Register]).expand();
        assert_eq!(shapes.len(), 3 * 7 * 3);
        assert!(shapes.iter().all(Shape::is_concrete));
        assert!(shapes.contains(&shape("load <Pointer> [<Skip> <Status>]")));
        // first occurrence is substituted first
        assert_eq!(shapes[0], shape("load <Index> [<Digit> <Index>]"));
        assert_eq!(shapes[1], shape("load <Index> [<Digit> <Status>]"));
    }

    #[test]
    fn every_expansion_reaches_the_same_handler() {
        let mut grammar = Grammar::new();
        grammar.register([crate::shape!("add", Number)], |i| {
            Ok(vec![Slot::Byte(0x5D), num(operand(i, 0))])
        });
        assert_eq!(grammar.len(), NUMBERS.len());
        assert!(grammar.shapes().all(Shape::is_concrete));
        assert!(grammar.shapes().any(|s| s.to_string() == "add <Skip>"));
        for source in ["add 1", "add -1", "add #01", "add 'a'", "add top", "add <", "add >>"] {
            let i = instruction(source);
            let code = grammar.lookup(&i).unwrap().encode(&i).unwrap();
            assert_eq!(code[0], Slot::Byte(0x5D));
        }
        assert!(grammar.get(&shape("add <Register>")).is_none());
    }

    #[test]
    fn constants_wrap_into_single_bytes() {
        let mut grammar = Grammar::new();
        grammar.opcode([crate::shape!("halt")], 0x01);
        let i = instruction("halt");
        assert_eq!(
            grammar.lookup(&i).unwrap().encode(&i).unwrap(),
            vec![Slot::Byte(0x01)]
        );
    }

    #[test]
    fn unknown_shapes_are_semantic_errors() {
        let grammar = Grammar::new();
        let i = instruction("\n  add x y");
        let err = grammar.lookup(&i).err().unwrap();
        assert_eq!(err.kind, ErrorKind::UnrecognizedGrammar);
        assert_eq!(err.msg, "incomprehensible grammar, add <Index> <Index>");
        assert_eq!(err.pos, Pos::new(2, 3));
    }

    #[test]
    fn operand_helpers() {
        let i = instruction("load y [#80 z]");
        assert_eq!(reg(0x43, operand(&i, 0)), 0x44);
        assert_eq!(num(indirect(&i, 1, 0)), Slot::Byte(0x80));
        assert_eq!(reg(0x40, indirect(&i, 1, 1)), 0x42);
        let i = instruction("jump <<<");
        assert_eq!(
            num(operand(&i, 0)),
            Slot::Vector {
                direction: Direction::Backward,
                steps: 3,
                pos: Pos::new(1, 6),
            }
        );
    }
}
