use std::{
    fmt::{self, Display, Formatter},
    mem,
};

use crate::{Error, ErrorKind, Pos};

/// Token types. The set is closed: every lexeme classifies as exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tok {
    Mnemonic,
    Index,
    Status,
    Pointer,
    Digit,
    Decimal,
    Hexadecimal,
    Character,
    String,
    Reference,
    Assignment,
    Loop,
    Skip,
    Newline,
    Opener,
    Closer,
    Terminator,
    Eof,
}

impl Tok {
    pub fn name(self) -> &'static str {
        match self {
            Self::Mnemonic => "Mnemonic",
            Self::Index => "Index",
            Self::Status => "Status",
            Self::Pointer => "Pointer",
            Self::Digit => "Digit",
            Self::Decimal => "Decimal",
            Self::Hexadecimal => "Hexadecimal",
            Self::Character => "Character",
            Self::String => "String",
            Self::Reference => "Reference",
            Self::Assignment => "Assignment",
            Self::Loop => "Loop",
            Self::Skip => "Skip",
            Self::Newline => "Newline",
            Self::Opener => "Opener",
            Self::Closer => "Closer",
            Self::Terminator => "Terminator",
            Self::Eof => "EOF",
        }
    }

    pub fn is_vector(self) -> bool {
        matches!(self, Self::Loop | Self::Skip)
    }

    /// Literals whose value is known without looking anything up.
    pub fn is_constant(self) -> bool {
        matches!(
            self,
            Self::Digit | Self::Decimal | Self::Hexadecimal | Self::Character
        )
    }
}

impl Display for Tok {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub tok: Tok,
    pub value: String,
    pub pos: Pos,
}

impl Token {
    pub fn new(tok: Tok, value: impl Into<String>, pos: Pos) -> Self {
        Self {
            tok,
            value: value.into(),
            pos,
        }
    }

    /// The byte value of a constant literal. Negative decimals wrap (`-1` is `255`).
    pub fn number(&self) -> Option<u8> {
        match self.tok {
            Tok::Digit | Tok::Decimal => self
                .value
                .parse::<i16>()
                .ok()
                .map(|n| n.rem_euclid(256) as u8),
            Tok::Hexadecimal => u8::from_str_radix(self.value.get(1..)?, 16).ok(),
            Tok::Character => match self.value.as_bytes() {
                &[c] => Some(c),
                _ => CONTROL_CHARACTERS
                    .iter()
                    .find_map(|(name, code)| (*name == self.value).then_some(*code)),
            },
            _ => None,
        }
    }

    /// Step count of a vector (`<<<` is 3).
    pub fn steps(&self) -> usize {
        self.value.len()
    }
}

pub const DIRECTIVES: &[&str] = &["LOCATE", "DATA", "ASSIGN"];

#[rustfmt::skip]
pub const MNEMONICS: &[&str] = &[
    "nop", "return", "reset", "halt", "done",
    "jump", "fork", "call", "race", "nudge", "lock", "free",
    "set", "clear", "copy", "sync", "load", "store",
    "inc", "dec", "add", "sub", "addfx", "subfx", "mul", "div", "mod",
    "and", "or", "xor", "zsh", "ssh", "lsh", "rot",
    "eq", "gt", "lt", "neq", "ngt", "nlt",
    "not", "clz", "ctz", "nsa", "truthy", "falsey",
    "push", "pop", "drop", "dupe", "swap", "peek", "void",
    "queue", "flush", "drain", "array", "length",
    "databank", "codebank", "stackbank", "iobank",
    "copydata", "copycode", "copystack", "copyio",
];

pub const INDICES: &[&str] = &["x", "y", "z"];
pub const STATUSES: &[&str] = &["pc", "sp", "fx"];
pub const POINTERS: &[&str] = &["cb", "sb", "db"];

#[rustfmt::skip]
pub const CONTROL_CHARACTERS: &[(&str, u8)] = &[
    ("NUL", 0x00), ("SOH", 0x01), ("STX", 0x02), ("ETX", 0x03),
    ("EOT", 0x04), ("ENQ", 0x05), ("ACK", 0x06), ("BEL", 0x07),
    ("BS", 0x08),  ("HT", 0x09),  ("LF", 0x0A),  ("VT", 0x0B),
    ("FF", 0x0C),  ("CR", 0x0D),  ("SO", 0x0E),  ("SI", 0x0F),
    ("DLE", 0x10), ("DC1", 0x11), ("DC2", 0x12), ("DC3", 0x13),
    ("DC4", 0x14), ("NAK", 0x15), ("SYN", 0x16), ("ETB", 0x17),
    ("CAN", 0x18), ("EM", 0x19),  ("SUB", 0x1A), ("ESC", 0x1B),
    ("FS", 0x1C),  ("GS", 0x1D),  ("RS", 0x1E),  ("US", 0x1F),
    ("DEL", 0x7F),
];

/// Words of the language, which can never be used as labels.
pub fn is_word(s: &str) -> bool {
    is_mnemonic(s) || is_index(s) || is_status(s) || is_pointer(s)
}

fn is_mnemonic(s: &str) -> bool {
    MNEMONICS.contains(&s) || DIRECTIVES.contains(&s)
}

fn is_index(s: &str) -> bool {
    INDICES.contains(&s)
}

fn is_status(s: &str) -> bool {
    STATUSES.contains(&s)
}

fn is_pointer(s: &str) -> bool {
    POINTERS.contains(&s)
}

fn is_digit(s: &str) -> bool {
    s.len() == 1 && s.as_bytes()[0].is_ascii_digit()
}

fn is_decimal(s: &str) -> bool {
    let bytes = s.as_bytes();
    if !(2..=4).contains(&bytes.len()) || !b"+-".contains(&bytes[0]) || s == "-0" {
        return false;
    }
    if !bytes[1..].iter().all(u8::is_ascii_digit) {
        return false;
    }
    s.parse::<i16>()
        .is_ok_and(|n| (-128..=255).contains(&n))
}

fn is_hexadecimal(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 3
        && bytes[0] == b'#'
        && bytes[1..]
            .iter()
            .all(|c| c.is_ascii_digit() || (b'A'..=b'F').contains(c))
}

fn is_character(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() < 3 || bytes[0] != b'\'' || bytes[bytes.len() - 1] != b'\'' {
        return false;
    }
    let inner = &s[1..s.len() - 1];
    match inner.as_bytes() {
        &[c] => (b' '..=b'~').contains(&c),
        _ => CONTROL_CHARACTERS.iter().any(|(name, _)| *name == inner),
    }
}

fn is_run(s: &str, c: u8, max: usize) -> bool {
    (1..=max).contains(&s.len()) && s.bytes().all(|b| b == c)
}

fn is_loop(s: &str) -> bool {
    is_run(s, b'<', 4)
}

fn is_skip(s: &str) -> bool {
    is_run(s, b'>', 4)
}

fn is_newline(s: &str) -> bool {
    is_run(s, b'|', 2)
}

fn is_reference(s: &str) -> bool {
    let bytes = s.as_bytes();
    !bytes.is_empty()
        && bytes[0].is_ascii_alphabetic()
        && bytes[1..].iter().all(u8::is_ascii_alphanumeric)
}

fn is_assignment(s: &str) -> bool {
    s.strip_suffix(':').is_some_and(is_reference)
}

// first match wins
const CLASSIFIERS: &[(Tok, fn(&str) -> bool)] = &[
    (Tok::Mnemonic, is_mnemonic),
    (Tok::Index, is_index),
    (Tok::Status, is_status),
    (Tok::Pointer, is_pointer),
    (Tok::Digit, is_digit),
    (Tok::Decimal, is_decimal),
    (Tok::Hexadecimal, is_hexadecimal),
    (Tok::Character, is_character),
    (Tok::Loop, is_loop),
    (Tok::Skip, is_skip),
    (Tok::Newline, is_newline),
    (Tok::Reference, is_reference),
    (Tok::Assignment, is_assignment),
];

const IRREGULARS: &[u8] = b" \n,[]";

fn legal(c: u8) -> bool {
    c == b'\n' || (0x20..=0x7F).contains(&c)
}

fn illegal(c: u8, pos: Pos) -> Error {
    Error::new(
        ErrorKind::IllegalCharacter,
        pos,
        format!("cannot scan charcode, 0x{c:02X}"),
    )
}

fn unrecognized(value: &str, pos: Pos) -> Error {
    Error::new(
        ErrorKind::UnrecognizedToken,
        pos,
        format!("unrecognized token, {value}"),
    )
}

struct PeekReader<'a> {
    bytes: &'a [u8],
    index: usize,
    line: usize,
    column: usize,
}

impl<'a> PeekReader<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            bytes: source.as_bytes(),
            index: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.bytes.get(self.index + 1).copied()
    }

    fn eat(&mut self) {
        self.column += 1;
        if let Some(b'\n') = self.peek() {
            self.line += 1;
            self.column = 1;
        }
        self.index += 1;
    }

    fn pos(&self) -> Pos {
        Pos::new(self.line, self.column)
    }

    /// Peek at the next character that continues a regular run, rejecting illegal ones.
    fn peek_regular(&self) -> Result<Option<u8>, Error> {
        match self.peek() {
            Some(c) if IRREGULARS.contains(&c) => Ok(None),
            Some(c) if !legal(c) => Err(illegal(c, self.pos())),
            c => Ok(c),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Previous {
    Nothing,
    Lexeme,
    Comma,
    Newline,
}

/// Lazy token stream over one source string.
///
/// Always ends with a single `Terminator` (unless the source already ended
/// with one) and one `Eof`, then yields `None`. After an error the stream
/// is exhausted.
pub struct Lexer<'a> {
    reader: PeekReader<'a>,
    previous: Previous,
    terminated: bool,
    done: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            reader: PeekReader::new(source),
            previous: Previous::Nothing,
            terminated: false,
            done: false,
        }
    }

    fn scan(&mut self) -> Result<Token, Error> {
        loop {
            let pos = self.reader.pos();
            let Some(c) = self.reader.peek() else {
                return self.finish(pos);
            };
            if !legal(c) {
                return Err(illegal(c, pos));
            }
            match c {
                b' ' => self.reader.eat(),
                b'/' if self.reader.peek_next() == Some(b'/') => self.comment()?,
                b'\n' | b',' => {
                    self.reader.eat();
                    if let Some(token) = self.terminate(c, pos)? {
                        return Ok(token);
                    }
                }
                b'[' => {
                    self.reader.eat();
                    self.previous = Previous::Lexeme;
                    return Ok(Token::new(Tok::Opener, "[", pos));
                }
                b']' => {
                    self.reader.eat();
                    self.previous = Previous::Lexeme;
                    return Ok(Token::new(Tok::Closer, "]", pos));
                }
                b'\'' => return self.character(pos),
                b'"' => return self.string(pos),
                _ => return self.word(pos),
            }
        }
    }

    fn finish(&mut self, pos: Pos) -> Result<Token, Error> {
        if !self.terminated {
            self.terminated = true;
            if let Some(token) = self.terminate(b'\n', pos)? {
                return Ok(token);
            }
        }
        self.done = true;
        Ok(Token::new(Tok::Eof, ";", pos))
    }

    fn terminate(&mut self, c: u8, pos: Pos) -> Result<Option<Token>, Error> {
        let next = if c == b',' {
            Previous::Comma
        } else {
            Previous::Newline
        };
        match mem::replace(&mut self.previous, next) {
            Previous::Lexeme => Ok(Some(Token::new(Tok::Terminator, ";", pos))),
            Previous::Nothing | Previous::Newline if c == b'\n' => Ok(None),
            _ => Err(Error::new(
                ErrorKind::EmptyInstruction,
                pos,
                "empty instruction",
            )),
        }
    }

    fn comment(&mut self) -> Result<(), Error> {
        while let Some(c) = self.reader.peek() {
            if c == b'\n' {
                break;
            }
            if !legal(c) {
                return Err(illegal(c, self.reader.pos()));
            }
            self.reader.eat();
        }
        Ok(())
    }

    fn word(&mut self, pos: Pos) -> Result<Token, Error> {
        let mut value = String::new();
        while let Some(c) = self.reader.peek_regular()? {
            value.push(c as char);
            self.reader.eat();
        }
        self.classify(&value, pos)
    }

    fn classify(&mut self, value: &str, pos: Pos) -> Result<Token, Error> {
        self.previous = Previous::Lexeme;
        let tok = CLASSIFIERS
            .iter()
            .find_map(|(tok, test)| test(value).then_some(*tok))
            .ok_or_else(|| unrecognized(value, pos))?;
        match tok {
            Tok::Assignment => {
                let label = &value[..value.len() - 1];
                if is_word(label) {
                    return Err(Error::new(
                        ErrorKind::ReservedLabel,
                        pos,
                        format!("a language word ({label}) cannot be used as a label."),
                    ));
                }
                Ok(Token::new(tok, label, pos))
            }
            Tok::Character => Ok(Token::new(tok, &value[1..value.len() - 1], pos)),
            _ => Ok(Token::new(tok, value, pos)),
        }
    }

    /// A literal must be followed by whitespace, a special or the end of input.
    fn close_quote(&mut self, value: &str, pos: Pos) -> Result<(), Error> {
        let mut raw = value.to_string();
        while let Some(c) = self.reader.peek_regular()? {
            raw.push(c as char);
            self.reader.eat();
        }
        if raw != value {
            return Err(unrecognized(&raw, pos));
        }
        Ok(())
    }

    fn character(&mut self, pos: Pos) -> Result<Token, Error> {
        let mut value = String::from("'");
        self.reader.eat();
        while let Some(c) = self.reader.peek() {
            if c == b'\'' || c == b'\n' {
                break;
            }
            if !legal(c) {
                return Err(illegal(c, self.reader.pos()));
            }
            value.push(c as char);
            self.reader.eat();
        }
        if self.reader.peek() != Some(b'\'') {
            return Err(unrecognized(&value, pos));
        }
        value.push('\'');
        self.reader.eat();
        // the quote character itself is spelled with three quotes
        if value == "''" {
            if self.reader.peek() != Some(b'\'') {
                return Err(unrecognized(&value, pos));
            }
            value.push('\'');
            self.reader.eat();
        }
        self.close_quote(&value, pos)?;
        self.classify(&value, pos)
    }

    fn string(&mut self, pos: Pos) -> Result<Token, Error> {
        let mut raw = String::from("\"");
        let mut content = String::new();
        self.reader.eat();
        loop {
            match self.reader.peek() {
                None | Some(b'\n') => return Err(unrecognized(&raw, pos)),
                Some(b'"') => {
                    raw.push('"');
                    self.reader.eat();
                    break;
                }
                Some(b'\\') => {
                    raw.push('\\');
                    self.reader.eat();
                    let escaped = match self.reader.peek() {
                        Some(b'n') => '\n',
                        Some(b'\\') => '\\',
                        Some(b'"') => '"',
                        _ => return Err(unrecognized(&raw, pos)),
                    };
                    raw.push(self.reader.peek().unwrap_or_default() as char);
                    content.push(escaped);
                    self.reader.eat();
                }
                Some(c) if (b' '..=b'~').contains(&c) => {
                    raw.push(c as char);
                    content.push(c as char);
                    self.reader.eat();
                }
                Some(c) if !legal(c) => return Err(illegal(c, self.reader.pos())),
                Some(c) => {
                    raw.push(c as char);
                    return Err(unrecognized(&raw, pos));
                }
            }
        }
        if content.is_empty() {
            return Err(unrecognized(&raw, pos));
        }
        self.close_quote(&raw, pos)?;
        self.previous = Previous::Lexeme;
        Ok(Token::new(Tok::String, content, pos))
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = self.scan();
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

pub fn tokenize(source: &str) -> Lexer<'_> {
    Lexer::new(source)
}
