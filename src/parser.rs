use crate::{
    lexer::{Lexer, Tok, Token, DIRECTIVES},
    Error, ErrorKind, Pos,
};

/// An instruction argument: a token, or a bracketed group of arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Child {
    Token(Token),
    Group(Vec<Child>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub label: Option<Token>,
    pub mnemonic: String,
    pub pos: Pos,
    pub children: Vec<Child>,
    pub directive: bool,
}

impl Instruction {
    pub fn kind(&self) -> &'static str {
        if self.directive {
            "directive"
        } else {
            "instruction"
        }
    }
}

/// Lazy instruction stream, driving a [`Lexer`] on demand.
pub struct Parser<'a> {
    tokens: Lexer<'a>,
    done: bool,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            tokens: Lexer::new(source),
            done: false,
        }
    }

    fn advance(&mut self) -> Result<Token, Error> {
        // the lexer always ends on EOF, so running dry means we already saw it
        self.tokens
            .next()
            .unwrap_or_else(|| Ok(Token::new(Tok::Eof, ";", Pos::default())))
    }

    fn instruction(&mut self) -> Result<Option<Instruction>, Error> {
        let mut token = self.advance()?;
        if token.tok == Tok::Eof {
            return Ok(None);
        }
        let label = if token.tok == Tok::Assignment {
            let label = token;
            token = self.advance()?;
            Some(label)
        } else {
            None
        };
        // `name: 42` is shorthand for `name: ASSIGN 42`
        if label.is_some() && token.tok.is_constant() {
            let pos = token.pos;
            let mut children = vec![Child::Token(token)];
            children.extend(self.children(false)?);
            return Ok(Some(Instruction {
                label,
                mnemonic: "ASSIGN".to_string(),
                pos,
                children,
                directive: true,
            }));
        }
        if token.tok != Tok::Mnemonic {
            return Err(Error::new(
                ErrorKind::ExpectedMnemonic,
                token.pos,
                format!("expected an initial Mnemonic (not {}).", token.tok),
            ));
        }
        let directive = DIRECTIVES.contains(&token.value.as_str());
        Ok(Some(Instruction {
            label,
            mnemonic: token.value,
            pos: token.pos,
            children: self.children(false)?,
            directive,
        }))
    }

    fn children(&mut self, nested: bool) -> Result<Vec<Child>, Error> {
        let mut children = Vec::new();
        loop {
            let token = self.advance()?;
            match token.tok {
                Tok::Terminator | Tok::Eof => {
                    if nested {
                        return Err(Error::new(
                            ErrorKind::Nesting,
                            token.pos,
                            "instruction terminated while nested.",
                        ));
                    }
                    return Ok(children);
                }
                Tok::Opener => children.push(Child::Group(self.children(true)?)),
                Tok::Closer => {
                    if nested {
                        return Ok(children);
                    }
                    return Err(Error::new(
                        ErrorKind::Nesting,
                        token.pos,
                        "closer found without a preceding Opener.",
                    ));
                }
                _ => children.push(Child::Token(token)),
            }
        }
    }
}

impl<'a> Iterator for Parser<'a> {
    type Item = Result<Instruction, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.instruction() {
            Ok(Some(instruction)) => Some(Ok(instruction)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

pub fn parse(source: &str) -> Parser<'_> {
    Parser::new(source)
}
