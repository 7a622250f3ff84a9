//! Pass 1: address assignment, label collection and encoding.
//!
//! Label references and vectors are left pending in each instruction's code;
//! the [`assembler`](crate::assembler) resolves them once the whole program
//! is known.

use indexmap::IndexMap;

use crate::{
    grammar::{Grammar, Shape, Slot},
    lexer::Token,
    opcodes::{self, LOCATE_ADDRESS, LOCATE_BANK, LOCATE_BOTH},
    parser::{Instruction, Parser},
    Error, ErrorKind, BANK_SIZE,
};

/// An instruction with its location and (partially resolved) encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compiled {
    pub instruction: Instruction,
    pub bank: usize,
    pub address: usize,
    pub code: Vec<Slot>,
}

impl Compiled {
    pub fn is_directive(&self) -> bool {
        self.instruction.directive
    }
}

/// The output of pass 1, read-only from here on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub instructions: Vec<Compiled>,
    pub labels: IndexMap<String, u8>,
    pub banks: usize,
}

impl Program {
    /// Total number of encoded bytes across all banks.
    pub fn size(&self) -> usize {
        self.instructions.iter().map(|c| c.code.len()).sum()
    }
}

pub struct Compiler<'a> {
    instructions: Parser<'a>,
    grammar: Grammar,
    labels: IndexMap<String, u8>,
    banks: usize,
    bank: usize,
    address: usize,
    done: bool,
}

impl<'a> Compiler<'a> {
    pub fn new(source: &'a str, banks: usize) -> Self {
        Self::with_grammar(source, banks, opcodes::instruction_set())
    }

    pub fn with_grammar(source: &'a str, banks: usize, grammar: Grammar) -> Self {
        tracing::trace!("starting pass 1");
        Self {
            instructions: Parser::new(source),
            grammar,
            labels: IndexMap::new(),
            banks: banks.max(1),
            bank: 0,
            address: 0,
            done: false,
        }
    }

    /// Seed the label table. Assigning one of these in source is a
    /// duplicate.
    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = (S, u8)>,
        S: Into<String>,
    {
        for (name, value) in labels {
            self.labels.insert(name.into(), value);
        }
        self
    }

    pub fn labels(&self) -> &IndexMap<String, u8> {
        &self.labels
    }

    pub fn bank(&self) -> usize {
        self.bank
    }

    pub fn address(&self) -> usize {
        self.address
    }

    /// Compile everything not yet pulled from the iterator.
    pub fn finish(mut self) -> Result<Program, Error> {
        let mut instructions = Vec::new();
        for compiled in &mut self {
            instructions.push(compiled?);
        }
        let program = Program {
            instructions,
            labels: self.labels,
            banks: self.banks,
        };
        tracing::debug!(
            "pass 1: {} instructions, {} labels, {} bytes",
            program.instructions.len(),
            program.labels.len(),
            program.size()
        );
        Ok(program)
    }

    fn assign(&mut self, label: &Token, value: u8) -> Result<(), Error> {
        if self.labels.contains_key(&label.value) {
            return Err(Error::new(
                ErrorKind::DuplicateLabel,
                label.pos,
                format!("label `{}` is already assigned.", label.value),
            ));
        }
        tracing::debug!("label `{}` = #{value:02X}", label.value);
        self.labels.insert(label.value.clone(), value);
        Ok(())
    }

    fn assign_address(&mut self, instruction: &Instruction) -> Result<(), Error> {
        let Some(label) = &instruction.label else {
            return Ok(());
        };
        if self.address >= BANK_SIZE {
            return Err(self.overflow(instruction));
        }
        self.assign(label, self.address as u8)
    }

    /// Values that relocate or name constants must be known now.
    fn constant(&self, slot: &Slot) -> Result<u8, Error> {
        match slot {
            Slot::Byte(byte) => Ok(*byte),
            Slot::Label { name, pos } => self.labels.get(name).copied().ok_or_else(|| {
                Error::new(
                    ErrorKind::UndefinedLabel,
                    *pos,
                    format!("label `{name}` is not assigned yet."),
                )
            }),
            Slot::Vector { pos, .. } => Err(Error::new(
                ErrorKind::ExpectedConstant,
                *pos,
                "expected a Constant (not Vector).",
            )),
        }
    }

    fn overflow(&self, instruction: &Instruction) -> Error {
        Error::new(
            ErrorKind::BankOverflow,
            instruction.pos,
            format!(
                "the `{}` {} overflowed Bank {}.",
                instruction.mnemonic,
                instruction.kind(),
                self.bank
            ),
        )
    }

    fn locate(&mut self, instruction: &Instruction, code: &[Slot]) -> Result<(), Error> {
        let Some((mode, rest)) = code.split_first() else {
            return Err(malformed(instruction));
        };
        let args = rest
            .iter()
            .map(|slot| self.constant(slot))
            .collect::<Result<Vec<_>, _>>()?;
        match (mode, args.as_slice()) {
            (Slot::Byte(LOCATE_BANK), [bank]) => self.bank = *bank as usize,
            (Slot::Byte(LOCATE_ADDRESS), [address]) => self.address = *address as usize,
            (Slot::Byte(LOCATE_BOTH), [bank, address]) => {
                self.bank = *bank as usize;
                self.address = *address as usize;
            }
            _ => return Err(malformed(instruction)),
        }
        if self.bank >= self.banks {
            return Err(Error::new(
                ErrorKind::VoidBank,
                instruction.pos,
                format!("Bank {} is (currently) unpopulated.", self.bank),
            ));
        }
        tracing::debug!("located Bank {} #{:02X}", self.bank, self.address);
        Ok(())
    }

    fn compile_next(&mut self) -> Result<Option<Compiled>, Error> {
        let Some(instruction) = self.instructions.next().transpose()? else {
            return Ok(None);
        };
        let code = self.grammar.lookup(&instruction)?.encode(&instruction)?;

        let code = match instruction.mnemonic.as_str() {
            "ASSIGN" => {
                let [slot] = code.as_slice() else {
                    return Err(malformed(&instruction));
                };
                let value = self.constant(slot)?;
                if let Some(label) = &instruction.label {
                    self.assign(label, value)?;
                }
                Vec::new()
            }
            "LOCATE" => {
                self.locate(&instruction, &code)?;
                self.assign_address(&instruction)?;
                Vec::new()
            }
            _ => {
                self.assign_address(&instruction)?;
                code
            }
        };

        let compiled = Compiled {
            bank: self.bank,
            address: self.address,
            code,
            instruction,
        };
        self.address += compiled.code.len();
        if self.address > BANK_SIZE {
            return Err(self.overflow(&compiled.instruction));
        }
        tracing::trace!(
            "{} in Bank {} #{:02X} ({} bytes)",
            compiled.instruction.mnemonic,
            compiled.bank,
            compiled.address,
            compiled.code.len()
        );
        Ok(Some(compiled))
    }
}

// a grammar passed to `Compiler::with_grammar` may encode directives differently
fn malformed(instruction: &Instruction) -> Error {
    let shape = Shape::of(instruction);
    Error::new(
        ErrorKind::UnrecognizedGrammar,
        instruction.pos,
        format!("malformed encoding for {shape}"),
    )
}

impl<'a> Iterator for Compiler<'a> {
    type Item = Result<Compiled, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.compile_next() {
            Ok(Some(compiled)) => Some(Ok(compiled)),
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

pub fn compile(source: &str, banks: usize) -> Result<Program, Error> {
    Compiler::new(source, banks).finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{grammar::Direction, Pos};

    fn compile_err(source: &str, banks: usize) -> Error {
        compile(source, banks).unwrap_err()
    }

    #[test]
    fn assigns_running_addresses() {
        let program = compile("start: halt\nload x 5\nend: done", 1).unwrap();
        let addresses: Vec<usize> = program.instructions.iter().map(|c| c.address).collect();
        assert_eq!(addresses, vec![0, 1, 3]);
        assert_eq!(program.labels["start"], 0);
        assert_eq!(program.labels["end"], 3);
        assert_eq!(program.size(), 4);
        assert_eq!(program.banks, 1);
    }

    #[test]
    fn leaves_references_pending() {
        let program = compile("jump later, jump <\nlater: halt", 1).unwrap();
        assert_eq!(
            program.instructions[0].code[1],
            Slot::Label {
                name: "later".to_string(),
                pos: Pos::new(1, 6)
            }
        );
        assert!(matches!(
            program.instructions[1].code[1],
            Slot::Vector {
                direction: Direction::Backward,
                steps: 1,
                ..
            }
        ));
    }

    #[test]
    fn duplicate_labels() {
        let err = compile_err("a: halt, a: done", 1);
        assert_eq!(err.kind, ErrorKind::DuplicateLabel);
        assert_eq!(err.msg, "label `a` is already assigned.");
        assert_eq!(err.pos, Pos::new(1, 10));
    }

    #[test]
    fn assign_binds_constants() {
        let program = compile("limit: #40\ntwin: ASSIGN limit\nhalt", 1).unwrap();
        assert_eq!(program.labels["limit"], 0x40);
        assert_eq!(program.labels["twin"], 0x40);
        assert!(program.instructions[0].code.is_empty());
        assert_eq!(program.instructions[2].address, 0);
    }

    #[test]
    fn assign_needs_known_values() {
        let err = compile_err("early: ASSIGN later\nlater: halt", 1);
        assert_eq!(err.kind, ErrorKind::UndefinedLabel);
        assert_eq!(err.msg, "label `later` is not assigned yet.");
        let err = compile_err("v: ASSIGN >", 1);
        assert_eq!(err.kind, ErrorKind::ExpectedConstant);
        assert_eq!(err.msg, "expected a Constant (not Vector).");
        assert_eq!(err.pos, Pos::new(1, 11));
    }

    #[test]
    fn locate_moves_bank_and_address() {
        let program = compile("halt\nLOCATE 1 [#10]\nhere: halt\nLOCATE [#20]\nthere: done", 2)
            .unwrap();
        let placed: Vec<(usize, usize)> = program
            .instructions
            .iter()
            .map(|c| (c.bank, c.address))
            .collect();
        assert_eq!(placed, vec![(0, 0), (1, 0x10), (1, 0x10), (1, 0x20), (1, 0x20)]);
        assert_eq!(program.labels["here"], 0x10);
        assert_eq!(program.labels["there"], 0x20);
    }

    #[test]
    fn locate_label_gets_new_address() {
        let program = compile("halt\nmark: LOCATE [#80]", 1).unwrap();
        assert_eq!(program.labels["mark"], 0x80);
    }

    #[test]
    fn locate_rejects_missing_banks() {
        let err = compile_err("halt\nLOCATE 2", 2);
        assert_eq!(err.kind, ErrorKind::VoidBank);
        assert_eq!(err.msg, "Bank 2 is (currently) unpopulated.");
        assert_eq!(err.pos, Pos::new(2, 1));
        assert!(compile("LOCATE 0", 0).is_ok());
    }

    #[test]
    fn overflow_is_reported_where_it_happens() {
        let err = compile_err("LOCATE [+255]\nhalt\nhalt\nadd x y", 1);
        assert_eq!(err.kind, ErrorKind::BankOverflow);
        assert_eq!(err.msg, "the `halt` instruction overflowed Bank 0.");
        assert_eq!(err.pos, Pos::new(3, 1));

        let err = compile_err("LOCATE [+254]\nDATA \"abc\"", 1);
        assert_eq!(err.msg, "the `DATA` directive overflowed Bank 0.");
    }

    #[test]
    fn filling_a_bank_exactly_is_fine() {
        let program = compile("LOCATE [+254]\nload 1", 1).unwrap();
        assert_eq!(program.instructions[1].address, 254);
        let err = compile_err("LOCATE [#FF]\nhalt\nend: DATA", 1);
        assert_eq!(err.kind, ErrorKind::BankOverflow);
        assert_eq!(err.msg, "the `DATA` directive overflowed Bank 0.");
    }

    #[test]
    fn yields_instructions_before_a_later_error() {
        let mut compiler = Compiler::new("halt\ndone\nadd x y\nhalt", 1);
        assert_eq!(compiler.next().unwrap().unwrap().code, vec![Slot::Byte(0x01)]);
        assert_eq!(compiler.next().unwrap().unwrap().address, 1);
        assert_eq!(compiler.address(), 2);
        assert_eq!(compiler.bank(), 0);
        let err = compiler.next().unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnrecognizedGrammar);
        assert!(compiler.next().is_none());
    }

    #[test]
    fn running_state_is_visible_between_instructions() {
        let mut compiler = Compiler::new("top: halt\nLOCATE 1 [#40]\nnext: done", 2);
        compiler.next().unwrap().unwrap();
        assert_eq!((compiler.bank(), compiler.address()), (0, 1));
        assert_eq!(compiler.labels().get("top"), Some(&0));
        compiler.next().unwrap().unwrap();
        assert_eq!((compiler.bank(), compiler.address()), (1, 0x40));
        assert!(compiler.labels().get("next").is_none());
        compiler.next().unwrap().unwrap();
        assert_eq!(compiler.labels().get("next"), Some(&0x40));
    }

    #[test]
    fn foreign_directive_encodings_are_errors() {
        let mut grammar = Grammar::new();
        grammar.register([crate::shape!("ASSIGN", Number)], |_| Ok(Vec::new()));
        grammar.opcode([crate::shape!("LOCATE", Number)], 0x09);
        grammar.register([crate::shape!("LOCATE", [Number])], |_| {
            Ok(vec![Slot::Byte(7), Slot::Byte(0)])
        });
        for (source, shape) in [
            ("a: ASSIGN 1", "ASSIGN <Digit>"),
            ("LOCATE 1", "LOCATE <Digit>"),
            ("LOCATE [1]", "LOCATE [<Digit>]"),
        ] {
            let err = Compiler::with_grammar(source, 2, grammar.clone())
                .finish()
                .unwrap_err();
            assert_eq!(err.kind, ErrorKind::UnrecognizedGrammar, "{source}");
            assert_eq!(err.msg, format!("malformed encoding for {shape}"));
        }
    }

    #[test]
    fn predefined_labels() {
        let program = Compiler::new("load [screen]", 1)
            .with_labels([("screen", 0x80)])
            .finish()
            .unwrap();
        assert_eq!(program.labels["screen"], 0x80);

        let err = Compiler::new("screen: halt", 1)
            .with_labels([("screen", 0x80)])
            .finish()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateLabel);
    }
}
