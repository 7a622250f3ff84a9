//! Pass 2: resolve pending labels and vectors into final bytes.

use crate::{
    compiler::{Compiled, Program},
    grammar::{Direction, Slot},
    Error, ErrorKind, Pos, BANK_SIZE,
};

pub type Bank = [u8; BANK_SIZE];

/// Flat byte stream in instruction order. Directives that only relocate
/// contribute nothing.
pub struct Assembler<'a> {
    program: &'a Program,
    index: usize,
    offset: usize,
    done: bool,
}

impl<'a> Assembler<'a> {
    pub fn new(program: &'a Program) -> Self {
        tracing::trace!("starting pass 2");
        Self {
            program,
            index: 0,
            offset: 0,
            done: false,
        }
    }

    fn assemble_next(&mut self) -> Result<Option<u8>, Error> {
        let instructions = &self.program.instructions;
        while self.index < instructions.len() {
            let code = &instructions[self.index].code;
            if let Some(slot) = code.get(self.offset) {
                self.offset += 1;
                return resolve(self.program, self.index, slot).map(Some);
            }
            self.index += 1;
            self.offset = 0;
        }
        Ok(None)
    }
}

impl<'a> Iterator for Assembler<'a> {
    type Item = Result<u8, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.assemble_next() {
            Ok(Some(byte)) => Some(Ok(byte)),
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

/// Resolve one slot of the `index`th instruction.
pub fn resolve(program: &Program, index: usize, slot: &Slot) -> Result<u8, Error> {
    match slot {
        Slot::Byte(byte) => Ok(*byte),
        Slot::Label { name, pos } => program.labels.get(name).copied().ok_or_else(|| {
            Error::new(
                ErrorKind::UndefinedLabel,
                *pos,
                format!("label `{name}` is never assigned."),
            )
        }),
        Slot::Vector {
            direction,
            steps,
            pos,
        } => vector(&program.instructions, index, *direction, *steps, *pos),
    }
}

/// Step over `steps` neighbouring instructions. Every step must land on a
/// plain instruction; the result is the address of the last one.
fn vector(
    instructions: &[Compiled],
    index: usize,
    direction: Direction,
    steps: usize,
    pos: Pos,
) -> Result<u8, Error> {
    let mut current = index;
    for step in 1..=steps {
        let preposition = if step == steps { "to" } else { "over" };
        let next = match direction {
            Direction::Backward => current.checked_sub(1),
            Direction::Forward => Some(current + 1).filter(|next| *next < instructions.len()),
        };
        let Some(next) = next else {
            return Err(Error::new(
                ErrorKind::Vector,
                pos,
                format!("cannot skip {preposition} empty space."),
            ));
        };
        if instructions[next].is_directive() {
            return Err(Error::new(
                ErrorKind::Vector,
                pos,
                format!("cannot skip {preposition} a directive."),
            ));
        }
        current = next;
    }
    Ok(instructions[current].address as u8)
}

/// Lay the program out into banks, filling untouched bytes with `fill`.
pub fn assemble_with_fill(program: &Program, fill: u8) -> Result<Vec<Bank>, Error> {
    tracing::trace!("starting pass 2");
    let mut banks = vec![[fill; BANK_SIZE]; program.banks];
    let mut written = vec![[false; BANK_SIZE]; program.banks];
    for (index, compiled) in program.instructions.iter().enumerate() {
        for (offset, slot) in compiled.code.iter().enumerate() {
            let address = compiled.address + offset;
            let byte = resolve(program, index, slot)?;
            if written[compiled.bank][address] {
                return Err(Error::new(
                    ErrorKind::Overlap,
                    compiled.instruction.pos,
                    format!(
                        "the `{}` {} overwrote Bank {} #{address:02X}.",
                        compiled.instruction.mnemonic,
                        compiled.instruction.kind(),
                        compiled.bank
                    ),
                ));
            }
            written[compiled.bank][address] = true;
            banks[compiled.bank][address] = byte;
        }
    }
    tracing::debug!(
        "pass 2: {} bytes into {} banks",
        program.size(),
        banks.len()
    );
    Ok(banks)
}

pub fn assemble(program: &Program) -> Result<Vec<Bank>, Error> {
    assemble_with_fill(program, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    fn flat(source: &str) -> Result<Vec<u8>, Error> {
        let program = compile(source, 1)?;
        Assembler::new(&program).collect()
    }

    #[test]
    fn plain_bytes_pass_through() {
        assert_eq!(flat("done, halt").unwrap(), vec![0x00, 0x01]);
    }

    #[test]
    fn resolves_labels() {
        assert_eq!(flat("loop: jump, jump loop").unwrap(), vec![0x0D, 0x0E, 0x00]);
        assert_eq!(
            flat("jump end\nnop\nend: halt").unwrap(),
            vec![0x0E, 0x03, 0x04, 0x01]
        );
    }

    #[test]
    fn undefined_labels() {
        let err = flat("halt\njump ghost").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndefinedLabel);
        assert_eq!(err.msg, "label `ghost` is never assigned.");
        assert_eq!(err.pos, Pos::new(2, 6));
    }

    #[test]
    fn vectors_resolve_to_neighbour_addresses() {
        // addresses: nop 0, load 1, halt 3, jump 4, done 6
        let source = "nop\nload 7\nhalt\njump <<\ndone";
        assert_eq!(flat(source).unwrap()[5], 1);
        let source = "jump >>, load 7, done";
        assert_eq!(flat(source).unwrap(), vec![0x0E, 0x04, 0x3E, 0x07, 0x00]);
        assert_eq!(flat("halt, jump <").unwrap(), vec![0x01, 0x0E, 0x00]);
    }

    #[test]
    fn vectors_stop_at_directives() {
        let source = "nop\nhalt\nLOCATE [#10]\nnop\njump <<";
        let err = flat(source).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Vector);
        assert_eq!(err.msg, "cannot skip to a directive.");
        assert_eq!(err.pos, Pos::new(5, 6));

        let source = "nop\nhalt\nLOCATE [#10]\nnop\njump <<<";
        assert_eq!(flat(source).unwrap_err().msg, "cannot skip over a directive.");

        let source = "nop\nhalt\nDATA 1 2\nnop\njump <";
        assert_eq!(flat(source).unwrap()[6], 0x04);
    }

    #[test]
    fn vectors_stop_at_the_ends() {
        assert_eq!(flat("jump <").unwrap_err().msg, "cannot skip to empty space.");
        assert_eq!(flat("nop, jump >").unwrap_err().msg, "cannot skip to empty space.");
        assert_eq!(
            flat("nop, jump >>").unwrap_err().msg,
            "cannot skip over empty space."
        );
        assert_eq!(
            flat("nop, jump <<<").unwrap_err().msg,
            "cannot skip over empty space."
        );
    }

    #[test]
    fn stream_stops_at_first_error() {
        let program = compile("halt, jump ghost, done", 1).unwrap();
        let mut assembler = Assembler::new(&program);
        assert_eq!(assembler.next(), Some(Ok(0x01)));
        assert_eq!(assembler.next(), Some(Ok(0x0E)));
        assert!(assembler.next().unwrap().is_err());
        assert_eq!(assembler.next(), None);
    }

    #[test]
    fn banks_place_bytes_by_address() {
        let program = compile("halt\nLOCATE 1 [#10]\nDATA \"ok\" |\nLOCATE 0 [#FE]\ndone", 2)
            .unwrap();
        let banks = assemble(&program).unwrap();
        assert_eq!(banks.len(), 2);
        assert_eq!(banks[0][0], 0x01);
        assert_eq!(banks[0][0xFE], 0x00);
        assert_eq!(&banks[1][0x10..0x13], b"ok\n");
        assert_eq!(banks[1][0x13], 0x00);

        let banks = assemble_with_fill(&program, 0xFF).unwrap();
        assert_eq!(banks[0][1], 0xFF);
        assert_eq!(banks[0][0xFE], 0x00);
        assert_eq!(banks[1][0x0F], 0xFF);
    }

    #[test]
    fn overlapping_writes() {
        let program = compile("load 1\nLOCATE [1]\nhalt", 1).unwrap();
        let err = assemble(&program).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Overlap);
        assert_eq!(err.msg, "the `halt` instruction overwrote Bank 0 #01.");
        assert_eq!(err.pos, Pos::new(3, 1));
    }
}
