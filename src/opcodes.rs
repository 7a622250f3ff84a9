//! The zen80 instruction set.
//!
//! Opcodes are allocated in families from a base: a branch family uses four
//! consecutive opcodes (`op`, `op <Number>`, `op [<Number>]`, `op []`), a
//! binary ALU family five (`op <Number>`, `op x`, `op y`, `op z`, `op []`),
//! and so on. Register operands add their enumeration to the base
//! (`x=0 y=1 z=2 pc=3 sp=4 fx=5`).

use crate::{
    grammar::{indirect, num, operand, reg, Grammar, Slot},
    lexer::Tok,
    parser::{Child, Instruction},
    shape, Error, ErrorKind, Pos,
};

/// First byte of a `LOCATE` encoding, saying which of bank/address follow.
pub const LOCATE_BANK: u8 = 0;
pub const LOCATE_ADDRESS: u8 = 1;
pub const LOCATE_BOTH: u8 = 2;

const NEWLINE: u8 = 0x0A;

#[rustfmt::skip]
const ALU: &[(&str, u8)] = &[
    ("add", 0x5D), ("sub", 0x62), ("addfx", 0x67), ("subfx", 0x6C),
    ("mul", 0x71), ("div", 0x76), ("mod", 0x7B),
    ("eq", 0x80), ("gt", 0x85), ("lt", 0x8A), ("neq", 0x8F), ("ngt", 0x94), ("nlt", 0x99),
    ("and", 0x9E), ("or", 0xA3), ("xor", 0xA8),
    ("zsh", 0xAD), ("ssh", 0xB2), ("lsh", 0xB7), ("rot", 0xBC),
];

#[rustfmt::skip]
const UNARY: &[(&str, u8)] = &[
    ("clz", 0xC1), ("ctz", 0xC3), ("nsa", 0xC5),
    ("not", 0xC7), ("truthy", 0xC9), ("falsey", 0xCB),
];

fn unary(grammar: &mut Grammar, name: &'static str, opcode: u8) {
    grammar.opcode([shape!(name)], opcode);
    grammar.opcode([shape!(name, [])], opcode + 1);
}

fn binary(grammar: &mut Grammar, name: &'static str, opcode: u8) {
    grammar.register([shape!(name, Number)], move |i| {
        Ok(vec![Slot::Byte(opcode), num(operand(i, 0))])
    });
    grammar.register([shape!(name, Index)], move |i| {
        Ok(vec![Slot::Byte(reg(opcode + 1, operand(i, 0)))])
    });
    grammar.opcode([shape!(name, [])], opcode + 4);
}

fn branch(grammar: &mut Grammar, name: &'static str, opcode: u8) {
    grammar.opcode([shape!(name)], opcode);
    grammar.register([shape!(name, Number)], move |i| {
        Ok(vec![Slot::Byte(opcode + 1), num(operand(i, 0))])
    });
    grammar.register([shape!(name, [Number])], move |i| {
        Ok(vec![Slot::Byte(opcode + 2), num(indirect(i, 0, 0))])
    });
    grammar.opcode([shape!(name, [])], opcode + 3);
}

// pointer registers have no encoding, so only index and status registers
fn simple(grammar: &mut Grammar, name: &'static str, opcode: u8) {
    grammar.register([shape!(name, Index), shape!(name, Status)], move |i| {
        Ok(vec![Slot::Byte(reg(opcode, operand(i, 0)))])
    });
}

fn datum_error(found: &str, pos: Pos) -> Error {
    Error::new(
        ErrorKind::ExpectedDatum,
        pos,
        format!("expected a Datum (not {found})."),
    )
}

fn data(instruction: &Instruction) -> Result<Vec<Slot>, Error> {
    let mut code = Vec::new();
    for child in &instruction.children {
        let token = match child {
            Child::Token(token) => token,
            Child::Group(_) => return Err(datum_error("Group", instruction.pos)),
        };
        match token.tok {
            tok if tok.is_vector() => return Err(datum_error("Vector", token.pos)),
            tok if tok.is_constant() || tok == Tok::Reference => code.push(num(token)),
            Tok::String => code.extend(token.value.bytes().map(Slot::Byte)),
            Tok::Newline => code.extend(token.value.bytes().map(|_| Slot::Byte(NEWLINE))),
            tok => return Err(datum_error(tok.name(), token.pos)),
        }
    }
    Ok(code)
}

fn directives(grammar: &mut Grammar) {
    grammar.register([shape!("ASSIGN", Number)], |i| Ok(vec![num(operand(i, 0))]));

    grammar.register([shape!("LOCATE", Number)], |i| {
        Ok(vec![Slot::Byte(LOCATE_BANK), num(operand(i, 0))])
    });
    grammar.register([shape!("LOCATE", [Number])], |i| {
        Ok(vec![Slot::Byte(LOCATE_ADDRESS), num(indirect(i, 0, 0))])
    });
    grammar.register([shape!("LOCATE", Number, [Number])], |i| {
        Ok(vec![
            Slot::Byte(LOCATE_BOTH),
            num(operand(i, 0)),
            num(indirect(i, 1, 0)),
        ])
    });

    grammar.register([shape!("DATA")], data);
}

/// Build the complete dispatch table.
pub fn instruction_set() -> Grammar {
    let mut grammar = Grammar::new();

    grammar.opcode([shape!("done")], 0x00);
    grammar.opcode([shape!("halt")], 0x01);
    grammar.opcode([shape!("reset")], 0x02);
    grammar.opcode([shape!("return")], 0x03);
    grammar.opcode([shape!("nop")], 0x04);

    branch(&mut grammar, "race", 0x05);
    branch(&mut grammar, "nudge", 0x09);
    branch(&mut grammar, "jump", 0x0D);
    branch(&mut grammar, "fork", 0x11);
    branch(&mut grammar, "call", 0x15);
    branch(&mut grammar, "lock", 0x19);
    branch(&mut grammar, "free", 0x1D);

    grammar.opcode([shape!("set")], 0x21);
    simple(&mut grammar, "set", 0x22);
    grammar.opcode([shape!("clear")], 0x28);
    simple(&mut grammar, "clear", 0x29);
    simple(&mut grammar, "copy", 0x2F);
    simple(&mut grammar, "sync", 0x35);

    grammar.register([shape!("load", [Index])], |i| {
        Ok(vec![Slot::Byte(reg(0x3B, indirect(i, 0, 0)))])
    });
    grammar.register([shape!("load", Number)], |i| {
        Ok(vec![Slot::Byte(0x3E), num(operand(i, 0))])
    });
    grammar.register([shape!("load", [Number])], |i| {
        Ok(vec![Slot::Byte(0x3F), num(indirect(i, 0, 0))])
    });
    grammar.register([shape!("load", [Number, Index])], |i| {
        Ok(vec![
            Slot::Byte(reg(0x40, indirect(i, 0, 1))),
            num(indirect(i, 0, 0)),
        ])
    });
    grammar.register([shape!("load", Index, Number)], |i| {
        Ok(vec![Slot::Byte(reg(0x43, operand(i, 0))), num(operand(i, 1))])
    });
    grammar.register([shape!("load", Index, [Number])], |i| {
        Ok(vec![
            Slot::Byte(reg(0x46, operand(i, 0))),
            num(indirect(i, 1, 0)),
        ])
    });

    grammar.register([shape!("store", [Index])], |i| {
        Ok(vec![Slot::Byte(reg(0x49, indirect(i, 0, 0)))])
    });
    grammar.register([shape!("store", [Number])], |i| {
        Ok(vec![Slot::Byte(0x4C), num(indirect(i, 0, 0))])
    });
    grammar.register([shape!("store", [Number, Index])], |i| {
        Ok(vec![
            Slot::Byte(reg(0x4D, indirect(i, 0, 1))),
            num(indirect(i, 0, 0)),
        ])
    });
    grammar.register([shape!("store", Index, [Number])], |i| {
        Ok(vec![
            Slot::Byte(reg(0x50, operand(i, 0))),
            num(indirect(i, 1, 0)),
        ])
    });

    grammar.opcode([shape!("inc")], 0x53);
    grammar.register([shape!("inc", Index)], |i| {
        Ok(vec![Slot::Byte(reg(0x54, operand(i, 0)))])
    });
    grammar.opcode([shape!("inc", [])], 0x57);
    grammar.opcode([shape!("dec")], 0x58);
    grammar.register([shape!("dec", Index)], |i| {
        Ok(vec![Slot::Byte(reg(0x59, operand(i, 0)))])
    });
    grammar.opcode([shape!("dec", [])], 0x5C);

    for &(name, opcode) in ALU {
        binary(&mut grammar, name, opcode);
    }

    for &(name, opcode) in UNARY {
        unary(&mut grammar, name, opcode);
    }

    grammar.opcode([shape!("push")], 0xCD);
    simple(&mut grammar, "push", 0xCE);
    grammar.opcode([shape!("pop")], 0xD5);
    simple(&mut grammar, "pop", 0xD6);

    grammar.opcode([shape!("drop")], 0xDC);
    grammar.opcode([shape!("dupe")], 0xDD);
    grammar.opcode([shape!("swap")], 0xDE);
    grammar.opcode([shape!("peek")], 0xDF);
    grammar.opcode([shape!("void")], 0xE0);

    grammar.opcode([shape!("queue")], 0xE1);
    simple(&mut grammar, "queue", 0xE2);
    grammar.register([shape!("queue", Number)], |i| {
        Ok(vec![Slot::Byte(0xE8), num(operand(i, 0))])
    });
    grammar.opcode([shape!("queue", [])], 0xE9);

    grammar.opcode([shape!("flush")], 0xEA);
    grammar.opcode([shape!("drain")], 0xEB);
    grammar.opcode([shape!("array")], 0xEC);

    grammar.opcode([shape!("databank")], 0xED);
    grammar.opcode([shape!("codebank")], 0xEE);
    grammar.opcode([shape!("stackbank")], 0xEF);
    grammar.opcode([shape!("iobank")], 0xF0);

    grammar.opcode([shape!("copydata")], 0xF1);
    grammar.opcode([shape!("copycode")], 0xF2);
    grammar.opcode([shape!("copystack")], 0xF3);
    grammar.opcode([shape!("copyio")], 0xF4);

    directives(&mut grammar);

    tracing::trace!("instruction set has {} shapes", grammar.len());
    grammar
}
