//! Disassembler
//!
//! Walks memory from a starting address, decoding opcodes without resolving
//! or checking operands.  Words which are not opcodes are rendered as data.
use core::fmt;

use crate::{Opcode, REGISTER_BASE, Word};

/// A single decoded item
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Item<'a> {
    /// An instruction with its raw operand words
    ///
    /// `args` is shorter than the opcode's arity if the instruction runs off
    /// the end of memory.
    Instruction {
        /// Instruction opcode
        opcode: Opcode,
        /// Raw operand words
        args: &'a [Word],
    },
    /// A word which isn't an opcode
    Data(Word),
}

/// An item, tagged with its address
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Line<'a> {
    /// Address of the first word of this item
    pub addr: usize,
    /// Decoded item
    pub item: Item<'a>,
}

impl Line<'_> {
    /// Number of words covered by this line
    pub fn size(&self) -> usize {
        match self.item {
            Item::Instruction { args, .. } => 1 + args.len(),
            Item::Data(..) => 1,
        }
    }
}

/// Returns the printable form of a word, if there is one
fn printable(w: Word) -> Option<char> {
    u8::try_from(w)
        .ok()
        .map(char::from)
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
}

impl fmt::Display for Line<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#06x}: ", self.addr)?;
        match self.item {
            Item::Instruction { opcode, args } => {
                if args.is_empty() {
                    f.write_str(opcode.name())?;
                } else {
                    write!(f, "{:<4}", opcode.name())?;
                }
                for w in args {
                    write!(f, " {w:#06x}")?;
                }
                if let (Opcode::Out, [w]) = (opcode, args) {
                    if *w < REGISTER_BASE {
                        let c = char::from_u32(u32::from(*w))
                            .unwrap_or(char::REPLACEMENT_CHARACTER);
                        write!(f, " {c:?}")?;
                    }
                }
                Ok(())
            }
            Item::Data(w) => {
                write!(f, "{w:#06x}")?;
                if let Some(c) = printable(w) {
                    write!(f, " ({c:?})")?;
                }
                Ok(())
            }
        }
    }
}

/// Iterator over the lines of a disassembly
pub struct Disassembler<'a> {
    mem: &'a [Word],
    pos: usize,
}

impl<'a> Disassembler<'a> {
    /// Builds a disassembler which starts at the given address
    pub fn new(mem: &'a [Word], start: usize) -> Self {
        Self { mem, pos: start }
    }
}

impl<'a> Iterator for Disassembler<'a> {
    type Item = Line<'a>;
    fn next(&mut self) -> Option<Line<'a>> {
        let addr = self.pos;
        let w = *self.mem.get(addr)?;
        let item = match Opcode::from_word(w) {
            Some(opcode) => {
                let end = (addr + 1 + opcode.arity()).min(self.mem.len());
                Item::Instruction {
                    opcode,
                    args: &self.mem[addr + 1..end],
                }
            }
            None => Item::Data(w),
        };
        let line = Line { addr, item };
        self.pos += line.size();
        Some(line)
    }
}

/// Disassembles a whole memory image, starting at address 0
pub fn disassemble(mem: &[Word]) -> Disassembler<'_> {
    Disassembler::new(mem, 0)
}

#[cfg(test)]
mod test {
    use super::*;

    fn lines(mem: &[Word]) -> Vec<String> {
        disassemble(mem).map(|line| line.to_string()).collect()
    }

    #[test]
    fn instructions() {
        let mem = [9, 32768, 32769, 4, 19, 32768, 21, 0];
        assert_eq!(
            lines(&mem),
            [
                "0x0000: add  0x8000 0x8001 0x0004",
                "0x0004: out  0x8000",
                "0x0006: noop",
                "0x0007: halt",
            ]
        );
    }

    #[test]
    fn out_characters() {
        assert_eq!(lines(&[19, 87]), ["0x0000: out  0x0057 'W'"]);
        assert_eq!(lines(&[19, 10]), ["0x0000: out  0x000a '\\n'"]);
    }

    #[test]
    fn data() {
        assert_eq!(
            lines(&[65, 1000, 22, 21]),
            [
                "0x0000: 0x0041 ('A')",
                "0x0001: 0x03e8",
                "0x0002: 0x0016",
                "0x0003: noop",
            ]
        );
    }

    #[test]
    fn truncated() {
        let mem = [21, 9, 32768, 5];
        let out: Vec<_> = disassemble(&mem).collect();
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[1].item,
            Item::Instruction {
                opcode: Opcode::Add,
                args: &[32768, 5]
            }
        );
        assert_eq!(out[1].to_string(), "0x0001: add  0x8000 0x0005");
    }

    #[test]
    fn start_offset() {
        let mem = [0, 0, 21, 18];
        let out: Vec<_> = Disassembler::new(&mem, 2).map(|l| l.addr).collect();
        assert_eq!(out, [2, 3]);
    }
}
