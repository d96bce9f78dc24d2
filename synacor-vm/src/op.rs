use core::fmt;

use crate::{Error, REGISTER_BASE, REGISTER_COUNT, Word};

/// One of the eight general-purpose registers
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Register(u8);

impl Register {
    /// Builds a register from its index, returning `None` if it is not in
    /// `0..8`
    pub fn new(i: u8) -> Option<Self> {
        (usize::from(i) < REGISTER_COUNT).then_some(Self(i))
    }

    /// Returns the register index, in the range `0..8`
    #[inline]
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    /// Returns the operand word which names this register
    #[inline]
    pub fn word(self) -> Word {
        REGISTER_BASE + Word::from(self.0)
    }
}

impl TryFrom<Word> for Register {
    type Error = Error;
    fn try_from(w: Word) -> Result<Self, Error> {
        w.checked_sub(REGISTER_BASE)
            .and_then(|i| u8::try_from(i).ok())
            .and_then(Register::new)
            .ok_or(Error::NotARegister(w))
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A source operand, decoded from its raw word
///
/// Values below [`REGISTER_BASE`] are literals; the next eight values name
/// registers.  Anything larger is invalid.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    /// Literal value, used as-is
    Literal(Word),
    /// Register reference, resolved to the register's contents
    Register(Register),
}

impl TryFrom<Word> for Operand {
    type Error = Error;
    fn try_from(w: Word) -> Result<Self, Error> {
        if w < REGISTER_BASE {
            Ok(Operand::Literal(w))
        } else {
            Register::try_from(w)
                .map(Operand::Register)
                .map_err(|_| Error::InvalidOperand(w))
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::Literal(v) => write!(f, "{v}"),
            Operand::Register(r) => write!(f, "{r}"),
        }
    }
}

/// Opcode table
///
/// The discriminant of each variant is its opcode word.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    /// `halt`: stop execution
    Halt = 0,
    /// `set a b`: set register `a` to the value of `b`
    Set = 1,
    /// `push a`: push `a` onto the stack
    Push = 2,
    /// `pop a`: remove the top element from the stack and write it into `a`
    Pop = 3,
    /// `eq a b c`: set `a` to 1 if `b` is equal to `c`, 0 otherwise
    Eq = 4,
    /// `gt a b c`: set `a` to 1 if `b` is greater than `c`, 0 otherwise
    Gt = 5,
    /// `jmp a`: jump to `a`
    Jmp = 6,
    /// `jt a b`: if `a` is nonzero, jump to `b`
    Jt = 7,
    /// `jf a b`: if `a` is zero, jump to `b`
    Jf = 8,
    /// `add a b c`: store into `a` the sum of `b` and `c` (modulo 32768)
    Add = 9,
    /// `mult a b c`: store into `a` the product of `b` and `c` (modulo 32768)
    Mult = 10,
    /// `mod a b c`: store into `a` the remainder of `b` divided by `c`
    Mod = 11,
    /// `and a b c`: store into `a` the bitwise and of `b` and `c`
    And = 12,
    /// `or a b c`: store into `a` the bitwise or of `b` and `c`
    Or = 13,
    /// `not a b`: store the 15-bit bitwise inverse of `b` in `a`
    Not = 14,
    /// `rmem a b`: read memory at address `b` and write it to `a`
    Rmem = 15,
    /// `wmem a b`: write the value from `b` into memory at address `a`
    Wmem = 16,
    /// `call a`: push the address of the next instruction, then jump to `a`
    Call = 17,
    /// `ret`: pop an address from the stack and jump to it; halts if the
    /// stack is empty
    Ret = 18,
    /// `out a`: write the character with code `a` to the terminal
    Out = 19,
    /// `in a`: read a character from the terminal and write its code to `a`
    In = 20,
    /// `noop`: no operation
    Noop = 21,
}

impl Opcode {
    /// Every opcode, in numerical order
    pub const ALL: [Opcode; 22] = [
        Opcode::Halt,
        Opcode::Set,
        Opcode::Push,
        Opcode::Pop,
        Opcode::Eq,
        Opcode::Gt,
        Opcode::Jmp,
        Opcode::Jt,
        Opcode::Jf,
        Opcode::Add,
        Opcode::Mult,
        Opcode::Mod,
        Opcode::And,
        Opcode::Or,
        Opcode::Not,
        Opcode::Rmem,
        Opcode::Wmem,
        Opcode::Call,
        Opcode::Ret,
        Opcode::Out,
        Opcode::In,
        Opcode::Noop,
    ];

    /// Looks up an opcode by its word value
    pub fn from_word(w: Word) -> Option<Self> {
        Self::ALL.get(usize::from(w)).copied()
    }

    /// Number of operand words which follow the opcode
    pub fn arity(self) -> usize {
        match self {
            Opcode::Halt | Opcode::Ret | Opcode::Noop => 0,
            Opcode::Push
            | Opcode::Pop
            | Opcode::Jmp
            | Opcode::Call
            | Opcode::Out
            | Opcode::In => 1,
            Opcode::Set
            | Opcode::Jt
            | Opcode::Jf
            | Opcode::Not
            | Opcode::Rmem
            | Opcode::Wmem => 2,
            Opcode::Eq
            | Opcode::Gt
            | Opcode::Add
            | Opcode::Mult
            | Opcode::Mod
            | Opcode::And
            | Opcode::Or => 3,
        }
    }

    /// Returns the lowercase mnemonic
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Halt => "halt",
            Opcode::Set => "set",
            Opcode::Push => "push",
            Opcode::Pop => "pop",
            Opcode::Eq => "eq",
            Opcode::Gt => "gt",
            Opcode::Jmp => "jmp",
            Opcode::Jt => "jt",
            Opcode::Jf => "jf",
            Opcode::Add => "add",
            Opcode::Mult => "mult",
            Opcode::Mod => "mod",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Not => "not",
            Opcode::Rmem => "rmem",
            Opcode::Wmem => "wmem",
            Opcode::Call => "call",
            Opcode::Ret => "ret",
            Opcode::Out => "out",
            Opcode::In => "in",
            Opcode::Noop => "noop",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded instruction, carrying its operands
///
/// Destinations are always registers; they are never resolved as values.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Op {
    /// Halt
    Halt,
    /// Set register
    Set(Register, Operand),
    /// Push onto the stack
    Push(Operand),
    /// Pop from the stack into a register
    Pop(Register),
    /// Equality test
    Eq(Register, Operand, Operand),
    /// Greater-than test
    Gt(Register, Operand, Operand),
    /// Unconditional jump
    Jmp(Operand),
    /// Jump if true (nonzero)
    Jt(Operand, Operand),
    /// Jump if false (zero)
    Jf(Operand, Operand),
    /// Addition, modulo 32768
    Add(Register, Operand, Operand),
    /// Multiplication, modulo 32768
    Mult(Register, Operand, Operand),
    /// Remainder
    Mod(Register, Operand, Operand),
    /// Bitwise and
    And(Register, Operand, Operand),
    /// Bitwise or
    Or(Register, Operand, Operand),
    /// 15-bit bitwise not
    Not(Register, Operand),
    /// Memory read
    Rmem(Register, Operand),
    /// Memory write, to the address given by the first operand
    Wmem(Operand, Operand),
    /// Subroutine call
    Call(Operand),
    /// Subroutine return
    Ret,
    /// Character output
    Out(Operand),
    /// Character input
    In(Register),
    /// No operation
    Noop,
}

impl Op {
    /// Decodes the instruction at `pc`
    ///
    /// Operands are checked against the literal / register convention, but
    /// not resolved.  Returns [`Error::UnknownOpcode`] if the word at `pc` is
    /// not an opcode, and [`Error::Truncated`] if the operands would run past
    /// the end of `mem`.
    pub fn decode(mem: &[Word], pc: usize) -> Result<Op, Error> {
        let word = *mem.get(pc).ok_or(Error::AddressOutOfRange(pc))?;
        let opcode = Opcode::from_word(word).ok_or(Error::UnknownOpcode(word))?;
        let args = mem
            .get(pc + 1..pc + 1 + opcode.arity())
            .ok_or(Error::Truncated)?;

        let dst = |i: usize| Register::try_from(args[i]);
        let src = |i: usize| Operand::try_from(args[i]);

        let op = match opcode {
            Opcode::Halt => Op::Halt,
            Opcode::Set => Op::Set(dst(0)?, src(1)?),
            Opcode::Push => Op::Push(src(0)?),
            Opcode::Pop => Op::Pop(dst(0)?),
            Opcode::Eq => Op::Eq(dst(0)?, src(1)?, src(2)?),
            Opcode::Gt => Op::Gt(dst(0)?, src(1)?, src(2)?),
            Opcode::Jmp => Op::Jmp(src(0)?),
            Opcode::Jt => Op::Jt(src(0)?, src(1)?),
            Opcode::Jf => Op::Jf(src(0)?, src(1)?),
            Opcode::Add => Op::Add(dst(0)?, src(1)?, src(2)?),
            Opcode::Mult => Op::Mult(dst(0)?, src(1)?, src(2)?),
            Opcode::Mod => Op::Mod(dst(0)?, src(1)?, src(2)?),
            Opcode::And => Op::And(dst(0)?, src(1)?, src(2)?),
            Opcode::Or => Op::Or(dst(0)?, src(1)?, src(2)?),
            Opcode::Not => Op::Not(dst(0)?, src(1)?),
            Opcode::Rmem => Op::Rmem(dst(0)?, src(1)?),
            Opcode::Wmem => Op::Wmem(src(0)?, src(1)?),
            Opcode::Call => Op::Call(src(0)?),
            Opcode::Ret => Op::Ret,
            Opcode::Out => Op::Out(src(0)?),
            Opcode::In => Op::In(dst(0)?),
            Opcode::Noop => Op::Noop,
        };
        Ok(op)
    }

    /// Returns the opcode of this instruction
    pub fn opcode(&self) -> Opcode {
        match self {
            Op::Halt => Opcode::Halt,
            Op::Set(..) => Opcode::Set,
            Op::Push(..) => Opcode::Push,
            Op::Pop(..) => Opcode::Pop,
            Op::Eq(..) => Opcode::Eq,
            Op::Gt(..) => Opcode::Gt,
            Op::Jmp(..) => Opcode::Jmp,
            Op::Jt(..) => Opcode::Jt,
            Op::Jf(..) => Opcode::Jf,
            Op::Add(..) => Opcode::Add,
            Op::Mult(..) => Opcode::Mult,
            Op::Mod(..) => Opcode::Mod,
            Op::And(..) => Opcode::And,
            Op::Or(..) => Opcode::Or,
            Op::Not(..) => Opcode::Not,
            Op::Rmem(..) => Opcode::Rmem,
            Op::Wmem(..) => Opcode::Wmem,
            Op::Call(..) => Opcode::Call,
            Op::Ret => Opcode::Ret,
            Op::Out(..) => Opcode::Out,
            Op::In(..) => Opcode::In,
            Op::Noop => Opcode::Noop,
        }
    }

    /// Length of the encoded instruction, in words
    #[inline]
    pub fn size(&self) -> Word {
        // arity is at most 3
        1 + self.opcode().arity() as Word
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.opcode())?;
        match *self {
            Op::Halt | Op::Ret | Op::Noop => Ok(()),
            Op::Push(a) | Op::Jmp(a) | Op::Call(a) | Op::Out(a) => {
                write!(f, " {a}")
            }
            Op::Pop(a) | Op::In(a) => write!(f, " {a}"),
            Op::Set(a, b) | Op::Not(a, b) | Op::Rmem(a, b) => {
                write!(f, " {a} {b}")
            }
            Op::Jt(a, b) | Op::Jf(a, b) | Op::Wmem(a, b) => {
                write!(f, " {a} {b}")
            }
            Op::Eq(a, b, c)
            | Op::Gt(a, b, c)
            | Op::Add(a, b, c)
            | Op::Mult(a, b, c)
            | Op::Mod(a, b, c)
            | Op::And(a, b, c)
            | Op::Or(a, b, c) => write!(f, " {a} {b} {c}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn opcode_table() {
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(*op as usize, i);
            assert_eq!(Opcode::from_word(i as Word), Some(*op));
        }
        assert_eq!(Opcode::from_word(22), None);
        assert_eq!(Opcode::from_word(u16::MAX), None);
    }

    #[test]
    fn operands() {
        assert_eq!(Operand::try_from(0).unwrap(), Operand::Literal(0));
        assert_eq!(
            Operand::try_from(32767).unwrap(),
            Operand::Literal(32767)
        );
        for i in 0..8u8 {
            let r = Register::new(i).unwrap();
            assert_eq!(r.word(), 32768 + Word::from(i));
            assert_eq!(
                Operand::try_from(r.word()).unwrap(),
                Operand::Register(r)
            );
        }
        assert!(matches!(
            Operand::try_from(32776),
            Err(Error::InvalidOperand(32776))
        ));
        assert!(matches!(
            Register::try_from(12),
            Err(Error::NotARegister(12))
        ));
        assert!(Register::new(8).is_none());
    }

    #[test]
    fn decode() {
        let mem = [9, 32768, 4, 32769, 19, 32768, 0];
        let op = Op::decode(&mem, 0).unwrap();
        let r0 = Register::new(0).unwrap();
        let r1 = Register::new(1).unwrap();
        assert_eq!(
            op,
            Op::Add(r0, Operand::Literal(4), Operand::Register(r1))
        );
        assert_eq!(op.size(), 4);
        assert_eq!(op.to_string(), "add r0 4 r1");

        let op = Op::decode(&mem, 4).unwrap();
        assert_eq!(op, Op::Out(Operand::Register(r0)));
        assert_eq!(op.size(), 2);

        assert_eq!(Op::decode(&mem, 6).unwrap(), Op::Halt);
    }

    #[test]
    fn decode_errors() {
        assert!(matches!(
            Op::decode(&[22], 0),
            Err(Error::UnknownOpcode(22))
        ));
        assert!(matches!(Op::decode(&[9, 32768, 1], 0), Err(Error::Truncated)));
        assert!(matches!(
            Op::decode(&[1, 7, 1], 0),
            Err(Error::NotARegister(7))
        ));
        assert!(matches!(
            Op::decode(&[2, 40000], 0),
            Err(Error::InvalidOperand(40000))
        ));
        assert!(matches!(
            Op::decode(&[21], 1),
            Err(Error::AddressOutOfRange(1))
        ));
    }
}
