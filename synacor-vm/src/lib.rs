//! Synacor virtual machine
//!
//! A word-addressed machine with 32768 words of memory, eight registers which
//! are overlaid onto the operand space above memory, an unbounded stack, and
//! 22 variable-length instructions.
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use log::{debug, trace, warn};
use static_assertions::{const_assert, const_assert_eq};
use thiserror::Error;

pub mod dis;
pub mod image;
mod op;

pub use op::{Op, Opcode, Operand, Register};

/// A machine word
///
/// Values are 15-bit; the extra bit is used to encode register references in
/// instruction operands.
pub type Word = u16;

/// Size of memory, in words
pub const MEMORY_SIZE: usize = 1 << 15;

/// Number of registers
pub const REGISTER_COUNT: usize = 8;

/// Operand word naming register 0; registers 1-7 follow it
pub const REGISTER_BASE: Word = 32768;

/// Largest word which may appear as an operand (or in a program image)
pub const MAX_OPERAND: Word = REGISTER_BASE + REGISTER_COUNT as Word - 1;

/// Arithmetic is performed modulo this value
pub const MODULUS: u32 = 1 << 15;

/// Mask selecting the low 15 bits of a word
pub const MASK: Word = 0x7FFF;

/// Program counter value after the machine has halted
const HALTED: Word = MEMORY_SIZE as Word;

const_assert_eq!(REGISTER_BASE as usize, MEMORY_SIZE);
const_assert_eq!(MASK as u32 + 1, MODULUS);
const_assert!(MAX_OPERAND as usize == MEMORY_SIZE + REGISTER_COUNT - 1);

/// Adds two words, modulo 32768
#[inline]
pub fn add(a: Word, b: Word) -> Word {
    ((u32::from(a) + u32::from(b)) % MODULUS) as Word
}

/// Multiplies two words, modulo 32768
#[inline]
pub fn mult(a: Word, b: Word) -> Word {
    ((u32::from(a) * u32::from(b)) % MODULUS) as Word
}

/// Bitwise inverse, masked to 15 bits
#[inline]
pub fn not(a: Word) -> Word {
    !a & MASK
}

/// Errors which can occur while decoding or executing an instruction
#[derive(Debug, Error)]
pub enum Error {
    /// An operand word is larger than [`MAX_OPERAND`]
    #[error("operand {0} is neither a literal nor a register")]
    InvalidOperand(Word),

    /// A destination operand does not name a register
    #[error("operand {0} does not name a register")]
    NotARegister(Word),

    /// A memory access is past the end of memory
    #[error("address {0} is outside of memory")]
    AddressOutOfRange(usize),

    /// The instruction's operands run past the end of memory
    #[error("instruction is truncated by the end of memory")]
    Truncated,

    /// The word at the program counter is not an opcode
    #[error("unknown opcode {0}")]
    UnknownOpcode(Word),

    /// `pop` was executed with an empty stack
    #[error("stack underflow")]
    StackUnderflow,

    /// `in` was executed, but the device will never produce more input
    #[error("input exhausted")]
    InputExhausted,

    /// `mod` was executed with a divisor of zero
    #[error("division by zero")]
    DivideByZero,

    /// The device failed
    #[error("device error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fatal error, annotated with the location of the failing instruction
#[derive(Debug, Error)]
#[error("{source} at pc {pc} (`{mnemonic}`)")]
pub struct Fault {
    /// Address of the failing instruction
    pub pc: Word,

    /// Mnemonic of the failing instruction, or `???` if it has no opcode
    pub mnemonic: &'static str,

    /// The underlying error
    pub source: Error,
}

/// What to do when the word at the program counter is not an opcode
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum UnknownOpcodePolicy {
    /// Log a warning and continue at the next word
    #[default]
    Skip,

    /// Stop with a [`Fault`]
    Fault,
}

/// Result of a single step
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// The machine can keep running
    Running,
    /// The machine has halted
    Halted,
}

/// Trait for the I/O channel attached to the VM
pub trait Device {
    /// Performs the `out` operation, emitting the character with code `value`
    fn output(&mut self, value: Word) -> std::io::Result<()>;

    /// Performs the `in` operation
    ///
    /// Blocks until a value is available.  Returns `Ok(None)` if the input
    /// source is exhausted.
    fn input(&mut self) -> std::io::Result<Option<Word>>;
}

impl<D: Device + ?Sized> Device for &mut D {
    fn output(&mut self, value: Word) -> std::io::Result<()> {
        (**self).output(value)
    }
    fn input(&mut self) -> std::io::Result<Option<Word>> {
        (**self).input()
    }
}

/// Device which discards output and has no input
pub struct EmptyDevice;
impl Device for EmptyDevice {
    fn output(&mut self, _value: Word) -> std::io::Result<()> {
        // nothing to do here
        Ok(())
    }
    fn input(&mut self) -> std::io::Result<Option<Word>> {
        Ok(None)
    }
}

fn check_address(addr: Word) -> Result<(), Error> {
    if usize::from(addr) < MEMORY_SIZE {
        Ok(())
    } else {
        Err(Error::AddressOutOfRange(usize::from(addr)))
    }
}

/// LIFO stack, used by `push` / `pop` and for `call` / `ret` linkage
#[derive(Clone, Debug, Default)]
pub struct Stack {
    data: Vec<Word>,
}

impl Stack {
    /// Pushes a value onto the stack
    #[inline]
    pub fn push(&mut self, v: Word) {
        self.data.push(v);
    }

    /// Pops a value from the stack
    #[inline]
    pub fn pop(&mut self) -> Result<Word, Error> {
        self.data.pop().ok_or(Error::StackUnderflow)
    }

    /// Returns the top of the stack without removing it
    #[inline]
    pub fn peek(&self) -> Option<Word> {
        self.data.last().copied()
    }

    /// Returns the number of items in the stack
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Checks whether the stack is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Removes every item from the stack
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Iterates over the stack, from bottom to top
    pub fn iter(&self) -> impl Iterator<Item = Word> + '_ {
        self.data.iter().copied()
    }
}

/// The virtual machine itself
pub struct Vm {
    /// 32768 words of memory
    mem: Box<[Word]>,
    /// Register file, addressed by operands `32768..=32775`
    reg: [Word; REGISTER_COUNT],
    stack: Stack,
    pc: Word,
    policy: UnknownOpcodePolicy,
    /// Number of unknown opcodes skipped since the last `load`
    skipped: usize,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// Builds a new VM with zeroed memory and registers
    pub fn new() -> Self {
        Self {
            mem: vec![0; MEMORY_SIZE].into_boxed_slice(),
            reg: [0; REGISTER_COUNT],
            stack: Stack::default(),
            pc: 0,
            policy: UnknownOpcodePolicy::default(),
            skipped: 0,
        }
    }

    /// Sets the unknown-opcode policy, returning the modified VM
    pub fn with_policy(mut self, policy: UnknownOpcodePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the unknown-opcode policy
    pub fn set_policy(&mut self, policy: UnknownOpcodePolicy) {
        self.policy = policy;
    }

    /// Returns the unknown-opcode policy
    pub fn policy(&self) -> UnknownOpcodePolicy {
        self.policy
    }

    /// Returns the number of unknown opcodes skipped since the last
    /// [`Vm::load`], under [`UnknownOpcodePolicy::Skip`]
    pub fn skipped_opcodes(&self) -> usize {
        self.skipped
    }

    /// Loads a program at address 0, resetting the rest of the machine
    ///
    /// Memory past the end of the program is zeroed; registers and stack are
    /// cleared, and the program counter is set to 0.
    pub fn load(&mut self, program: &[Word]) -> Result<(), image::ImageError> {
        image::validate(program)?;
        self.mem[..program.len()].copy_from_slice(program);
        self.mem[program.len()..].fill(0);
        self.reg = [0; REGISTER_COUNT];
        self.stack.clear();
        self.pc = 0;
        self.skipped = 0;
        Ok(())
    }

    /// Returns the program counter
    #[inline]
    pub fn pc(&self) -> Word {
        self.pc
    }

    /// Sets the program counter
    #[inline]
    pub fn set_pc(&mut self, pc: Word) {
        self.pc = pc;
    }

    /// Checks whether the program counter has run off the end of memory
    #[inline]
    pub fn is_halted(&self) -> bool {
        usize::from(self.pc) >= MEMORY_SIZE
    }

    /// Shared borrow of the register file
    #[inline]
    pub fn registers(&self) -> &[Word; REGISTER_COUNT] {
        &self.reg
    }

    /// Mutable borrow of the register file
    #[inline]
    pub fn registers_mut(&mut self) -> &mut [Word; REGISTER_COUNT] {
        &mut self.reg
    }

    /// Shared borrow of memory
    #[inline]
    pub fn memory(&self) -> &[Word] {
        &self.mem
    }

    /// Mutable borrow of memory
    #[inline]
    pub fn memory_mut(&mut self) -> &mut [Word] {
        &mut self.mem
    }

    /// Shared borrow of the stack
    #[inline]
    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// Mutable borrow of the stack
    #[inline]
    pub fn stack_mut(&mut self) -> &mut Stack {
        &mut self.stack
    }

    /// Resolves a raw operand word to a value
    ///
    /// Literals are returned unchanged, register references return the
    /// register's contents, and anything else is an error.
    pub fn resolve(&self, v: Word) -> Result<Word, Error> {
        Operand::try_from(v).map(|o| self.operand(o))
    }

    /// Resolves a decoded operand to a value
    #[inline]
    pub fn operand(&self, o: Operand) -> Word {
        match o {
            Operand::Literal(v) => v,
            Operand::Register(r) => self.reg[r.index()],
        }
    }

    /// Writes to the register named by the raw operand word `dst`
    pub fn write_register(&mut self, dst: Word, value: Word) -> Result<(), Error> {
        let r = Register::try_from(dst)?;
        self.reg[r.index()] = value;
        Ok(())
    }

    /// Reads a word from memory
    pub fn read_memory(&self, addr: Word) -> Result<Word, Error> {
        let addr = usize::from(addr);
        self.mem
            .get(addr)
            .copied()
            .ok_or(Error::AddressOutOfRange(addr))
    }

    /// Writes a word to memory
    pub fn write_memory(&mut self, addr: Word, value: Word) -> Result<(), Error> {
        let addr = usize::from(addr);
        let slot = self
            .mem
            .get_mut(addr)
            .ok_or(Error::AddressOutOfRange(addr))?;
        *slot = value;
        Ok(())
    }

    /// Decodes the instruction at the given address
    #[inline]
    pub fn decode(&self, pc: Word) -> Result<Op, Error> {
        Op::decode(&self.mem, usize::from(pc))
    }

    /// Runs the VM until it halts
    pub fn run<D: Device>(&mut self, dev: &mut D) -> Result<(), Fault> {
        while self.step(dev)? == Status::Running {}
        Ok(())
    }

    /// Runs the VM until it halts or the callback returns `true`
    ///
    /// The callback is called after every step with the number of steps
    /// executed so far.  Returns `true` if the VM halted, and `false` if it
    /// was stopped by the callback.
    pub fn run_until<D, F>(&mut self, dev: &mut D, mut f: F) -> Result<bool, Fault>
    where
        D: Device,
        F: FnMut(&Self, usize) -> bool,
    {
        let mut i = 0;
        loop {
            if self.step(dev)? == Status::Halted {
                return Ok(true);
            }
            i += 1;
            if f(self, i) {
                return Ok(false);
            }
        }
    }

    /// Executes the instruction at the program counter
    pub fn step<D: Device>(&mut self, dev: &mut D) -> Result<Status, Fault> {
        if self.is_halted() {
            return Ok(Status::Halted);
        }
        let pc = self.pc;
        let op = match self.decode(pc) {
            Ok(op) => op,
            Err(Error::UnknownOpcode(w))
                if self.policy == UnknownOpcodePolicy::Skip =>
            {
                warn!("unknown opcode {w} at {pc}, skipping");
                self.skipped += 1;
                self.pc = pc + 1;
                return Ok(self.status());
            }
            Err(source) => {
                let mnemonic = Opcode::from_word(self.mem[usize::from(pc)])
                    .map(Opcode::name)
                    .unwrap_or("???");
                return Err(Fault {
                    pc,
                    mnemonic,
                    source,
                });
            }
        };
        trace!(
            "{pc:>5}: {:<24} reg: {:?} stack: {} {:?}",
            op.to_string(),
            self.reg,
            self.stack.len(),
            self.stack.peek(),
        );
        self.pc = self.run_op(op, dev).map_err(|source| Fault {
            pc,
            mnemonic: op.opcode().name(),
            source,
        })?;
        Ok(self.status())
    }

    fn status(&self) -> Status {
        if self.is_halted() {
            debug!("halted");
            Status::Halted
        } else {
            Status::Running
        }
    }

    /// Executes a single decoded instruction, returning the next pc
    fn run_op<D: Device>(&mut self, op: Op, dev: &mut D) -> Result<Word, Error> {
        // pc is below MEMORY_SIZE here, so this can't overflow
        let next = self.pc + op.size();
        match op {
            Op::Halt => return Ok(HALTED),
            Op::Set(a, b) => {
                self.reg[a.index()] = self.operand(b);
            }
            Op::Push(a) => {
                let v = self.operand(a);
                self.stack.push(v);
            }
            Op::Pop(a) => {
                self.reg[a.index()] = self.stack.pop()?;
            }
            Op::Eq(a, b, c) => self.op_cmp(a, b, c, |b, c| b == c),
            Op::Gt(a, b, c) => self.op_cmp(a, b, c, |b, c| b > c),
            Op::Jmp(a) => return self.target(a),
            Op::Jt(a, b) => {
                if self.operand(a) != 0 {
                    return self.target(b);
                }
            }
            Op::Jf(a, b) => {
                if self.operand(a) == 0 {
                    return self.target(b);
                }
            }
            Op::Add(a, b, c) => self.op_bin(a, b, c, add),
            Op::Mult(a, b, c) => self.op_bin(a, b, c, mult),
            Op::Mod(a, b, c) => {
                let divisor = self.operand(c);
                if divisor == 0 {
                    return Err(Error::DivideByZero);
                }
                self.reg[a.index()] = self.operand(b) % divisor;
            }
            Op::And(a, b, c) => self.op_bin(a, b, c, |b, c| b & c & MASK),
            Op::Or(a, b, c) => self.op_bin(a, b, c, |b, c| (b | c) & MASK),
            Op::Not(a, b) => {
                self.reg[a.index()] = not(self.operand(b));
            }
            Op::Rmem(a, b) => {
                let addr = self.operand(b);
                self.reg[a.index()] = self.read_memory(addr)?;
            }
            Op::Wmem(a, b) => {
                let addr = self.operand(a);
                let v = self.operand(b);
                self.write_memory(addr, v)?;
            }
            Op::Call(a) => {
                let target = self.target(a)?;
                self.stack.push(next);
                return Ok(target);
            }
            Op::Ret => {
                let Some(target) = self.stack.peek() else {
                    debug!("return with an empty stack");
                    return Ok(HALTED);
                };
                check_address(target)?;
                return self.stack.pop();
            }
            Op::Out(a) => {
                dev.output(self.operand(a))?;
            }
            Op::In(a) => {
                let v = dev.input()?.ok_or(Error::InputExhausted)?;
                self.reg[a.index()] = v;
            }
            Op::Noop => (),
        }
        Ok(next)
    }

    /// Resolves a control-transfer target, which must lie within memory
    fn target(&self, a: Operand) -> Result<Word, Error> {
        let t = self.operand(a);
        check_address(t)?;
        Ok(t)
    }

    fn op_cmp<F: Fn(Word, Word) -> bool>(
        &mut self,
        a: Register,
        b: Operand,
        c: Operand,
        f: F,
    ) {
        let v = f(self.operand(b), self.operand(c));
        self.reg[a.index()] = Word::from(v);
    }

    fn op_bin<F: Fn(Word, Word) -> Word>(
        &mut self,
        a: Register,
        b: Operand,
        c: Operand,
        f: F,
    ) {
        self.reg[a.index()] = f(self.operand(b), self.operand(c));
    }
}
