use synacor_console::{Console, Mode};
use synacor_vm::{Error, REGISTER_BASE, Vm, Word};

const R0: Word = REGISTER_BASE;

/// Prints "hi!\n"
const HELLO: [Word; 9] = [19, 104, 19, 105, 19, 33, 19, 10, 0];

/// Echoes input until a newline, then halts
///
/// ```text
/// 0: in r0
/// 2: out r0
/// 4: eq r1 r0 10
/// 8: jf r1 0
/// 11: halt
/// ```
const ECHO: [Word; 12] =
    [20, R0, 19, R0, 4, R0 + 1, R0, 10, 8, R0 + 1, 0, 0];

fn run(program: &[Word], mode: Mode, input: &[u8]) -> (Vm, Console<Vec<u8>>) {
    let mut vm = Vm::new();
    vm.load(program).unwrap();
    let mut console = Console::from_bytes(mode, vec![], input);
    vm.run(&mut console).unwrap();
    (vm, console)
}

#[test]
fn hello() {
    let (vm, console) = run(&HELLO, Mode::Interactive, b"");
    assert!(vm.is_halted());
    assert_eq!(console.into_sink(), b"hi!\n");
}

#[test]
fn buffered_hello() {
    let (_vm, mut console) = run(&HELLO, Mode::Buffered, b"");
    assert!(console.sink().is_empty());
    console.finish().unwrap();
    assert_eq!(console.into_sink(), b"hi!\n");
}

#[test]
fn echo() {
    let (vm, console) = run(&ECHO, Mode::Interactive, b"look\nignored");
    assert_eq!(vm.registers()[0], 10);
    assert_eq!(console.into_sink(), b"look\n");
}

#[test]
fn scripted_echo() {
    let mut vm = Vm::new();
    vm.load(&ECHO).unwrap();
    let mut console = Console::from_bytes(Mode::Buffered, vec![], b"go\n");
    console.script(b"take ");
    vm.run(&mut console).unwrap();
    console.finish().unwrap();
    assert_eq!(console.into_sink(), b"take go\n");
}

#[test]
fn exhausted_input() {
    let mut vm = Vm::new();
    vm.load(&ECHO).unwrap();
    let mut console = Console::from_bytes(Mode::Interactive, vec![], b"ab");
    let err = vm.run(&mut console).unwrap_err();
    assert_eq!(err.pc, 0);
    assert_eq!(err.mnemonic, "in");
    assert!(matches!(err.source, Error::InputExhausted));
    assert_eq!(console.into_sink(), b"ab");
}
