use std::path::{Path, PathBuf};

use synacor_console::{Console, Mode};
use synacor_vm::{UnknownOpcodePolicy, Vm, Word, dis, image};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, info, warn};

/// Synacor VM runner
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load and execute a program
    Run(RunArgs),

    /// Print a disassembly of a program
    Dis {
        /// Program image to disassemble
        rom: PathBuf,
    },

    /// Print the raw contents of a program image
    Dump(DumpArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Program image to load and execute
    rom: PathBuf,

    /// Trace every instruction, printing program output at exit
    #[clap(long)]
    debug: bool,

    /// What to do when an unknown opcode is encountered
    #[clap(long, value_enum, default_value_t)]
    unknown_opcode: UnknownOpcodePolicy,

    /// Stop on unknown opcodes (same as `--unknown-opcode fault`)
    #[clap(long)]
    strict: bool,

    /// File of input which is fed to the program before `stdin`
    #[clap(long)]
    script: Option<PathBuf>,
}

#[derive(Args)]
struct DumpArgs {
    /// Program image to dump
    rom: PathBuf,

    /// Number of words per row
    #[clap(long, default_value_t = 16, value_parser = clap::value_parser!(u16).range(1..))]
    width: u16,

    /// Print words as text instead of hex
    #[clap(long)]
    text: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env = env_logger::Env::default()
        .filter_or("SYNACOR_LOG", "info")
        .write_style_or("SYNACOR_LOG", "always");
    let mut builder = env_logger::Builder::from_env(env);
    if let Command::Run(RunArgs { debug: true, .. }) = cli.command {
        builder.filter_module("synacor_vm", LevelFilter::Trace);
    }
    builder.init();

    match cli.command {
        Command::Run(args) => run(args),
        Command::Dis { rom } => {
            let program = load(&rom)?;
            for line in dis::disassemble(&program) {
                println!("{line}");
            }
            Ok(())
        }
        Command::Dump(args) => {
            let program = load(&args.rom)?;
            for (i, row) in program.chunks(usize::from(args.width)).enumerate() {
                println!("{}", dump_row(i * usize::from(args.width), row, args.text));
            }
            Ok(())
        }
    }
}

/// Reads and validates a program image
fn load(path: &Path) -> Result<Vec<Word>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read {path:?}"))?;
    let program = image::decode(&bytes)
        .with_context(|| format!("failed to decode {path:?}"))?;
    info!("loaded {} words from {path:?}", program.len());
    Ok(program)
}

fn run(args: RunArgs) -> Result<()> {
    let program = load(&args.rom)?;
    let policy = if args.strict {
        UnknownOpcodePolicy::Fault
    } else {
        args.unknown_opcode
    };
    let mut vm = Vm::new().with_policy(policy);
    vm.load(&program)?;

    // Buffer output in debug mode, so it doesn't get mixed into the trace
    let mode = if args.debug {
        Mode::Buffered
    } else {
        Mode::Interactive
    };
    let mut console = Console::new(mode);
    if let Some(path) = &args.script {
        let script = std::fs::read(path)
            .with_context(|| format!("failed to read script {path:?}"))?;
        console.script(&script);
    }

    let start = std::time::Instant::now();
    let r = vm.run(&mut console);
    console.finish().context("failed to write output")?;
    if vm.skipped_opcodes() > 0 {
        warn!("skipped {} unknown opcodes", vm.skipped_opcodes());
    }
    r.context("program failed")?;
    info!("halted after {:?}", start.elapsed());

    Ok(())
}

/// Formats a row of words, tagged with the address of its first word
fn dump_row(addr: usize, row: &[Word], text: bool) -> String {
    let mut out = format!("{addr:#06x}:");
    if text {
        out.push(' ');
        out.extend(row.iter().map(|&w| match u8::try_from(w) {
            Ok(c @ b'0'..=b'z') => char::from(c),
            _ => ' ',
        }));
    } else {
        for w in row {
            out += &format!(" {w:04x}");
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dump_rows() {
        assert_eq!(dump_row(16, &[0, 0x8000, 65], false), "0x0010: 0000 8000 0041");
        assert_eq!(dump_row(0, &[72, 105, 32, 33, 122, 123], true), "0x0000: Hi  z ");
    }

    #[test]
    fn strict_flag() {
        let cli = Cli::parse_from(["synacor", "run", "a.bin", "--strict"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert!(args.strict);
        assert_eq!(args.unknown_opcode, UnknownOpcodePolicy::Skip);

        let cli = Cli::parse_from(["synacor", "dump", "a.bin", "--width", "8"]);
        let Command::Dump(args) = cli.command else {
            panic!("expected dump command");
        };
        assert_eq!(args.width, 8);
        assert!(!args.text);
    }
}
