//! Terminal I/O for the Synacor VM
//!
//! [`Console`] implements [`synacor_vm::Device`], writing characters to a sink
//! (usually `stdout`) and reading bytes from `stdin` or a fixed buffer.
#![warn(missing_docs)]

use log::{debug, warn};
use std::{
    collections::VecDeque,
    io::{Read, Stdout, Write},
    sync::mpsc,
};
use synacor_vm::{Device, Word};

/// Output mode
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    /// Every character is written and flushed as soon as it is produced
    #[default]
    Interactive,
    /// Output is accumulated, then written by [`Console::finish`]
    Buffered,
}

/// Spawns a worker thread that listens on `stdin` and emits bytes
///
/// The channel is closed when `stdin` reaches end-of-file.
pub fn worker() -> mpsc::Receiver<u8> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut i = std::io::stdin().lock();
        let mut buf = [0u8; 32];
        loop {
            let n = match i.read(&mut buf) {
                Ok(0) => {
                    debug!("stdin closed");
                    return;
                }
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                    continue;
                }
                Err(e) => {
                    warn!("failed to read stdin: {e}");
                    return;
                }
            };
            for &c in &buf[..n] {
                if tx.send(c).is_err() {
                    return;
                }
            }
        }
    });
    rx
}

enum Source {
    /// Bytes forwarded by the [`worker`] thread
    Stdin(mpsc::Receiver<u8>),
    /// A fixed sequence of bytes
    Bytes(VecDeque<u8>),
}

impl Source {
    fn next(&mut self) -> Option<u8> {
        match self {
            Source::Stdin(rx) => rx.recv().ok(),
            Source::Bytes(b) => b.pop_front(),
        }
    }
}

/// Console device
pub struct Console<W: Write = Stdout> {
    mode: Mode,
    sink: W,

    /// Pending output, used in [`Mode::Buffered`]
    buf: Vec<u8>,

    /// Scripted input, consumed before `source`
    script: VecDeque<u8>,
    source: Source,
}

impl Console {
    /// Builds a console which writes to `stdout` and reads from `stdin`
    pub fn new(mode: Mode) -> Self {
        Self::with_source(mode, std::io::stdout(), Source::Stdin(worker()))
    }
}

impl<W: Write> Console<W> {
    /// Builds a console with the given sink and a fixed input sequence
    pub fn from_bytes(mode: Mode, sink: W, input: &[u8]) -> Self {
        Self::with_source(mode, sink, Source::Bytes(input.iter().copied().collect()))
    }

    /// Builds a console with the given sink, reading from `stdin`
    pub fn with_sink(mode: Mode, sink: W) -> Self {
        Self::with_source(mode, sink, Source::Stdin(worker()))
    }

    fn with_source(mode: Mode, sink: W, source: Source) -> Self {
        Self {
            mode,
            sink,
            buf: vec![],
            script: VecDeque::new(),
            source,
        }
    }

    /// Queues scripted input, which is read before the console's own source
    pub fn script(&mut self, bytes: &[u8]) {
        debug!("queued {} bytes of scripted input", bytes.len());
        self.script.extend(bytes);
    }

    /// Returns the output mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Returns buffered output which has not yet been written
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Borrows the sink
    pub fn sink(&self) -> &W {
        &self.sink
    }

    /// Writes any buffered output to the sink, then flushes it
    pub fn finish(&mut self) -> std::io::Result<()> {
        if !self.buf.is_empty() {
            self.sink.write_all(&self.buf)?;
            self.buf.clear();
        }
        self.sink.flush()
    }

    /// Unwraps the console, returning its sink
    ///
    /// Buffered output which was not written by [`Console::finish`] is
    /// discarded.
    pub fn into_sink(self) -> W {
        self.sink
    }
}

impl<W: Write> Device for Console<W> {
    fn output(&mut self, value: Word) -> std::io::Result<()> {
        let c = char::from_u32(u32::from(value))
            .unwrap_or(char::REPLACEMENT_CHARACTER);
        let mut tmp = [0u8; 4];
        let bytes = c.encode_utf8(&mut tmp).as_bytes();
        match self.mode {
            Mode::Interactive => {
                self.sink.write_all(bytes)?;
                self.sink.flush()
            }
            Mode::Buffered => {
                self.buf.extend_from_slice(bytes);
                Ok(())
            }
        }
    }

    fn input(&mut self) -> std::io::Result<Option<Word>> {
        if let Some(c) = self.script.pop_front() {
            if self.script.is_empty() {
                debug!("scripted input finished");
            }
            return Ok(Some(Word::from(c)));
        }
        Ok(self.source.next().map(Word::from))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Sink which records how many times it was flushed
    #[derive(Default)]
    struct FlushCounter {
        data: Vec<u8>,
        flushes: usize,
    }

    impl Write for FlushCounter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn interactive_writes_through() {
        let mut c =
            Console::from_bytes(Mode::Interactive, FlushCounter::default(), b"");
        c.output(72).unwrap();
        assert_eq!(c.sink().data, b"H");
        assert_eq!(c.sink().flushes, 1);
        c.output(105).unwrap();
        assert_eq!(c.sink().data, b"Hi");
        assert_eq!(c.sink().flushes, 2);
        assert!(c.pending().is_empty());
    }

    #[test]
    fn buffered_flushes_once() {
        let mut c =
            Console::from_bytes(Mode::Buffered, FlushCounter::default(), b"");
        for v in [72, 105, 10] {
            c.output(v).unwrap();
        }
        assert!(c.sink().data.is_empty());
        assert_eq!(c.sink().flushes, 0);
        c.finish().unwrap();
        assert_eq!(c.sink().data, b"Hi\n");
        assert_eq!(c.sink().flushes, 1);
    }

    #[test]
    fn buffered_waits_for_finish() {
        let mut c = Console::from_bytes(Mode::Buffered, vec![], b"");
        c.output(72).unwrap();
        c.output(10).unwrap();
        assert!(c.sink().is_empty());
        assert_eq!(c.pending(), b"H\n");
        c.finish().unwrap();
        assert_eq!(c.into_sink(), b"H\n");
    }

    #[test]
    fn wide_characters() {
        let mut c = Console::from_bytes(Mode::Interactive, vec![], b"");
        c.output(0xe9).unwrap();
        c.output(32775).unwrap();
        assert_eq!(c.into_sink(), "\u{e9}\u{8007}".as_bytes());
    }

    #[test]
    fn script_then_source() {
        let mut c = Console::from_bytes(Mode::Buffered, vec![], b"cd");
        c.script(b"ab");
        let mut got = vec![];
        while let Some(v) = c.input().unwrap() {
            got.push(v);
        }
        assert_eq!(got, [97, 98, 99, 100]);
        assert_eq!(c.input().unwrap(), None);
    }
}
