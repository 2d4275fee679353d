//! Terminal plumbing: the `Console` seam the core performs I/O through,
//! the crossterm-backed implementation used by the CLI, and a scripted
//! implementation for tests and the self-check suite.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::collections::VecDeque;
use std::io::{self, IsTerminal, Read, Write};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

/// Byte-oriented console the VM reads and writes through.
///
/// `poll_byte` must return without blocking; `read_byte` blocks until a
/// byte arrives or the input channel fails.
pub trait Console {
    fn poll_byte(&mut self) -> io::Result<Option<u8>>;
    fn read_byte(&mut self) -> io::Result<u8>;
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

/// Scoped raw-mode acquisition. Raw mode is entered only when stdin is a
/// terminal; `Drop` restores the previous mode on every exit path.
pub struct TerminalGuard {
    raw: bool,
}

impl TerminalGuard {
    pub fn enter() -> io::Result<Self> {
        let raw = io::stdin().is_terminal();
        if raw {
            crossterm::terminal::enable_raw_mode()?;
        }
        Ok(Self { raw })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if self.raw {
            let _ = crossterm::terminal::disable_raw_mode();
        }
    }
}

enum InputSource {
    /// Key events drained from the terminal; raw mode is expected to be
    /// active while the VM runs.
    Tty,
    /// Bytes pumped from a non-terminal stdin by a reader thread, so the
    /// zero-timeout poll stays non-blocking.
    Pipe(Receiver<u8>),
}

/// Console backed by the process's standard streams.
pub struct TerminalConsole {
    input: InputSource,
    out: io::Stdout,
}

impl Default for TerminalConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalConsole {
    pub fn new() -> Self {
        let input = if io::stdin().is_terminal() {
            InputSource::Tty
        } else {
            InputSource::Pipe(spawn_pipe_reader())
        };
        Self {
            input,
            out: io::stdout(),
        }
    }
}

fn spawn_pipe_reader() -> Receiver<u8> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut buf = [0u8; 1];
        while let Ok(n) = stdin.read(&mut buf) {
            if n == 0 || tx.send(buf[0]).is_err() {
                break;
            }
        }
    });
    rx
}

/// Map a key event to the byte a raw-mode read would have produced.
/// Ctrl-C surfaces as an `Interrupted` error; keys with no byte
/// representation yield `None`.
fn key_event_byte(key: &KeyEvent) -> io::Result<Option<u8>> {
    if !matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
        return Ok(None);
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "interrupted by Ctrl-C",
            )),
            KeyCode::Char(c) if c.is_ascii_alphabetic() => {
                Ok(Some(c.to_ascii_uppercase() as u8 & 0x1F))
            }
            _ => Ok(None),
        };
    }
    let byte = match key.code {
        KeyCode::Char(c) if c.is_ascii() => Some(c as u8),
        KeyCode::Enter => Some(b'\n'),
        KeyCode::Tab => Some(b'\t'),
        KeyCode::Backspace => Some(0x7F),
        KeyCode::Esc => Some(0x1B),
        _ => None,
    };
    Ok(byte)
}

impl Console for TerminalConsole {
    fn poll_byte(&mut self) -> io::Result<Option<u8>> {
        match &self.input {
            InputSource::Tty => {
                while event::poll(Duration::from_millis(0))? {
                    if let Event::Key(key) = event::read()? {
                        if let Some(byte) = key_event_byte(&key)? {
                            return Ok(Some(byte));
                        }
                    }
                }
                Ok(None)
            }
            InputSource::Pipe(rx) => match rx.try_recv() {
                Ok(byte) => Ok(Some(byte)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(None),
            },
        }
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        match &self.input {
            InputSource::Tty => loop {
                if let Event::Key(key) = event::read()? {
                    if let Some(byte) = key_event_byte(&key)? {
                        return Ok(byte);
                    }
                }
            },
            InputSource::Pipe(rx) => rx
                .recv()
                .map_err(|_| io::Error::new(io::ErrorKind::UnexpectedEof, "input closed")),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Console fed from a canned byte script, capturing everything written.
#[derive(Debug, Default)]
pub struct ScriptedConsole {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

impl ScriptedConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(bytes: &[u8]) -> Self {
        Self {
            input: bytes.iter().copied().collect(),
            output: Vec::new(),
        }
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl Console for ScriptedConsole {
    fn poll_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.input.pop_front())
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        self.input
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "input script exhausted"))
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.output.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
