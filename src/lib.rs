pub mod console;
pub mod constants;
pub mod cpu;
pub mod decode;
pub mod memory;
pub mod selftest;
pub mod state;
pub mod trap;

use thiserror::Error;

pub use console::{Console, ScriptedConsole, TerminalConsole, TerminalGuard};
pub use constants::{KBDR, KBSR, KBSR_READY, MEMORY_WORDS, PC_START};
pub use cpu::Vm;
pub use decode::{sign_extend, Instruction, Opcode};
pub use memory::MemoryImage;
pub use state::{CondFlag, Register, Registers};
pub use trap::TrapVector;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad image: {0}")]
    InvalidImage(String),
    #[error("illegal opcode {opcode} at 0x{pc:04X}")]
    IllegalOpcode { opcode: Opcode, pc: u16 },
    #[error("program counter overflowed 0xFFFF")]
    PcOverflow,
}
