use clap::Parser;
use lc3_core::{selftest, CoreError, TerminalConsole, TerminalGuard, Vm};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process;

const EXIT_FAILURE: i32 = 1;
const EXIT_INTERRUPT: i32 = 254;

#[derive(Parser, Debug)]
#[command(
    name = "lc3",
    about = "LC-3 virtual machine: loads big-endian object images and executes them."
)]
struct Args {
    /// Object images to load, in order; later images overwrite earlier
    /// ones where they overlap.
    #[arg(value_name = "IMAGE", required_unless_present = "test")]
    images: Vec<PathBuf>,

    /// Run the built-in check suite and exit.
    #[arg(long, default_value_t = false, conflicts_with = "images")]
    test: bool,

    /// Number of instructions to execute before exiting (0 = run to HALT).
    #[arg(long, default_value_t = 0)]
    steps: u64,
}

fn load_image(vm: &mut Vm<TerminalConsole>, path: &Path) -> lc3_core::Result<()> {
    let bytes = fs::read(path)?;
    vm.memory.load_image(&bytes)?;
    Ok(())
}

fn main() {
    let args = Args::parse();
    if args.test {
        process::exit(if selftest::run() { 0 } else { EXIT_FAILURE });
    }

    let mut vm = Vm::new(TerminalConsole::new());
    for path in &args.images {
        if let Err(err) = load_image(&mut vm, path) {
            eprintln!("failed to load {}: {err}", path.display());
            process::exit(EXIT_FAILURE);
        }
    }

    let guard = match TerminalGuard::enter() {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("fatal: {err}");
            process::exit(EXIT_FAILURE);
        }
    };
    let result = vm.run_steps(args.steps);
    drop(guard);

    match result {
        Ok(()) => {
            if args.steps != 0 {
                println!(
                    "executed {} instruction(s), pc=0x{:04X}, halted={}",
                    vm.executed(),
                    vm.registers.pc(),
                    !vm.is_running()
                );
            }
        }
        Err(CoreError::Io(err)) if err.kind() == ErrorKind::Interrupted => {
            eprintln!("interrupted");
            process::exit(EXIT_INTERRUPT);
        }
        Err(err) => {
            eprintln!("fatal: {err}");
            process::exit(EXIT_FAILURE);
        }
    }
}
