//! Built-in check suite behind the CLI's `--test` flag: single-instruction
//! scenarios and gate checks run against a scripted console, reporting one
//! line per case. The same ground is covered by the cargo test suite; this
//! surface exists so a bare binary can verify itself.

use byteorder::{BigEndian, WriteBytesExt};

use crate::console::ScriptedConsole;
use crate::constants::{KBDR, KBSR, KBSR_READY};
use crate::cpu::Vm;
use crate::state::{CondFlag, Register};

type CheckResult = std::result::Result<(), String>;
type Check = fn() -> CheckResult;

/// Run every check, printing a line per case. Returns true when all pass.
pub fn run() -> bool {
    let checks: &[(&str, Check)] = &[
        ("add_register", add_register),
        ("add_immediate", add_immediate),
        ("and_register", and_register),
        ("and_immediate", and_immediate),
        ("not_complement", not_complement),
        ("ldi_chain", ldi_chain),
        ("halt_banner", halt_banner),
        ("keyboard_gate", keyboard_gate),
        ("image_layering", image_layering),
    ];
    let mut failures = 0usize;
    for (name, check) in checks {
        match check() {
            Ok(()) => println!("ok {name}"),
            Err(reason) => {
                failures += 1;
                println!("FAILED {name}: {reason}");
            }
        }
    }
    if failures == 0 {
        println!("self test passed ({} checks)", checks.len());
        true
    } else {
        println!("self test failed ({failures} of {} checks)", checks.len());
        false
    }
}

fn fresh_vm() -> Vm<ScriptedConsole> {
    Vm::new(ScriptedConsole::new())
}

fn step(vm: &mut Vm<ScriptedConsole>) -> CheckResult {
    vm.step().map_err(|err| err.to_string())
}

fn expect_eq<T: PartialEq + std::fmt::Debug>(what: &str, got: T, want: T) -> CheckResult {
    if got == want {
        Ok(())
    } else {
        Err(format!("{what}: got {got:?}, want {want:?}"))
    }
}

fn add_register() -> CheckResult {
    let mut vm = fresh_vm();
    vm.memory.write(0x3000, 0x1042);
    vm.registers.set(Register::R1, 1);
    vm.registers.set(Register::R2, 2);
    step(&mut vm)?;
    expect_eq("R0", vm.registers.get(Register::R0), 3)?;
    expect_eq("COND", vm.registers.cond(), CondFlag::Positive)?;
    expect_eq("PC", vm.registers.pc(), 0x3001)
}

fn add_immediate() -> CheckResult {
    let mut vm = fresh_vm();
    vm.memory.write(0x3000, 0x1062);
    vm.registers.set(Register::R1, 1);
    step(&mut vm)?;
    expect_eq("R0", vm.registers.get(Register::R0), 3)?;
    expect_eq("COND", vm.registers.cond(), CondFlag::Positive)
}

fn and_register() -> CheckResult {
    let mut vm = fresh_vm();
    vm.memory.write(0x3000, 0x5042);
    vm.registers.set(Register::R1, 0xFF);
    vm.registers.set(Register::R2, 0xF0);
    step(&mut vm)?;
    expect_eq("R0", vm.registers.get(Register::R0), 0xF0)?;
    expect_eq("COND", vm.registers.cond(), CondFlag::Positive)
}

fn and_immediate() -> CheckResult {
    let mut vm = fresh_vm();
    vm.memory.write(0x3000, 0x506F);
    vm.registers.set(Register::R1, 0xFF);
    step(&mut vm)?;
    expect_eq("R0", vm.registers.get(Register::R0), 0x0F)?;
    expect_eq("COND", vm.registers.cond(), CondFlag::Positive)
}

fn not_complement() -> CheckResult {
    let mut vm = fresh_vm();
    vm.memory.write(0x3000, 0x907F);
    vm.registers.set(Register::R1, 0x000F);
    step(&mut vm)?;
    expect_eq("R0", vm.registers.get(Register::R0), 0xFFF0)?;
    expect_eq("COND", vm.registers.cond(), CondFlag::Negative)
}

fn ldi_chain() -> CheckResult {
    let mut vm = fresh_vm();
    vm.memory.write(0x3000, 0xA001);
    vm.memory.write(0x3002, 0x4000);
    vm.memory.write(0x4000, 0x1234);
    step(&mut vm)?;
    expect_eq("R0", vm.registers.get(Register::R0), 0x1234)?;
    expect_eq("COND", vm.registers.cond(), CondFlag::Positive)
}

fn halt_banner() -> CheckResult {
    let mut vm = fresh_vm();
    vm.memory.write(0x3000, 0xF025);
    vm.run().map_err(|err| err.to_string())?;
    expect_eq("running", vm.is_running(), false)?;
    expect_eq("output", vm.console().output_string(), "HALT\n".to_string())
}

fn keyboard_gate() -> CheckResult {
    let mut vm = Vm::new(ScriptedConsole::with_input(b"Z"));
    // LDI R0 through a pointer at 0x3002 aimed at the status register.
    vm.memory.write(0x3000, 0xA001);
    vm.memory.write(0x3002, KBSR);
    step(&mut vm)?;
    expect_eq("KBSR", vm.registers.get(Register::R0), KBSR_READY)?;
    expect_eq("KBDR", vm.memory.read(KBDR), u16::from(b'Z'))?;
    expect_eq("COND", vm.registers.cond(), CondFlag::Negative)
}

fn image_layering() -> CheckResult {
    let mut vm = fresh_vm();
    let mut first = Vec::new();
    first.write_u16::<BigEndian>(0x3000).ok();
    first.write_u16::<BigEndian>(0x1111).ok();
    first.write_u16::<BigEndian>(0x2222).ok();
    let mut second = Vec::new();
    second.write_u16::<BigEndian>(0x3001).ok();
    second.write_u16::<BigEndian>(0x3333).ok();
    vm.memory
        .load_image(&first)
        .map_err(|err| err.to_string())?;
    vm.memory
        .load_image(&second)
        .map_err(|err| err.to_string())?;
    expect_eq("first word", vm.memory.read(0x3000), 0x1111)?;
    expect_eq("layered word", vm.memory.read(0x3001), 0x3333)
}
