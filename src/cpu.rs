//! The fetch-decode-execute engine.

use std::env;

use crate::console::Console;
use crate::constants::{KBDR, KBSR, KBSR_READY, PC_START};
use crate::decode::{Instruction, Opcode};
use crate::memory::MemoryImage;
use crate::state::{Register, Registers};
use crate::{CoreError, Result};

/// One LC-3 machine: memory, registers, and the console it performs I/O
/// through. Each run owns its own `Vm`; tests build as many as they need.
pub struct Vm<C: Console> {
    pub memory: MemoryImage,
    pub registers: Registers,
    pub(crate) console: C,
    running: bool,
    executed: u64,
    trace: bool,
}

impl<C: Console> Vm<C> {
    pub fn new(console: C) -> Self {
        let mut registers = Registers::new();
        registers.set_pc(PC_START);
        Self {
            memory: MemoryImage::new(),
            registers,
            console,
            running: true,
            executed: 0,
            trace: env::var("LC3_TRACE").is_ok(),
        }
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of instructions retired so far.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    pub(crate) fn halt(&mut self) {
        self.running = false;
    }

    /// Gated read used by instruction handlers. A read of the keyboard
    /// status register polls the console and latches any pending byte
    /// into the data register; the status read itself is never pure.
    pub fn mem_read(&mut self, addr: u16) -> Result<u16> {
        if addr == KBSR {
            match self.console.poll_byte()? {
                Some(byte) => {
                    self.memory.write(KBSR, KBSR_READY);
                    self.memory.write(KBDR, byte as u16);
                }
                None => self.memory.write(KBSR, 0),
            }
        }
        Ok(self.memory.read(addr))
    }

    pub fn mem_write(&mut self, addr: u16, value: u16) {
        self.memory.write(addr, value);
    }

    /// Fetch, decode, and retire one instruction.
    pub fn step(&mut self) -> Result<()> {
        let pc = self.registers.pc();
        if pc == u16::MAX {
            return Err(CoreError::PcOverflow);
        }
        let instr = Instruction(self.mem_read(pc)?);
        self.registers.set_pc(pc.wrapping_add(1));
        let opcode = instr.opcode();
        if self.trace {
            eprintln!(
                "[trace] pc=0x{pc:04X} word=0x{word:04X} op={opcode}",
                word = instr.0
            );
        }
        match opcode {
            Opcode::Br => self.op_br(instr),
            Opcode::Add => self.op_add(instr),
            Opcode::Ld => self.op_ld(instr),
            Opcode::St => self.op_st(instr),
            Opcode::Jsr => self.op_jsr(instr),
            Opcode::And => self.op_and(instr),
            Opcode::Ldr => self.op_ldr(instr),
            Opcode::Str => self.op_str(instr),
            Opcode::Not => self.op_not(instr),
            Opcode::Ldi => self.op_ldi(instr),
            Opcode::Sti => self.op_sti(instr),
            Opcode::Jmp => self.op_jmp(instr),
            Opcode::Lea => self.op_lea(instr),
            Opcode::Trap => self.trap(instr),
            Opcode::Rti | Opcode::Res => Err(CoreError::IllegalOpcode { opcode, pc }),
        }?;
        self.executed += 1;
        Ok(())
    }

    /// Drive the loop until HALT or a fatal condition.
    pub fn run(&mut self) -> Result<()> {
        while self.running {
            self.step()?;
        }
        Ok(())
    }

    /// As [`run`](Self::run), retiring at most `limit` instructions
    /// (0 = unlimited).
    pub fn run_steps(&mut self, limit: u64) -> Result<()> {
        if limit == 0 {
            return self.run();
        }
        while self.running && self.executed < limit {
            self.step()?;
        }
        Ok(())
    }

    fn binop(&mut self, instr: Instruction, f: fn(u16, u16) -> u16) -> Result<()> {
        let dr = instr.dr();
        let lhs = self.registers.get(instr.sr1());
        let rhs = if instr.imm_mode() {
            instr.imm5()
        } else {
            self.registers.get(instr.sr2())
        };
        self.registers.set(dr, f(lhs, rhs));
        self.registers.update_flags(dr);
        Ok(())
    }

    fn op_add(&mut self, instr: Instruction) -> Result<()> {
        self.binop(instr, u16::wrapping_add)
    }

    fn op_and(&mut self, instr: Instruction) -> Result<()> {
        self.binop(instr, |a, b| a & b)
    }

    fn op_not(&mut self, instr: Instruction) -> Result<()> {
        let dr = instr.dr();
        self.registers.set(dr, !self.registers.get(instr.sr1()));
        self.registers.update_flags(dr);
        Ok(())
    }

    fn op_br(&mut self, instr: Instruction) -> Result<()> {
        if instr.cond_mask() & self.registers.cond().bits() != 0 {
            let target = self.registers.pc().wrapping_add(instr.pc_offset9());
            self.registers.set_pc(target);
        }
        Ok(())
    }

    fn op_jmp(&mut self, instr: Instruction) -> Result<()> {
        self.registers.set_pc(self.registers.get(instr.base_r()));
        Ok(())
    }

    fn op_jsr(&mut self, instr: Instruction) -> Result<()> {
        let pc = self.registers.pc();
        self.registers.set(Register::R7, pc);
        let target = if instr.long_jump() {
            pc.wrapping_add(instr.pc_offset11())
        } else {
            self.registers.get(instr.base_r())
        };
        self.registers.set_pc(target);
        Ok(())
    }

    fn op_ld(&mut self, instr: Instruction) -> Result<()> {
        let dr = instr.dr();
        let addr = self.registers.pc().wrapping_add(instr.pc_offset9());
        let value = self.mem_read(addr)?;
        self.registers.set(dr, value);
        self.registers.update_flags(dr);
        Ok(())
    }

    fn op_ldi(&mut self, instr: Instruction) -> Result<()> {
        let dr = instr.dr();
        let indirect = self.registers.pc().wrapping_add(instr.pc_offset9());
        let addr = self.mem_read(indirect)?;
        let value = self.mem_read(addr)?;
        self.registers.set(dr, value);
        self.registers.update_flags(dr);
        Ok(())
    }

    fn op_ldr(&mut self, instr: Instruction) -> Result<()> {
        let dr = instr.dr();
        let addr = self
            .registers
            .get(instr.base_r())
            .wrapping_add(instr.offset6());
        let value = self.mem_read(addr)?;
        self.registers.set(dr, value);
        self.registers.update_flags(dr);
        Ok(())
    }

    fn op_lea(&mut self, instr: Instruction) -> Result<()> {
        let dr = instr.dr();
        let addr = self.registers.pc().wrapping_add(instr.pc_offset9());
        self.registers.set(dr, addr);
        self.registers.update_flags(dr);
        Ok(())
    }

    fn op_st(&mut self, instr: Instruction) -> Result<()> {
        let addr = self.registers.pc().wrapping_add(instr.pc_offset9());
        self.mem_write(addr, self.registers.get(instr.sr()));
        Ok(())
    }

    fn op_sti(&mut self, instr: Instruction) -> Result<()> {
        let indirect = self.registers.pc().wrapping_add(instr.pc_offset9());
        let addr = self.mem_read(indirect)?;
        self.mem_write(addr, self.registers.get(instr.sr()));
        Ok(())
    }

    fn op_str(&mut self, instr: Instruction) -> Result<()> {
        let addr = self
            .registers
            .get(instr.base_r())
            .wrapping_add(instr.offset6());
        self.mem_write(addr, self.registers.get(instr.sr()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ScriptedConsole;
    use crate::state::CondFlag;

    fn fresh_vm() -> Vm<ScriptedConsole> {
        Vm::new(ScriptedConsole::new())
    }

    fn vm_with_input(input: &[u8]) -> Vm<ScriptedConsole> {
        Vm::new(ScriptedConsole::with_input(input))
    }

    #[test]
    fn add_register_sets_sum_and_flags() {
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0x1042);
        vm.registers.set(Register::R1, 1);
        vm.registers.set(Register::R2, 2);
        vm.step().expect("step");
        assert_eq!(vm.registers.get(Register::R0), 3);
        assert_eq!(vm.registers.cond(), CondFlag::Positive);
        assert_eq!(vm.registers.pc(), 0x3001);
    }

    #[test]
    fn add_immediate_sign_extends() {
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0x1062);
        vm.registers.set(Register::R1, 1);
        vm.step().expect("step");
        assert_eq!(vm.registers.get(Register::R0), 3);
        assert_eq!(vm.registers.cond(), CondFlag::Positive);

        // ADD R0, R0, #-1 twice: through zero into negative.
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0x103F);
        vm.registers.set(Register::R0, 1);
        vm.step().expect("step");
        assert_eq!(vm.registers.get(Register::R0), 0);
        assert_eq!(vm.registers.cond(), CondFlag::Zero);

        vm.registers.set_pc(0x3000);
        vm.step().expect("step");
        assert_eq!(vm.registers.get(Register::R0), 0xFFFF);
        assert_eq!(vm.registers.cond(), CondFlag::Negative);
    }

    #[test]
    fn add_wraps_silently() {
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0x1042);
        vm.registers.set(Register::R1, 0xFFFF);
        vm.registers.set(Register::R2, 2);
        vm.step().expect("step");
        assert_eq!(vm.registers.get(Register::R0), 1);
        assert_eq!(vm.registers.cond(), CondFlag::Positive);
    }

    #[test]
    fn and_register_and_immediate() {
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0x5042);
        vm.registers.set(Register::R1, 0xFF);
        vm.registers.set(Register::R2, 0xF0);
        vm.step().expect("step");
        assert_eq!(vm.registers.get(Register::R0), 0xF0);
        assert_eq!(vm.registers.cond(), CondFlag::Positive);

        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0x506F);
        vm.registers.set(Register::R1, 0xFF);
        vm.step().expect("step");
        assert_eq!(vm.registers.get(Register::R0), 0x0F);
        assert_eq!(vm.registers.cond(), CondFlag::Positive);
    }

    #[test]
    fn not_complements_and_updates_flags() {
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0x907F);
        vm.registers.set(Register::R1, 0x000F);
        vm.step().expect("step");
        assert_eq!(vm.registers.get(Register::R0), 0xFFF0);
        assert_eq!(vm.registers.cond(), CondFlag::Negative);
    }

    #[test]
    fn br_respects_condition_mask() {
        // BRz #5 taken when COND is zero.
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0x0405);
        vm.registers.set_cond(CondFlag::Zero);
        vm.step().expect("step");
        assert_eq!(vm.registers.pc(), 0x3006);

        // Same instruction, COND positive: falls through.
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0x0405);
        vm.registers.set_cond(CondFlag::Positive);
        vm.step().expect("step");
        assert_eq!(vm.registers.pc(), 0x3001);
    }

    #[test]
    fn br_with_empty_mask_is_a_noop() {
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0x0005);
        vm.step().expect("step");
        assert_eq!(vm.registers.pc(), 0x3001);
    }

    #[test]
    fn br_negative_offset_loops_back() {
        // BRp #-2 from 0x3001 lands on 0x3000.
        let mut vm = fresh_vm();
        vm.memory.write(0x3001, 0x03FE);
        vm.registers.set_pc(0x3001);
        vm.registers.set_cond(CondFlag::Positive);
        vm.step().expect("step");
        assert_eq!(vm.registers.pc(), 0x3000);
    }

    #[test]
    fn jmp_and_ret_load_pc_from_base() {
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0xC0C0); // JMP R3
        vm.registers.set(Register::R3, 0x4242);
        vm.step().expect("step");
        assert_eq!(vm.registers.pc(), 0x4242);

        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0xC1C0); // RET
        vm.registers.set(Register::R7, 0x5000);
        vm.step().expect("step");
        assert_eq!(vm.registers.pc(), 0x5000);
    }

    #[test]
    fn jsr_links_r7_and_offsets_pc() {
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0x4804); // JSR #4
        vm.step().expect("step");
        assert_eq!(vm.registers.get(Register::R7), 0x3001);
        assert_eq!(vm.registers.pc(), 0x3005);
    }

    #[test]
    fn jsrr_links_r7_and_jumps_to_base() {
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0x40C0); // JSRR R3
        vm.registers.set(Register::R3, 0x6000);
        vm.step().expect("step");
        assert_eq!(vm.registers.get(Register::R7), 0x3001);
        assert_eq!(vm.registers.pc(), 0x6000);
    }

    #[test]
    fn ld_is_pc_relative() {
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0x2002); // LD R0, #2
        vm.memory.write(0x3003, 0x1234);
        vm.step().expect("step");
        assert_eq!(vm.registers.get(Register::R0), 0x1234);
        assert_eq!(vm.registers.cond(), CondFlag::Positive);
    }

    #[test]
    fn ldi_chases_the_pointer() {
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0xA001); // LDI R0, #1
        vm.memory.write(0x3002, 0x4000);
        vm.memory.write(0x4000, 0x1234);
        vm.step().expect("step");
        assert_eq!(vm.registers.get(Register::R0), 0x1234);
        assert_eq!(vm.registers.cond(), CondFlag::Positive);
    }

    #[test]
    fn ldr_applies_signed_offset6() {
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0x6042); // LDR R0, R1, #2
        vm.registers.set(Register::R1, 0x4000);
        vm.memory.write(0x4002, 0xBEEF);
        vm.step().expect("step");
        assert_eq!(vm.registers.get(Register::R0), 0xBEEF);
        assert_eq!(vm.registers.cond(), CondFlag::Negative);

        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0x607F); // LDR R0, R1, #-1
        vm.registers.set(Register::R1, 0x4000);
        vm.memory.write(0x3FFF, 0x0001);
        vm.step().expect("step");
        assert_eq!(vm.registers.get(Register::R0), 0x0001);
    }

    #[test]
    fn lea_loads_the_address_itself() {
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0xE005); // LEA R0, #5
        vm.step().expect("step");
        assert_eq!(vm.registers.get(Register::R0), 0x3006);
        assert_eq!(vm.registers.cond(), CondFlag::Positive);
    }

    #[test]
    fn stores_do_not_touch_flags() {
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0x3002); // ST R0, #2
        vm.registers.set(Register::R0, 0x8001);
        vm.registers.set_cond(CondFlag::Positive);
        vm.step().expect("step");
        assert_eq!(vm.memory.read(0x3003), 0x8001);
        assert_eq!(vm.registers.cond(), CondFlag::Positive);
    }

    #[test]
    fn sti_stores_through_the_pointer() {
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0xB001); // STI R0, #1
        vm.memory.write(0x3002, 0x4000);
        vm.registers.set(Register::R0, 0xCAFE);
        vm.step().expect("step");
        assert_eq!(vm.memory.read(0x4000), 0xCAFE);
    }

    #[test]
    fn str_uses_base_plus_offset() {
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0x7042); // STR R0, R1, #2
        vm.registers.set(Register::R0, 0xFACE);
        vm.registers.set(Register::R1, 0x4000);
        vm.step().expect("step");
        assert_eq!(vm.memory.read(0x4002), 0xFACE);
    }

    #[test]
    fn reserved_opcodes_abort() {
        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0x8000); // RTI
        let err = vm.step().expect_err("RTI aborts");
        assert!(matches!(
            err,
            CoreError::IllegalOpcode {
                opcode: Opcode::Rti,
                pc: 0x3000
            }
        ));

        let mut vm = fresh_vm();
        vm.memory.write(0x3000, 0xD000); // RES
        let err = vm.step().expect_err("RES aborts");
        assert!(matches!(
            err,
            CoreError::IllegalOpcode {
                opcode: Opcode::Res,
                ..
            }
        ));
    }

    #[test]
    fn pc_overflow_is_fatal_before_fetch() {
        let mut vm = fresh_vm();
        vm.registers.set_pc(0xFFFF);
        let err = vm.step().expect_err("overflow detected");
        assert!(matches!(err, CoreError::PcOverflow));
    }

    #[test]
    fn kbsr_read_latches_pending_byte() {
        // LDI R0 through a pointer to the status register.
        let mut vm = vm_with_input(b"Z");
        vm.memory.write(0x3000, 0xA001);
        vm.memory.write(0x3002, KBSR);
        vm.step().expect("step");
        assert_eq!(vm.registers.get(Register::R0), KBSR_READY);
        assert_eq!(vm.registers.cond(), CondFlag::Negative);
        assert_eq!(vm.memory.read(KBDR), u16::from(b'Z'));
    }

    #[test]
    fn kbsr_read_clears_when_idle() {
        let mut vm = fresh_vm();
        vm.memory.write(KBSR, 0x8000);
        vm.memory.write(0x3000, 0xA001);
        vm.memory.write(0x3002, KBSR);
        vm.step().expect("step");
        assert_eq!(vm.registers.get(Register::R0), 0);
        assert_eq!(vm.registers.cond(), CondFlag::Zero);
    }

    #[test]
    fn kbdr_read_is_stable_between_status_reads() {
        let mut vm = vm_with_input(b"AB");
        assert_eq!(vm.mem_read(KBSR).expect("gate"), KBSR_READY);
        assert_eq!(vm.mem_read(KBDR).expect("gate"), u16::from(b'A'));
        assert_eq!(vm.mem_read(KBDR).expect("gate"), u16::from(b'A'));
        assert_eq!(vm.mem_read(KBSR).expect("gate"), KBSR_READY);
        assert_eq!(vm.mem_read(KBDR).expect("gate"), u16::from(b'B'));
    }

    #[test]
    fn run_steps_respects_the_budget() {
        let mut vm = fresh_vm();
        // ADD R0, R0, #1 followed by BRnzp #-2: an infinite counter loop.
        vm.memory.write(0x3000, 0x1021);
        vm.memory.write(0x3001, 0x0FFE);
        vm.run_steps(10).expect("bounded run");
        assert!(vm.is_running());
        assert_eq!(vm.executed(), 10);
        assert_eq!(vm.registers.get(Register::R0), 5);
    }
}
