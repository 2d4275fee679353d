use std::fmt;

/// Architectural registers of the LC-3: eight general-purpose registers
/// and the program counter. Condition codes live beside them as a typed
/// flag (see [`CondFlag`]) rather than a raw word.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Register {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    Pc,
}

impl Register {
    /// Build a register from a 3-bit operand field. The field is masked to
    /// 3 bits first, so every encodable value names a register.
    pub fn from_bits(bits: u16) -> Self {
        match bits & 0x7 {
            0 => Register::R0,
            1 => Register::R1,
            2 => Register::R2,
            3 => Register::R3,
            4 => Register::R4,
            5 => Register::R5,
            6 => Register::R6,
            _ => Register::R7,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::R0 => write!(f, "R0"),
            Register::R1 => write!(f, "R1"),
            Register::R2 => write!(f, "R2"),
            Register::R3 => write!(f, "R3"),
            Register::R4 => write!(f, "R4"),
            Register::R5 => write!(f, "R5"),
            Register::R6 => write!(f, "R6"),
            Register::R7 => write!(f, "R7"),
            Register::Pc => write!(f, "PC"),
        }
    }
}

/// Condition codes. Exactly one is in effect at any time; every
/// flag-updating instruction replaces the previous one.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CondFlag {
    Positive,
    Zero,
    Negative,
}

impl CondFlag {
    /// Bit pattern tested by the BR condition mask.
    pub fn bits(self) -> u16 {
        match self {
            CondFlag::Positive => 1 << 0,
            CondFlag::Zero => 1 << 1,
            CondFlag::Negative => 1 << 2,
        }
    }

    /// Classify a register value: negative iff bit 15 is set, zero iff the
    /// value is zero, positive otherwise.
    pub fn of(value: u16) -> Self {
        if value == 0 {
            CondFlag::Zero
        } else if value >> 15 == 1 {
            CondFlag::Negative
        } else {
            CondFlag::Positive
        }
    }
}

/// Mutable LC-3 register file.
#[derive(Clone, Debug)]
pub struct Registers {
    gp: [u16; 8],
    pc: u16,
    cond: CondFlag,
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            gp: [0; 8],
            pc: 0,
            cond: CondFlag::Zero,
        }
    }
}

impl Registers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reg: Register) -> u16 {
        match reg {
            Register::Pc => self.pc,
            gp => self.gp[gp_index(gp)],
        }
    }

    pub fn set(&mut self, reg: Register, value: u16) {
        match reg {
            Register::Pc => self.pc = value,
            gp => self.gp[gp_index(gp)] = value,
        }
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn set_pc(&mut self, value: u16) {
        self.pc = value;
    }

    pub fn cond(&self) -> CondFlag {
        self.cond
    }

    pub fn set_cond(&mut self, flag: CondFlag) {
        self.cond = flag;
    }

    /// Refresh the condition codes from the value currently held in `reg`.
    pub fn update_flags(&mut self, reg: Register) {
        self.cond = CondFlag::of(self.get(reg));
    }
}

fn gp_index(reg: Register) -> usize {
    match reg {
        Register::R0 => 0,
        Register::R1 => 1,
        Register::R2 => 2,
        Register::R3 => 3,
        Register::R4 => 4,
        Register::R5 => 5,
        Register::R6 => 6,
        Register::R7 => 7,
        Register::Pc => unreachable!("PC is not a general-purpose register"),
    }
}
