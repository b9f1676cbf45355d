// arm64.rs - AArch64 instruction model
//
// The typed form the instruction selector emits and the encoder consumes.
// Operands are physical registers, block-local virtual registers, or
// immediates; register allocation replaces every virtual register before
// encoding.

use std::fmt;

/// AArch64 general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Reg {
    X0 = 0,
    X1,
    X2,
    X3,
    X4,
    X5,
    X6,
    X7,
    X8,
    X9,
    X10,
    X11,
    X12,
    X13,
    X14,
    X15,
    X16,
    X17,
    X18,
    X19,
    X20,
    X21,
    X22,
    X23,
    X24,
    X25,
    X26,
    X27,
    X28,
    /// Frame pointer (x29); reserved.
    Fp,
    /// Link register (x30); reserved.
    Lr,
    /// Stack pointer; encodes as 31, which also names XZR in most
    /// data-processing contexts.
    Sp,
}

impl Reg {
    /// The zero register shares encoding 31 with SP.
    pub const XZR: Reg = Reg::Sp;

    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Operand data sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSize {
    B,
    H,
    W,
    X,
}

impl DataSize {
    /// log2 of the access size in bytes, as used by load/store encodings.
    pub fn log2_bytes(self) -> u32 {
        match self {
            DataSize::B => 0,
            DataSize::H => 1,
            DataSize::W => 2,
            DataSize::X => 3,
        }
    }

    /// The sf bit selecting 64-bit operation.
    pub fn sf(self) -> u32 {
        if self == DataSize::X {
            1
        } else {
            0
        }
    }
}

/// Virtual register tag assigned by the instruction selector.
pub type VirtualReg = u32;

/// An instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Phys(Reg),
    Virt(VirtualReg),
    Imm(u64),
}

impl Operand {
    pub fn virtual_reg(&self) -> Option<VirtualReg> {
        match self {
            Operand::Virt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_imm(&self) -> bool {
        matches!(self, Operand::Imm(_))
    }
}

/// Opcodes the encoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    // Three-operand arithmetic and logic
    Add,
    Sub,
    Mul,
    Sdiv,
    Udiv,
    And,
    Orr,
    Eor,
    Lsl,
    Lsr,
    Asr,
    Cmp,

    // Two-operand
    Mov,
    Sxtb,
    Sxth,
    Sxtw,
    Uxtb,
    Uxth,
    Ret,

    // Memory
    Ldr,
    Str,

    // Branches
    B,
    BEq,
    BNe,
    BLt,
    BLe,
    BGt,
    BGe,
}

impl Opcode {
    /// AArch64 condition code for a conditional-branch opcode.
    pub fn cond_code(self) -> Option<u32> {
        match self {
            Opcode::BEq => Some(0b0000),
            Opcode::BNe => Some(0b0001),
            Opcode::BLt => Some(0b1011),
            Opcode::BLe => Some(0b1101),
            Opcode::BGt => Some(0b1100),
            Opcode::BGe => Some(0b1010),
            _ => None,
        }
    }
}

/// A typed AArch64 instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inst {
    Three {
        op: Opcode,
        size: DataSize,
        dest: Operand,
        src1: Operand,
        src2: Operand,
    },
    Two {
        op: Opcode,
        size: DataSize,
        dest: Operand,
        src: Operand,
    },
    Mem {
        op: Opcode,
        size: DataSize,
        reg: Operand,
        base: Operand,
        offset: i32,
    },
    Branch {
        op: Opcode,
        target: u64,
    },
}

impl Inst {
    /// Does any operand still hold a virtual register?
    pub fn has_virtual_reg(&self) -> bool {
        match self {
            Inst::Three {
                dest, src1, src2, ..
            } => {
                dest.virtual_reg().is_some()
                    || src1.virtual_reg().is_some()
                    || src2.virtual_reg().is_some()
            }
            Inst::Two { dest, src, .. } => {
                dest.virtual_reg().is_some() || src.virtual_reg().is_some()
            }
            Inst::Mem { reg, base, .. } => {
                reg.virtual_reg().is_some() || base.virtual_reg().is_some()
            }
            Inst::Branch { .. } => false,
        }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Inst::Three { op, .. }
            | Inst::Two { op, .. }
            | Inst::Mem { op, .. }
            | Inst::Branch { op, .. } => *op,
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::Fp => f.write_str("x29"),
            Reg::Lr => f.write_str("x30"),
            Reg::Sp => f.write_str("sp"),
            other => write!(f, "x{}", other.code()),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Phys(r) => write!(f, "{}", r),
            Operand::Virt(v) => write!(f, "%{}", v),
            Operand::Imm(k) => write!(f, "#{:#x}", k),
        }
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::Three {
                op,
                size,
                dest,
                src1,
                src2,
            } => write!(f, "{:?}.{:?} {}, {}, {}", op, size, dest, src1, src2),
            Inst::Two { op, size, dest, src } => {
                write!(f, "{:?}.{:?} {}, {}", op, size, dest, src)
            }
            Inst::Mem {
                op,
                size,
                reg,
                base,
                offset,
            } => write!(f, "{:?}.{:?} {}, [{}, #{}]", op, size, reg, base, offset),
            Inst::Branch { op, target } => write!(f, "{:?} {:#x}", op, target),
        }
    }
}
