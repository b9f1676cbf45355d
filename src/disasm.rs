// disasm.rs - RV64I instruction decoder
//
// Decodes 32-bit RV64I words into structured instruction records for
// lifting. Unrecognized encodings produce `Opcode::INVALID`.

/// RV64I base-set opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    // Register-register arithmetic
    ADD,
    SUB,
    SLL,
    SLT,
    SLTU,
    XOR,
    SRL,
    SRA,
    OR,
    AND,

    // 32-bit register-register arithmetic
    ADDW,
    SUBW,
    SLLW,
    SRLW,
    SRAW,

    // Immediate arithmetic
    ADDI,
    SLTI,
    SLTIU,
    XORI,
    ORI,
    ANDI,
    SLLI,
    SRLI,
    SRAI,

    // 32-bit immediate arithmetic
    ADDIW,
    SLLIW,
    SRLIW,
    SRAIW,

    // Loads
    LB,
    LH,
    LW,
    LD,
    LBU,
    LHU,
    LWU,

    // Stores
    SB,
    SH,
    SW,
    SD,

    // Conditional branches
    BEQ,
    BNE,
    BLT,
    BGE,
    BLTU,
    BGEU,

    // Jumps
    JAL,
    JALR,

    // Upper immediates
    LUI,
    AUIPC,

    // System (decoded, not lifted)
    ECALL,
    EBREAK,

    // Unrecognized encoding
    INVALID,
}

impl Opcode {
    /// Does this instruction end a basic block?
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::BEQ
                | Opcode::BNE
                | Opcode::BLT
                | Opcode::BGE
                | Opcode::BLTU
                | Opcode::BGEU
                | Opcode::JAL
                | Opcode::JALR
        )
    }
}

/// A single instruction operand: a register index or a sign-extended
/// immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(u32),
    Imm(i64),
}

/// A decoded RV64I instruction.
///
/// Operands follow the canonical order for the instruction's format:
/// R-type `rd, rs1, rs2`; I-type and loads `rd, rs1, imm`; stores
/// `rs1, rs2, imm`; branches `rs1, rs2, imm`; U-type `rd, imm`; J-type
/// `rd, imm`; ECALL/EBREAK carry none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    /// Raw 32-bit little-endian word.
    pub raw: u32,
    /// Guest PC of this instruction.
    pub address: u64,
}

impl Instruction {
    pub fn is_valid(&self) -> bool {
        self.opcode != Opcode::INVALID
    }

    /// Register operand at `index`, or 0 if absent.
    pub fn reg(&self, index: usize) -> u32 {
        match self.operands.get(index) {
            Some(Operand::Reg(r)) => *r,
            _ => 0,
        }
    }

    /// Immediate operand at `index`, or 0 if absent.
    pub fn imm(&self, index: usize) -> i64 {
        match self.operands.get(index) {
            Some(Operand::Imm(v)) => *v,
            _ => 0,
        }
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}: {:?}", self.address, self.opcode)?;
        for (i, operand) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            match operand {
                Operand::Reg(r) => write!(f, "{}x{}", sep, r)?,
                Operand::Imm(v) => write!(f, "{}{}", sep, v)?,
            }
        }
        Ok(())
    }
}

/// Read the 32-bit little-endian word at `offset`, if in bounds.
pub fn read_word(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Decode one 32-bit word at guest PC `address`.
pub fn decode(raw: u32, address: u64) -> Instruction {
    let opcode_bits = raw & 0x7F;
    let rd = (raw >> 7) & 0x1F;
    let funct3 = (raw >> 12) & 0x7;
    let rs1 = (raw >> 15) & 0x1F;
    let rs2 = (raw >> 20) & 0x1F;
    let funct7 = (raw >> 25) & 0x7F;

    let (opcode, operands) = match opcode_bits {
        0x33 => {
            // OP
            let op = match (funct3, funct7) {
                (0x0, 0x00) => Opcode::ADD,
                (0x0, 0x20) => Opcode::SUB,
                (0x1, 0x00) => Opcode::SLL,
                (0x2, 0x00) => Opcode::SLT,
                (0x3, 0x00) => Opcode::SLTU,
                (0x4, 0x00) => Opcode::XOR,
                (0x5, 0x00) => Opcode::SRL,
                (0x5, 0x20) => Opcode::SRA,
                (0x6, 0x00) => Opcode::OR,
                (0x7, 0x00) => Opcode::AND,
                _ => Opcode::INVALID,
            };
            (op, r_type_operands(rd, rs1, rs2))
        }
        0x3B => {
            // OP-32
            let op = match (funct3, funct7) {
                (0x0, 0x00) => Opcode::ADDW,
                (0x0, 0x20) => Opcode::SUBW,
                (0x1, 0x00) => Opcode::SLLW,
                (0x5, 0x00) => Opcode::SRLW,
                (0x5, 0x20) => Opcode::SRAW,
                _ => Opcode::INVALID,
            };
            (op, r_type_operands(rd, rs1, rs2))
        }
        0x13 => {
            // OP-IMM
            let op = match funct3 {
                0x0 => Opcode::ADDI,
                0x1 => Opcode::SLLI,
                0x2 => Opcode::SLTI,
                0x3 => Opcode::SLTIU,
                0x4 => Opcode::XORI,
                0x5 => {
                    if funct7 == 0x20 {
                        Opcode::SRAI
                    } else {
                        Opcode::SRLI
                    }
                }
                0x6 => Opcode::ORI,
                0x7 => Opcode::ANDI,
                _ => Opcode::INVALID,
            };
            (op, i_type_operands(rd, rs1, i_type_imm(raw)))
        }
        0x1B => {
            // OP-IMM-32
            let op = match funct3 {
                0x0 => Opcode::ADDIW,
                0x1 => Opcode::SLLIW,
                0x5 => {
                    if funct7 == 0x20 {
                        Opcode::SRAIW
                    } else {
                        Opcode::SRLIW
                    }
                }
                _ => Opcode::INVALID,
            };
            (op, i_type_operands(rd, rs1, i_type_imm(raw)))
        }
        0x03 => {
            // LOAD
            let op = match funct3 {
                0x0 => Opcode::LB,
                0x1 => Opcode::LH,
                0x2 => Opcode::LW,
                0x3 => Opcode::LD,
                0x4 => Opcode::LBU,
                0x5 => Opcode::LHU,
                0x6 => Opcode::LWU,
                _ => Opcode::INVALID,
            };
            (op, i_type_operands(rd, rs1, i_type_imm(raw)))
        }
        0x23 => {
            // STORE
            let op = match funct3 {
                0x0 => Opcode::SB,
                0x1 => Opcode::SH,
                0x2 => Opcode::SW,
                0x3 => Opcode::SD,
                _ => Opcode::INVALID,
            };
            let ops = vec![
                Operand::Reg(rs1),
                Operand::Reg(rs2),
                Operand::Imm(s_type_imm(raw)),
            ];
            (op, ops)
        }
        0x63 => {
            // BRANCH
            let op = match funct3 {
                0x0 => Opcode::BEQ,
                0x1 => Opcode::BNE,
                0x4 => Opcode::BLT,
                0x5 => Opcode::BGE,
                0x6 => Opcode::BLTU,
                0x7 => Opcode::BGEU,
                _ => Opcode::INVALID,
            };
            let ops = vec![
                Operand::Reg(rs1),
                Operand::Reg(rs2),
                Operand::Imm(b_type_imm(raw)),
            ];
            (op, ops)
        }
        0x67 => {
            // JALR
            if funct3 == 0x0 {
                (Opcode::JALR, i_type_operands(rd, rs1, i_type_imm(raw)))
            } else {
                (Opcode::INVALID, Vec::new())
            }
        }
        0x6F => {
            // JAL
            let ops = vec![Operand::Reg(rd), Operand::Imm(j_type_imm(raw))];
            (Opcode::JAL, ops)
        }
        0x37 => {
            // LUI
            let ops = vec![Operand::Reg(rd), Operand::Imm(u_type_imm(raw))];
            (Opcode::LUI, ops)
        }
        0x17 => {
            // AUIPC
            let ops = vec![Operand::Reg(rd), Operand::Imm(u_type_imm(raw))];
            (Opcode::AUIPC, ops)
        }
        0x73 => {
            // SYSTEM: only ECALL and EBREAK are recognized. The funct12
            // field distinguishes them; rs2 is part of it.
            if funct3 == 0x0 && rd == 0x0 && rs1 == 0x0 {
                match (raw >> 20) & 0xFFF {
                    0x0 => (Opcode::ECALL, Vec::new()),
                    0x1 => (Opcode::EBREAK, Vec::new()),
                    _ => (Opcode::INVALID, Vec::new()),
                }
            } else {
                (Opcode::INVALID, Vec::new())
            }
        }
        _ => (Opcode::INVALID, Vec::new()),
    };

    Instruction {
        opcode,
        operands,
        raw,
        address,
    }
}

fn r_type_operands(rd: u32, rs1: u32, rs2: u32) -> Vec<Operand> {
    vec![Operand::Reg(rd), Operand::Reg(rs1), Operand::Reg(rs2)]
}

fn i_type_operands(rd: u32, rs1: u32, imm: i64) -> Vec<Operand> {
    vec![Operand::Reg(rd), Operand::Reg(rs1), Operand::Imm(imm)]
}

/// Sign-extend the low `bits` of `value`.
fn sign_extend(value: u32, bits: u32) -> i64 {
    let sign_bit = 1u32 << (bits - 1);
    if value & sign_bit != 0 {
        (value | (!0u32 << bits)) as i32 as i64
    } else {
        value as i64
    }
}

fn i_type_imm(raw: u32) -> i64 {
    sign_extend((raw >> 20) & 0xFFF, 12)
}

fn s_type_imm(raw: u32) -> i64 {
    let imm = (((raw >> 25) & 0x7F) << 5) | ((raw >> 7) & 0x1F);
    sign_extend(imm, 12)
}

fn b_type_imm(raw: u32) -> i64 {
    let imm = (((raw >> 31) & 0x1) << 12)
        | (((raw >> 7) & 0x1) << 11)
        | (((raw >> 25) & 0x3F) << 5)
        | (((raw >> 8) & 0xF) << 1);
    sign_extend(imm, 13)
}

/// Upper-20 immediate, already positioned at bits 31:12.
fn u_type_imm(raw: u32) -> i64 {
    (raw & 0xFFFF_F000) as i32 as i64
}

fn j_type_imm(raw: u32) -> i64 {
    let imm = (((raw >> 31) & 0x1) << 20)
        | (((raw >> 12) & 0xFF) << 12)
        | (((raw >> 20) & 0x1) << 11)
        | (((raw >> 21) & 0x3FF) << 1);
    sign_extend(imm, 21)
}
