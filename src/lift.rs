// lift.rs - RV64I to SSA IR lifter
//
// Lifts one decoded basic block at a time. Guest registers map to the
// value id that currently holds them; registers read before any write in
// the block materialize as zero constants standing in for unknown live-in
// state. All state is rebuilt from scratch for every block.

use crate::disasm::{Instruction, Opcode};
use crate::error::TranslateError;
use crate::ir::{BinOp, Block, Inst, InstKind, Terminator, Type, ValueId};

struct Lifter {
    insts: Vec<Inst>,
    next_value: ValueId,
    reg_values: [Option<ValueId>; 32],
}

/// Lift a decoded instruction sequence into an IR basic block.
///
/// The sequence is everything the block assembler returned: zero or more
/// straight-line instructions optionally followed by one terminator. If no
/// terminator is present the block falls through to the next address.
pub fn lift(instructions: &[Instruction]) -> Result<Block, TranslateError> {
    let mut lifter = Lifter {
        insts: Vec::new(),
        next_value: 1,
        reg_values: [None; 32],
    };

    for (i, inst) in instructions.iter().enumerate() {
        if inst.opcode.is_terminator() {
            let fall_through = match instructions.get(i + 1) {
                Some(next) => next.address,
                None => inst.address + 4,
            };
            let terminator = lifter.lift_terminator(inst, fall_through)?;
            return Ok(Block {
                insts: lifter.insts,
                terminator,
            });
        }
        lifter.lift_instruction(inst)?;
    }

    // No terminator: fall through to the instruction after the block.
    let next = match instructions.last() {
        Some(last) => last.address + 4,
        None => 0,
    };
    Ok(Block {
        insts: lifter.insts,
        terminator: Terminator::Branch { target: next },
    })
}

impl Lifter {
    fn lift_instruction(&mut self, inst: &Instruction) -> Result<(), TranslateError> {
        match inst.opcode {
            // Register-register arithmetic and logic
            Opcode::ADD => self.binary_reg(inst, BinOp::Add),
            Opcode::SUB => self.binary_reg(inst, BinOp::Sub),
            Opcode::AND => self.binary_reg(inst, BinOp::And),
            Opcode::OR => self.binary_reg(inst, BinOp::Or),
            Opcode::XOR => self.binary_reg(inst, BinOp::Xor),
            Opcode::SLL => self.binary_reg(inst, BinOp::Shl),
            Opcode::SRL => self.binary_reg(inst, BinOp::Shr),
            Opcode::SRA => self.binary_reg(inst, BinOp::Sar),
            Opcode::SLT => self.binary_reg(inst, BinOp::Lt),
            Opcode::SLTU => self.binary_reg(inst, BinOp::LtU),

            // Immediate arithmetic and logic
            Opcode::ADDI => self.binary_imm(inst, BinOp::Add, inst.imm(2)),
            Opcode::ANDI => self.binary_imm(inst, BinOp::And, inst.imm(2)),
            Opcode::ORI => self.binary_imm(inst, BinOp::Or, inst.imm(2)),
            Opcode::XORI => self.binary_imm(inst, BinOp::Xor, inst.imm(2)),
            Opcode::SLTI => self.binary_imm(inst, BinOp::Lt, inst.imm(2)),
            Opcode::SLTIU => self.binary_imm(inst, BinOp::LtU, inst.imm(2)),
            // The I-type field carries funct7 bits; only the shift amount
            // is an operand.
            Opcode::SLLI => self.binary_imm(inst, BinOp::Shl, inst.imm(2) & 0x3F),
            Opcode::SRLI => self.binary_imm(inst, BinOp::Shr, inst.imm(2) & 0x3F),
            Opcode::SRAI => self.binary_imm(inst, BinOp::Sar, inst.imm(2) & 0x3F),

            // 32-bit forms: truncate, operate, sign-extend back
            Opcode::ADDW => self.binary_reg_w(inst, BinOp::Add),
            Opcode::SUBW => self.binary_reg_w(inst, BinOp::Sub),
            Opcode::SLLW => self.binary_reg_w(inst, BinOp::Shl),
            Opcode::SRLW => self.binary_reg_w(inst, BinOp::Shr),
            Opcode::SRAW => self.binary_reg_w(inst, BinOp::Sar),
            Opcode::ADDIW => self.binary_imm_w(inst, BinOp::Add, inst.imm(2)),
            Opcode::SLLIW => self.binary_imm_w(inst, BinOp::Shl, inst.imm(2) & 0x1F),
            Opcode::SRLIW => self.binary_imm_w(inst, BinOp::Shr, inst.imm(2) & 0x1F),
            Opcode::SRAIW => self.binary_imm_w(inst, BinOp::Sar, inst.imm(2) & 0x1F),

            // Loads
            Opcode::LB => self.load(inst, Type::I8, true),
            Opcode::LH => self.load(inst, Type::I16, true),
            Opcode::LW => self.load(inst, Type::I32, true),
            Opcode::LBU => self.load(inst, Type::I8, false),
            Opcode::LHU => self.load(inst, Type::I16, false),
            Opcode::LWU => self.load(inst, Type::I32, false),
            Opcode::LD => {
                let addr = self.effective_address(inst);
                let value = self.emit(InstKind::Load {
                    ty: Type::I64,
                    addr,
                });
                self.set_register(inst.reg(0), value);
            }

            // Stores
            Opcode::SB => self.store(inst, Some(Type::I8)),
            Opcode::SH => self.store(inst, Some(Type::I16)),
            Opcode::SW => self.store(inst, Some(Type::I32)),
            Opcode::SD => self.store(inst, None),

            // Upper immediates
            Opcode::LUI => {
                let value = self.constant(Type::I64, inst.imm(1) as u64);
                self.set_register(inst.reg(0), value);
            }
            Opcode::AUIPC => {
                let pc = self.constant(Type::I64, inst.address);
                let imm = self.constant(Type::I64, inst.imm(1) as u64);
                let value = self.binary(BinOp::Add, Type::I64, pc, imm);
                self.set_register(inst.reg(0), value);
            }

            // ECALL, EBREAK, and anything else the decoder recognizes but
            // the lifter cannot lower.
            _ => return Err(TranslateError::UnsupportedInstr),
        }
        Ok(())
    }

    fn lift_terminator(
        &mut self,
        inst: &Instruction,
        fall_through: u64,
    ) -> Result<Terminator, TranslateError> {
        match inst.opcode {
            Opcode::BEQ => Ok(self.cond_branch(inst, BinOp::Eq, fall_through)),
            Opcode::BNE => Ok(self.cond_branch(inst, BinOp::Ne, fall_through)),
            Opcode::BLT => Ok(self.cond_branch(inst, BinOp::Lt, fall_through)),
            Opcode::BGE => Ok(self.cond_branch(inst, BinOp::Ge, fall_through)),
            Opcode::BLTU => Ok(self.cond_branch(inst, BinOp::LtU, fall_through)),
            Opcode::BGEU => Ok(self.cond_branch(inst, BinOp::GeU, fall_through)),

            Opcode::JAL => {
                // rd = pc + 4, then jump to pc + imm
                let return_addr = self.constant(Type::I64, inst.address + 4);
                self.set_register(inst.reg(0), return_addr);
                let target = inst.address.wrapping_add_signed(inst.imm(1));
                Ok(Terminator::Branch { target })
            }
            Opcode::JALR => {
                // rd = pc + 4. The indirect target surfaces as a block
                // boundary: the block returns to the driver with a zero
                // next-PC.
                let return_addr = self.constant(Type::I64, inst.address + 4);
                self.set_register(inst.reg(0), return_addr);
                let zero = self.constant(Type::I64, 0);
                Ok(Terminator::Ret { value: Some(zero) })
            }

            _ => Err(TranslateError::UnsupportedInstr),
        }
    }

    fn cond_branch(&mut self, inst: &Instruction, op: BinOp, fall_through: u64) -> Terminator {
        let rs1 = self.register_value(inst.reg(0));
        let rs2 = self.register_value(inst.reg(1));
        let cond = self.binary(op, Type::I1, rs1, rs2);
        let target = inst.address.wrapping_add_signed(inst.imm(2));
        Terminator::CondBranch {
            cond,
            if_true: target,
            if_false: fall_through,
        }
    }

    fn binary_reg(&mut self, inst: &Instruction, op: BinOp) {
        let rs1 = self.register_value(inst.reg(1));
        let rs2 = self.register_value(inst.reg(2));
        let value = self.binary(op, Type::I64, rs1, rs2);
        self.set_register(inst.reg(0), value);
    }

    fn binary_imm(&mut self, inst: &Instruction, op: BinOp, imm: i64) {
        let rs1 = self.register_value(inst.reg(1));
        let rhs = self.constant(Type::I64, imm as u64);
        let value = self.binary(op, Type::I64, rs1, rhs);
        self.set_register(inst.reg(0), value);
    }

    fn binary_reg_w(&mut self, inst: &Instruction, op: BinOp) {
        let rs1 = self.register_value(inst.reg(1));
        let rs2 = self.register_value(inst.reg(2));
        let lhs = self.emit(InstKind::Trunc {
            to: Type::I32,
            value: rs1,
        });
        let rhs = self.emit(InstKind::Trunc {
            to: Type::I32,
            value: rs2,
        });
        let narrow = self.binary(op, Type::I32, lhs, rhs);
        let value = self.emit(InstKind::Sext {
            to: Type::I64,
            value: narrow,
        });
        self.set_register(inst.reg(0), value);
    }

    fn binary_imm_w(&mut self, inst: &Instruction, op: BinOp, imm: i64) {
        let rs1 = self.register_value(inst.reg(1));
        let rhs = self.constant(Type::I32, imm as u64);
        let lhs = self.emit(InstKind::Trunc {
            to: Type::I32,
            value: rs1,
        });
        let narrow = self.binary(op, Type::I32, lhs, rhs);
        let value = self.emit(InstKind::Sext {
            to: Type::I64,
            value: narrow,
        });
        self.set_register(inst.reg(0), value);
    }

    fn load(&mut self, inst: &Instruction, ty: Type, signed: bool) {
        let addr = self.effective_address(inst);
        let narrow = self.emit(InstKind::Load { ty, addr });
        let value = if signed {
            self.emit(InstKind::Sext {
                to: Type::I64,
                value: narrow,
            })
        } else {
            self.emit(InstKind::Zext {
                to: Type::I64,
                value: narrow,
            })
        };
        self.set_register(inst.reg(0), value);
    }

    /// Store rs2 to rs1 + imm, truncating to `narrow` when given.
    fn store(&mut self, inst: &Instruction, narrow: Option<Type>) {
        let base = self.register_value(inst.reg(0));
        let value = self.register_value(inst.reg(1));
        let offset = self.constant(Type::I64, inst.imm(2) as u64);
        let addr = self.binary(BinOp::Add, Type::I64, base, offset);
        let value = match narrow {
            Some(to) => self.emit(InstKind::Trunc { to, value }),
            None => value,
        };
        self.emit(InstKind::Store { value, addr });
    }

    /// rs1 + sign-extended immediate, for loads.
    fn effective_address(&mut self, inst: &Instruction) -> ValueId {
        let base = self.register_value(inst.reg(1));
        let offset = self.constant(Type::I64, inst.imm(2) as u64);
        self.binary(BinOp::Add, Type::I64, base, offset)
    }

    /// Current value of a guest register, materializing a zero constant on
    /// first read. x0 binds to a zero constant once per block.
    fn register_value(&mut self, reg: u32) -> ValueId {
        if let Some(id) = self.reg_values[reg as usize] {
            return id;
        }
        let id = self.constant(Type::I64, 0);
        self.reg_values[reg as usize] = Some(id);
        id
    }

    fn set_register(&mut self, reg: u32, value: ValueId) {
        // x0 is hardwired to zero.
        if reg != 0 {
            self.reg_values[reg as usize] = Some(value);
        }
    }

    fn constant(&mut self, ty: Type, value: u64) -> ValueId {
        self.emit(InstKind::Const { ty, value })
    }

    fn binary(&mut self, op: BinOp, ty: Type, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.emit(InstKind::Binary { op, ty, lhs, rhs })
    }

    fn emit(&mut self, kind: InstKind) -> ValueId {
        let id = self.next_value;
        self.next_value += 1;
        self.insts.push(Inst { id, kind });
        id
    }
}
