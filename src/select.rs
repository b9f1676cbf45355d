// select.rs - Instruction selection (IR to virtual-register AArch64)
//
// Walks a lifted block in order, assigning one virtual register per IR
// value that lands in a register. A side table records every value's IR
// type: operand sizes at use sites (notably the stored value of a Store
// and the source of an extension) are derived from the producer's type,
// which the AArch64 operand itself no longer carries.

use std::collections::HashMap;

use crate::arm64::{DataSize, Inst, Opcode, Operand, Reg, VirtualReg};
use crate::ir::{self, BinOp, Block, InstKind, Terminator, Type, ValueId};

struct Selector {
    out: Vec<Inst>,
    vregs: HashMap<ValueId, VirtualReg>,
    types: HashMap<ValueId, Type>,
    next_vreg: VirtualReg,
}

/// Lower an IR block to AArch64 instructions over virtual registers.
pub fn select(block: &Block) -> Vec<Inst> {
    let mut sel = Selector {
        out: Vec::new(),
        vregs: HashMap::new(),
        types: HashMap::new(),
        next_vreg: 0,
    };

    for inst in &block.insts {
        sel.select_inst(inst);
    }
    sel.select_terminator(&block.terminator);
    sel.out
}

impl Selector {
    fn select_inst(&mut self, inst: &ir::Inst) {
        match &inst.kind {
            InstKind::Const { ty, value } => {
                self.types.insert(inst.id, *ty);
                let dest = self.def(inst.id);
                self.out.push(Inst::Two {
                    op: Opcode::Mov,
                    size: data_size(*ty),
                    dest,
                    src: Operand::Imm(*value),
                });
            }
            InstKind::Binary { op, ty, lhs, rhs } => {
                self.types.insert(inst.id, *ty);
                let dest = self.def(inst.id);
                let src1 = self.use_of(*lhs);
                let src2 = self.use_of(*rhs);
                self.out.push(Inst::Three {
                    op: binop_opcode(*op),
                    size: data_size(*ty),
                    dest,
                    src1,
                    src2,
                });
            }
            InstKind::Load { ty, addr } => {
                self.types.insert(inst.id, *ty);
                let reg = self.def(inst.id);
                let base = self.use_of(*addr);
                self.out.push(Inst::Mem {
                    op: Opcode::Ldr,
                    size: data_size(*ty),
                    reg,
                    base,
                    offset: 0,
                });
            }
            InstKind::Store { value, addr } => {
                // The store width comes from the stored value's producer.
                let size = data_size(self.type_of(*value));
                let reg = self.use_of(*value);
                let base = self.use_of(*addr);
                self.out.push(Inst::Mem {
                    op: Opcode::Str,
                    size,
                    reg,
                    base,
                    offset: 0,
                });
            }
            InstKind::Sext { to, value } => {
                let op = match self.type_of(*value) {
                    Type::I8 => Opcode::Sxtb,
                    Type::I16 => Opcode::Sxth,
                    Type::I32 => Opcode::Sxtw,
                    _ => Opcode::Mov,
                };
                self.types.insert(inst.id, *to);
                let dest = self.def(inst.id);
                let src = self.use_of(*value);
                self.out.push(Inst::Two {
                    op,
                    size: data_size(*to),
                    dest,
                    src,
                });
            }
            InstKind::Zext { to, value } => {
                let (op, size) = match self.type_of(*value) {
                    Type::I8 => (Opcode::Uxtb, data_size(*to)),
                    Type::I16 => (Opcode::Uxth, data_size(*to)),
                    // A W-sized MOV zero-extends the upper half for free.
                    Type::I32 => (Opcode::Mov, DataSize::W),
                    _ => (Opcode::Mov, data_size(*to)),
                };
                self.types.insert(inst.id, *to);
                let dest = self.def(inst.id);
                let src = self.use_of(*value);
                self.out.push(Inst::Two { op, size, dest, src });
            }
            InstKind::Trunc { to, value } => {
                self.types.insert(inst.id, *to);
                let dest = self.def(inst.id);
                let src = self.use_of(*value);
                self.out.push(Inst::Two {
                    op: Opcode::Mov,
                    size: data_size(*to),
                    dest,
                    src,
                });
            }
        }
    }

    fn select_terminator(&mut self, term: &Terminator) {
        match term {
            Terminator::Branch { target } => {
                self.out.push(Inst::Branch {
                    op: Opcode::B,
                    target: *target,
                });
            }
            Terminator::CondBranch {
                cond,
                if_true,
                if_false,
            } => {
                // Compare the condition's producer against zero (nonzero
                // means taken), then branch.
                let src1 = self.use_of(*cond);
                self.out.push(Inst::Three {
                    op: Opcode::Cmp,
                    size: DataSize::X,
                    dest: Operand::Phys(Reg::XZR),
                    src1,
                    src2: Operand::Imm(0),
                });
                self.out.push(Inst::Branch {
                    op: Opcode::BNe,
                    target: *if_true,
                });
                self.out.push(Inst::Branch {
                    op: Opcode::B,
                    target: *if_false,
                });
            }
            Terminator::Ret { value } => {
                if let Some(v) = value {
                    let src = self.use_of(*v);
                    self.out.push(Inst::Two {
                        op: Opcode::Mov,
                        size: DataSize::X,
                        dest: Operand::Phys(Reg::X0),
                        src,
                    });
                }
                // The immediate marks a plain RET through the link
                // register rather than an indirect BR.
                self.out.push(Inst::Two {
                    op: Opcode::Ret,
                    size: DataSize::X,
                    dest: Operand::Phys(Reg::Lr),
                    src: Operand::Imm(0),
                });
            }
        }
    }

    /// Virtual register defined for `id`, assigned on first definition.
    fn def(&mut self, id: ValueId) -> Operand {
        let vreg = match self.vregs.get(&id) {
            Some(v) => *v,
            None => {
                let v = self.next_vreg;
                self.next_vreg += 1;
                self.vregs.insert(id, v);
                v
            }
        };
        Operand::Virt(vreg)
    }

    /// Virtual register holding `id` at a use site.
    fn use_of(&mut self, id: ValueId) -> Operand {
        self.def(id)
    }

    fn type_of(&self, id: ValueId) -> Type {
        self.types.get(&id).copied().unwrap_or(Type::I64)
    }
}

fn data_size(ty: Type) -> DataSize {
    match ty {
        Type::I1 | Type::I8 => DataSize::B,
        Type::I16 => DataSize::H,
        Type::I32 => DataSize::W,
        Type::I64 => DataSize::X,
    }
}

/// Map an IR binary op to its AArch64 opcode. Comparisons and the
/// remainder ops have no single-instruction form; they fall back to ADD
/// as a placeholder until a dedicated lowering exists.
fn binop_opcode(op: BinOp) -> Opcode {
    match op {
        BinOp::Add => Opcode::Add,
        BinOp::Sub => Opcode::Sub,
        BinOp::Mul => Opcode::Mul,
        BinOp::Div => Opcode::Sdiv,
        BinOp::DivU => Opcode::Udiv,
        BinOp::And => Opcode::And,
        BinOp::Or => Opcode::Orr,
        BinOp::Xor => Opcode::Eor,
        BinOp::Shl => Opcode::Lsl,
        BinOp::Shr => Opcode::Lsr,
        BinOp::Sar => Opcode::Asr,
        _ => Opcode::Add,
    }
}
