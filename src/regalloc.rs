// regalloc.rs - Linear-scan register allocation
//
// One forward pass over start-sorted live intervals. Expired intervals
// return their register to the pool; the lowest-indexed free register is
// taken next. There is no spilling: exhausting the pool is an error.

use std::collections::HashMap;

use crate::arm64::{Inst, Operand, Reg, VirtualReg};
use crate::error::TranslateError;
use crate::liveness::LiveInterval;

/// Allocatable registers. X29 (frame pointer), X30 (link register), and
/// SP are reserved.
const POOL: [Reg; 29] = [
    Reg::X0,
    Reg::X1,
    Reg::X2,
    Reg::X3,
    Reg::X4,
    Reg::X5,
    Reg::X6,
    Reg::X7,
    Reg::X8,
    Reg::X9,
    Reg::X10,
    Reg::X11,
    Reg::X12,
    Reg::X13,
    Reg::X14,
    Reg::X15,
    Reg::X16,
    Reg::X17,
    Reg::X18,
    Reg::X19,
    Reg::X20,
    Reg::X21,
    Reg::X22,
    Reg::X23,
    Reg::X24,
    Reg::X25,
    Reg::X26,
    Reg::X27,
    Reg::X28,
];

/// Assign physical registers to every virtual register and rewrite the
/// instruction sequence in place.
pub fn allocate(insts: &mut [Inst], intervals: &[LiveInterval]) -> Result<(), TranslateError> {
    let mut sorted: Vec<LiveInterval> = intervals.to_vec();
    sorted.sort_by_key(|iv| (iv.start, iv.vreg));

    let mut assignment: HashMap<VirtualReg, Reg> = HashMap::new();
    let mut active: Vec<(LiveInterval, Reg)> = Vec::new();

    for interval in sorted {
        // Expire intervals that ended before this one starts.
        active.retain(|(iv, _)| iv.end >= interval.start);

        let reg = POOL
            .iter()
            .find(|r| active.iter().all(|(_, used)| used != *r))
            .copied()
            .ok_or(TranslateError::OutOfRegisters)?;

        assignment.insert(interval.vreg, reg);
        active.push((interval, reg));
    }

    for inst in insts.iter_mut() {
        rewrite(inst, &assignment);
    }
    Ok(())
}

fn rewrite(inst: &mut Inst, assignment: &HashMap<VirtualReg, Reg>) {
    let subst = |operand: &mut Operand| {
        if let Operand::Virt(v) = operand {
            if let Some(reg) = assignment.get(v) {
                *operand = Operand::Phys(*reg);
            }
        }
    };

    match inst {
        Inst::Three {
            dest, src1, src2, ..
        } => {
            subst(dest);
            subst(src1);
            subst(src2);
        }
        Inst::Two { dest, src, .. } => {
            subst(dest);
            subst(src);
        }
        Inst::Mem { reg, base, .. } => {
            subst(reg);
            subst(base);
        }
        Inst::Branch { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm64::{DataSize, Opcode};
    use crate::liveness::live_intervals;

    fn mov_imm(vreg: VirtualReg, value: u64) -> Inst {
        Inst::Two {
            op: Opcode::Mov,
            size: DataSize::X,
            dest: Operand::Virt(vreg),
            src: Operand::Imm(value),
        }
    }

    fn add(dest: VirtualReg, a: VirtualReg, b: VirtualReg) -> Inst {
        Inst::Three {
            op: Opcode::Add,
            size: DataSize::X,
            dest: Operand::Virt(dest),
            src1: Operand::Virt(a),
            src2: Operand::Virt(b),
        }
    }

    #[test]
    fn all_virtual_registers_replaced() {
        let mut insts = vec![mov_imm(0, 1), mov_imm(1, 2), add(2, 0, 1)];
        let intervals = live_intervals(&insts);
        allocate(&mut insts, &intervals).unwrap();
        assert!(insts.iter().all(|i| !i.has_virtual_reg()));
    }

    #[test]
    fn lowest_free_register_first() {
        let mut insts = vec![mov_imm(0, 1), add(1, 0, 0)];
        let intervals = live_intervals(&insts);
        allocate(&mut insts, &intervals).unwrap();

        assert_eq!(
            insts[0],
            Inst::Two {
                op: Opcode::Mov,
                size: DataSize::X,
                dest: Operand::Phys(Reg::X0),
                src: Operand::Imm(1),
            }
        );
        match insts[1] {
            Inst::Three { dest, .. } => assert_eq!(dest, Operand::Phys(Reg::X1)),
            ref other => panic!("expected Three, got {:?}", other),
        }
    }

    #[test]
    fn expired_registers_are_reused() {
        // v0 dies at index 1; v2 defined at index 2 should reuse X0.
        let mut insts = vec![
            mov_imm(0, 1),
            add(1, 0, 0),
            mov_imm(2, 3),
            add(3, 1, 2),
        ];
        let intervals = live_intervals(&insts);
        allocate(&mut insts, &intervals).unwrap();
        match insts[2] {
            Inst::Two { dest, .. } => assert_eq!(dest, Operand::Phys(Reg::X0)),
            ref other => panic!("expected Two, got {:?}", other),
        }
    }

    #[test]
    fn no_overlapping_intervals_share_a_register() {
        // Twenty interleaved values kept alive by a chain of adds.
        let mut insts: Vec<Inst> = (0..20).map(|v| mov_imm(v, v as u64)).collect();
        for v in 0..19 {
            insts.push(add(20 + v, v, v + 1));
        }
        let intervals = live_intervals(&insts);
        allocate(&mut insts, &intervals).unwrap();

        // Each interval's start indexes the defining instruction; read the
        // assigned register from its rewritten dest operand.
        let reg_at = |index: usize| -> Reg {
            match insts[index] {
                Inst::Two {
                    dest: Operand::Phys(r),
                    ..
                }
                | Inst::Three {
                    dest: Operand::Phys(r),
                    ..
                } => r,
                ref other => panic!("no physical dest at {}: {:?}", index, other),
            }
        };
        for a in &intervals {
            for b in &intervals {
                if a.vreg != b.vreg && a.overlaps(b) {
                    assert_ne!(
                        reg_at(a.start),
                        reg_at(b.start),
                        "overlapping {:?} and {:?} share a register",
                        a,
                        b
                    );
                }
            }
        }
    }

    #[test]
    fn pool_exhaustion_fails() {
        // Define 30 values and keep them all live with a final consumer.
        let mut insts: Vec<Inst> = (0..30).map(|v| mov_imm(v, v as u64)).collect();
        for v in 0..29 {
            insts.push(add(30 + v, v, v + 1));
        }
        let intervals = live_intervals(&insts);
        assert_eq!(
            allocate(&mut insts, &intervals).unwrap_err(),
            TranslateError::OutOfRegisters
        );
    }

    #[test]
    fn physical_operands_pass_through() {
        let mut insts = vec![
            mov_imm(0, 7),
            Inst::Two {
                op: Opcode::Mov,
                size: DataSize::X,
                dest: Operand::Phys(Reg::X0),
                src: Operand::Virt(0),
            },
        ];
        let intervals = live_intervals(&insts);
        allocate(&mut insts, &intervals).unwrap();
        match insts[1] {
            Inst::Two { dest, src, .. } => {
                assert_eq!(dest, Operand::Phys(Reg::X0));
                assert!(matches!(src, Operand::Phys(_)));
            }
            ref other => panic!("expected Two, got {:?}", other),
        }
    }
}
