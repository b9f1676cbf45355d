// encode.rs - AArch64 machine-code encoder
//
// Produces the four little-endian bytes of each 32-bit instruction word,
// or an empty sequence when an operand cannot be represented (immediate
// out of range, unencodable offset). Register allocation must have
// replaced every virtual register before encoding; a leftover virtual
// operand encodes as failure.
//
// Branch targets are interpreted as signed byte displacements from the
// instruction; the caller is responsible for having resolved them.

use crate::arm64::{DataSize, Inst, Opcode, Operand};

/// Encode one instruction. Returns 4 bytes, or empty on failure.
pub fn encode(inst: &Inst) -> Vec<u8> {
    match encode_word(inst) {
        Some(word) => word.to_le_bytes().to_vec(),
        None => Vec::new(),
    }
}

/// Encode a whole instruction sequence, concatenating the per-instruction
/// words. Returns `None` if any instruction fails to encode.
pub fn encode_sequence(insts: &[Inst]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(insts.len() * 4);
    for inst in insts {
        let bytes = encode(inst);
        if bytes.is_empty() {
            return None;
        }
        out.extend_from_slice(&bytes);
    }
    Some(out)
}

fn encode_word(inst: &Inst) -> Option<u32> {
    match inst {
        Inst::Three {
            op,
            size,
            dest,
            src1,
            src2,
        } => encode_three(*op, *size, dest, src1, src2),
        Inst::Two { op, size, dest, src } => encode_two(*op, *size, dest, src),
        Inst::Mem {
            op,
            size,
            reg,
            base,
            offset,
        } => encode_mem(*op, *size, reg, base, *offset),
        Inst::Branch { op, target } => encode_branch(*op, *target),
    }
}

fn encode_three(
    op: Opcode,
    size: DataSize,
    dest: &Operand,
    src1: &Operand,
    src2: &Operand,
) -> Option<u32> {
    let sf = size.sf();
    let rd = reg_code(dest)?;
    let rn = reg_code(src1)?;

    match op {
        Opcode::Add => {
            if let Operand::Imm(imm) = src2 {
                let imm12 = unsigned_imm(*imm, 12)?;
                Some((sf << 31) | 0x1100_0000 | (imm12 << 10) | (rn << 5) | rd)
            } else {
                let rm = reg_code(src2)?;
                Some((sf << 31) | 0x0B00_0000 | (rm << 16) | (rn << 5) | rd)
            }
        }
        Opcode::Sub => {
            if let Operand::Imm(imm) = src2 {
                let imm12 = unsigned_imm(*imm, 12)?;
                Some((sf << 31) | 0x5100_0000 | (imm12 << 10) | (rn << 5) | rd)
            } else {
                let rm = reg_code(src2)?;
                Some((sf << 31) | 0x4B00_0000 | (rm << 16) | (rn << 5) | rd)
            }
        }
        Opcode::Cmp => {
            // SUBS with the zero register as destination.
            if let Operand::Imm(imm) = src2 {
                let imm12 = unsigned_imm(*imm, 12)?;
                Some((sf << 31) | 0x7100_0000 | (imm12 << 10) | (rn << 5) | 31)
            } else {
                let rm = reg_code(src2)?;
                Some((sf << 31) | 0x6B00_0000 | (rm << 16) | (rn << 5) | 31)
            }
        }
        // The remaining forms are register-only; the selector must
        // materialize immediates first.
        Opcode::And => {
            let rm = reg_code_non_imm(src2)?;
            Some((sf << 31) | 0x0A00_0000 | (rm << 16) | (rn << 5) | rd)
        }
        Opcode::Orr => {
            let rm = reg_code_non_imm(src2)?;
            Some((sf << 31) | 0x2A00_0000 | (rm << 16) | (rn << 5) | rd)
        }
        Opcode::Eor => {
            let rm = reg_code_non_imm(src2)?;
            Some((sf << 31) | 0x4A00_0000 | (rm << 16) | (rn << 5) | rd)
        }
        Opcode::Mul => {
            // MADD with XZR as addend.
            let rm = reg_code_non_imm(src2)?;
            Some((sf << 31) | 0x1B00_7C00 | (rm << 16) | (rn << 5) | rd)
        }
        Opcode::Sdiv => {
            let rm = reg_code_non_imm(src2)?;
            Some((sf << 31) | 0x1AC0_0C00 | (rm << 16) | (rn << 5) | rd)
        }
        Opcode::Udiv => {
            let rm = reg_code_non_imm(src2)?;
            Some((sf << 31) | 0x1AC0_0800 | (rm << 16) | (rn << 5) | rd)
        }
        Opcode::Lsl => {
            let rm = reg_code_non_imm(src2)?;
            Some((sf << 31) | 0x1AC0_2000 | (rm << 16) | (rn << 5) | rd)
        }
        Opcode::Lsr => {
            let rm = reg_code_non_imm(src2)?;
            Some((sf << 31) | 0x1AC0_2400 | (rm << 16) | (rn << 5) | rd)
        }
        Opcode::Asr => {
            let rm = reg_code_non_imm(src2)?;
            Some((sf << 31) | 0x1AC0_2800 | (rm << 16) | (rn << 5) | rd)
        }
        _ => None,
    }
}

fn encode_two(op: Opcode, size: DataSize, dest: &Operand, src: &Operand) -> Option<u32> {
    let sf = size.sf();
    let rd = reg_code(dest)?;

    match op {
        Opcode::Mov => {
            if let Operand::Imm(imm) = src {
                // MOVZ covers a single 16-bit window; anything wider is a
                // failure at this layer.
                if *imm > 0xFFFF {
                    return None;
                }
                Some((sf << 31) | 0x5280_0000 | ((*imm as u32) << 5) | rd)
            } else {
                // ORR Rd, XZR, Rm
                let rm = reg_code(src)?;
                Some((sf << 31) | 0x2A00_0000 | (rm << 16) | (0x1F << 5) | rd)
            }
        }
        // SBFM/UBFM with fixed immr/imms fields.
        Opcode::Sxtb => {
            let rn = reg_code_non_imm(src)?;
            let base = if sf == 1 { 0x9340_1C00 } else { 0x1300_1C00 };
            Some(base | (rn << 5) | rd)
        }
        Opcode::Sxth => {
            let rn = reg_code_non_imm(src)?;
            let base = if sf == 1 { 0x9340_3C00 } else { 0x1300_3C00 };
            Some(base | (rn << 5) | rd)
        }
        Opcode::Sxtw => {
            let rn = reg_code_non_imm(src)?;
            Some(0x9340_7C00 | (rn << 5) | rd)
        }
        Opcode::Uxtb => {
            let rn = reg_code_non_imm(src)?;
            Some(0x5300_1C00 | (rn << 5) | rd)
        }
        Opcode::Uxth => {
            let rn = reg_code_non_imm(src)?;
            Some(0x5300_3C00 | (rn << 5) | rd)
        }
        Opcode::Ret => {
            // An immediate source marks a return through the link
            // register; a register source is an indirect BR.
            if src.is_imm() {
                Some(0xD65F_03C0)
            } else {
                let rn = reg_code(src)?;
                Some(0xD61F_0000 | (rn << 5))
            }
        }
        _ => None,
    }
}

fn encode_mem(
    op: Opcode,
    size: DataSize,
    reg: &Operand,
    base: &Operand,
    offset: i32,
) -> Option<u32> {
    let rt = reg_code(reg)?;
    let rn = reg_code(base)?;
    let sz = size.log2_bytes();

    let (scaled_base, unscaled_base) = match op {
        Opcode::Ldr => (0x3940_0000u32, 0x3840_0000u32),
        Opcode::Str => (0x3900_0000u32, 0x3800_0000u32),
        _ => return None,
    };

    if offset >= 0 && (offset % (1 << sz)) == 0 {
        let scaled = (offset as u32) >> sz;
        if scaled <= 0xFFF {
            return Some((sz << 30) | scaled_base | (scaled << 10) | (rn << 5) | rt);
        }
    }
    if (-256..=255).contains(&offset) {
        let imm9 = (offset as u32) & 0x1FF;
        return Some((sz << 30) | unscaled_base | (imm9 << 12) | (rn << 5) | rt);
    }
    None
}

fn encode_branch(op: Opcode, target: u64) -> Option<u32> {
    let offset = target as i64;

    match op {
        Opcode::B => {
            if !(-0x0200_0000..=0x01FF_FFFF).contains(&offset) {
                return None;
            }
            let imm26 = ((offset >> 2) as u32) & 0x03FF_FFFF;
            Some(0x1400_0000 | imm26)
        }
        Opcode::BEq | Opcode::BNe | Opcode::BLt | Opcode::BLe | Opcode::BGt | Opcode::BGe => {
            if !(-0x0010_0000..=0x000F_FFFF).contains(&offset) {
                return None;
            }
            let imm19 = ((offset >> 2) as u32) & 0x0007_FFFF;
            let cond = op.cond_code()?;
            Some(0x5400_0000 | (imm19 << 5) | cond)
        }
        _ => None,
    }
}

fn reg_code(operand: &Operand) -> Option<u32> {
    match operand {
        Operand::Phys(r) => Some(r.code()),
        // Immediates in register positions are handled by each opcode;
        // reaching here with one means the caller took the register path.
        Operand::Imm(_) => Some(0),
        // Virtual registers must not survive to encoding.
        Operand::Virt(_) => None,
    }
}

fn reg_code_non_imm(operand: &Operand) -> Option<u32> {
    if operand.is_imm() {
        return None;
    }
    reg_code(operand)
}

fn unsigned_imm(value: u64, bits: u32) -> Option<u32> {
    if value < (1u64 << bits) {
        Some(value as u32)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm64::Reg;

    fn word(inst: &Inst) -> u32 {
        let bytes = encode(inst);
        assert_eq!(bytes.len(), 4, "encoding failed for {:?}", inst);
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn three(op: Opcode, dest: Reg, src1: Reg, src2: Operand) -> Inst {
        Inst::Three {
            op,
            size: DataSize::X,
            dest: Operand::Phys(dest),
            src1: Operand::Phys(src1),
            src2,
        }
    }

    #[test]
    fn add_register() {
        let inst = three(Opcode::Add, Reg::X0, Reg::X1, Operand::Phys(Reg::X2));
        assert_eq!(word(&inst), 0x8B02_0020);
    }

    #[test]
    fn add_immediate() {
        let inst = three(Opcode::Add, Reg::X0, Reg::X1, Operand::Imm(42));
        assert_eq!(word(&inst), 0x9100_A820);

        // Immediate too large for 12 bits
        let inst = three(Opcode::Add, Reg::X0, Reg::X1, Operand::Imm(0x1000));
        assert!(encode(&inst).is_empty());
    }

    #[test]
    fn sub_register_and_immediate() {
        let inst = three(Opcode::Sub, Reg::X3, Reg::X4, Operand::Phys(Reg::X5));
        assert_eq!(word(&inst), 0xCB05_0083);

        let inst = three(Opcode::Sub, Reg::X0, Reg::X0, Operand::Imm(1));
        assert_eq!(word(&inst), 0xD100_0400);
    }

    #[test]
    fn logic_registers() {
        assert_eq!(
            word(&three(Opcode::And, Reg::X0, Reg::X1, Operand::Phys(Reg::X2))),
            0x8A02_0020
        );
        assert_eq!(
            word(&three(Opcode::Orr, Reg::X0, Reg::X1, Operand::Phys(Reg::X2))),
            0xAA02_0020
        );
        assert_eq!(
            word(&three(Opcode::Eor, Reg::X0, Reg::X1, Operand::Phys(Reg::X2))),
            0xCA02_0020
        );
        // Logical immediates are not supported at this layer
        assert!(encode(&three(Opcode::And, Reg::X0, Reg::X1, Operand::Imm(1))).is_empty());
    }

    #[test]
    fn mul_is_madd_with_xzr() {
        let inst = three(Opcode::Mul, Reg::X0, Reg::X1, Operand::Phys(Reg::X2));
        assert_eq!(word(&inst), 0x9B02_7C20);
    }

    #[test]
    fn divisions() {
        assert_eq!(
            word(&three(Opcode::Sdiv, Reg::X0, Reg::X1, Operand::Phys(Reg::X2))),
            0x9AC2_0C20
        );
        assert_eq!(
            word(&three(Opcode::Udiv, Reg::X0, Reg::X1, Operand::Phys(Reg::X2))),
            0x9AC2_0820
        );
    }

    #[test]
    fn register_shifts() {
        assert_eq!(
            word(&three(Opcode::Lsl, Reg::X0, Reg::X1, Operand::Phys(Reg::X2))),
            0x9AC2_2020
        );
        assert_eq!(
            word(&three(Opcode::Lsr, Reg::X0, Reg::X1, Operand::Phys(Reg::X2))),
            0x9AC2_2420
        );
        assert_eq!(
            word(&three(Opcode::Asr, Reg::X0, Reg::X1, Operand::Phys(Reg::X2))),
            0x9AC2_2820
        );
    }

    #[test]
    fn cmp_forms() {
        // CMP X1, #0 = SUBS XZR, X1, #0
        let inst = three(Opcode::Cmp, Reg::XZR, Reg::X1, Operand::Imm(0));
        assert_eq!(word(&inst), 0xF100_003F);

        // CMP X1, X2
        let inst = three(Opcode::Cmp, Reg::XZR, Reg::X1, Operand::Phys(Reg::X2));
        assert_eq!(word(&inst), 0xEB02_003F);
    }

    #[test]
    fn mov_immediate_window() {
        let inst = Inst::Two {
            op: Opcode::Mov,
            size: DataSize::X,
            dest: Operand::Phys(Reg::X0),
            src: Operand::Imm(42),
        };
        assert_eq!(word(&inst), 0xD280_0540);

        let wide = Inst::Two {
            op: Opcode::Mov,
            size: DataSize::X,
            dest: Operand::Phys(Reg::X0),
            src: Operand::Imm(0x1_0000),
        };
        assert!(encode(&wide).is_empty());
    }

    #[test]
    fn mov_register_is_orr() {
        let inst = Inst::Two {
            op: Opcode::Mov,
            size: DataSize::X,
            dest: Operand::Phys(Reg::X0),
            src: Operand::Phys(Reg::X1),
        };
        assert_eq!(word(&inst), 0xAA01_03E0);
    }

    #[test]
    fn extensions() {
        let two = |op, dest, src| Inst::Two {
            op,
            size: DataSize::X,
            dest: Operand::Phys(dest),
            src: Operand::Phys(src),
        };
        assert_eq!(word(&two(Opcode::Sxtb, Reg::X0, Reg::X1)), 0x9340_1C20);
        assert_eq!(word(&two(Opcode::Sxth, Reg::X0, Reg::X1)), 0x9340_3C20);
        assert_eq!(word(&two(Opcode::Sxtw, Reg::X0, Reg::X1)), 0x9340_7C20);
        assert_eq!(word(&two(Opcode::Uxtb, Reg::X0, Reg::X1)), 0x5300_1C20);
        assert_eq!(word(&two(Opcode::Uxth, Reg::X0, Reg::X1)), 0x5300_3C20);
    }

    #[test]
    fn ret_and_br() {
        let ret = Inst::Two {
            op: Opcode::Ret,
            size: DataSize::X,
            dest: Operand::Phys(Reg::Lr),
            src: Operand::Imm(0),
        };
        assert_eq!(word(&ret), 0xD65F_03C0);

        let br = Inst::Two {
            op: Opcode::Ret,
            size: DataSize::X,
            dest: Operand::Phys(Reg::Lr),
            src: Operand::Phys(Reg::X5),
        };
        assert_eq!(word(&br), 0xD61F_00A0);
    }

    #[test]
    fn ldr_unsigned_scaled() {
        let inst = Inst::Mem {
            op: Opcode::Ldr,
            size: DataSize::X,
            reg: Operand::Phys(Reg::X0),
            base: Operand::Phys(Reg::X1),
            offset: 8,
        };
        assert_eq!(word(&inst), 0xF940_0420);
    }

    #[test]
    fn str_sizes() {
        let str_at = |size, offset| Inst::Mem {
            op: Opcode::Str,
            size,
            reg: Operand::Phys(Reg::X0),
            base: Operand::Phys(Reg::X1),
            offset,
        };
        assert_eq!(word(&str_at(DataSize::X, 0)), 0xF900_0020);
        assert_eq!(word(&str_at(DataSize::W, 0)), 0xB900_0020);
        assert_eq!(word(&str_at(DataSize::H, 0)), 0x7900_0020);
        assert_eq!(word(&str_at(DataSize::B, 0)), 0x3900_0020);
    }

    #[test]
    fn memory_unscaled_fallback() {
        // Negative offset takes the signed-9 unscaled form
        let inst = Inst::Mem {
            op: Opcode::Ldr,
            size: DataSize::X,
            reg: Operand::Phys(Reg::X0),
            base: Operand::Phys(Reg::X1),
            offset: -8,
        };
        assert_eq!(word(&inst), 0xF85F_8020);

        // Misaligned positive offset within signed-9 range
        let inst = Inst::Mem {
            op: Opcode::Ldr,
            size: DataSize::X,
            reg: Operand::Phys(Reg::X0),
            base: Operand::Phys(Reg::X1),
            offset: 9,
        };
        assert_eq!(word(&inst), 0xF840_9020);

        // Out of both forms' range
        let inst = Inst::Mem {
            op: Opcode::Ldr,
            size: DataSize::X,
            reg: Operand::Phys(Reg::X0),
            base: Operand::Phys(Reg::X1),
            offset: -512,
        };
        assert!(encode(&inst).is_empty());
    }

    #[test]
    fn scaled_offset_limit() {
        // 0xFFF * 8 is the largest scaled offset for X-size
        let inst = Inst::Mem {
            op: Opcode::Ldr,
            size: DataSize::X,
            reg: Operand::Phys(Reg::X0),
            base: Operand::Phys(Reg::X1),
            offset: 0xFFF * 8,
        };
        assert_eq!(encode(&inst).len(), 4);

        let inst = Inst::Mem {
            op: Opcode::Ldr,
            size: DataSize::X,
            reg: Operand::Phys(Reg::X0),
            base: Operand::Phys(Reg::X1),
            offset: 0x1000 * 8,
        };
        assert!(encode(&inst).is_empty());
    }

    #[test]
    fn branch_unconditional() {
        let inst = Inst::Branch {
            op: Opcode::B,
            target: 0x1000,
        };
        assert_eq!(word(&inst), 0x1400_0400);

        // Backwards branch
        let inst = Inst::Branch {
            op: Opcode::B,
            target: (-8i64) as u64,
        };
        assert_eq!(word(&inst), 0x17FF_FFFE);

        // Out of the 32 MiB window
        let inst = Inst::Branch {
            op: Opcode::B,
            target: 0x0200_0000,
        };
        assert!(encode(&inst).is_empty());
    }

    #[test]
    fn branch_conditional() {
        let inst = Inst::Branch {
            op: Opcode::BEq,
            target: 8,
        };
        assert_eq!(word(&inst), 0x5400_0040);

        let inst = Inst::Branch {
            op: Opcode::BNe,
            target: 8,
        };
        assert_eq!(word(&inst), 0x5400_0041);

        // Out of the 1 MiB window
        let inst = Inst::Branch {
            op: Opcode::BGe,
            target: 0x0010_0000,
        };
        assert!(encode(&inst).is_empty());
    }

    #[test]
    fn virtual_register_fails_to_encode() {
        let inst = three(Opcode::Add, Reg::X0, Reg::X1, Operand::Phys(Reg::X2));
        assert_eq!(encode(&inst).len(), 4);

        let inst = Inst::Three {
            op: Opcode::Add,
            size: DataSize::X,
            dest: Operand::Virt(0),
            src1: Operand::Phys(Reg::X1),
            src2: Operand::Phys(Reg::X2),
        };
        assert!(encode(&inst).is_empty());
    }

    #[test]
    fn w_sized_forms_clear_sf() {
        let inst = Inst::Three {
            op: Opcode::Add,
            size: DataSize::W,
            dest: Operand::Phys(Reg::X0),
            src1: Operand::Phys(Reg::X1),
            src2: Operand::Phys(Reg::X2),
        };
        assert_eq!(word(&inst), 0x0B02_0020);

        let inst = Inst::Two {
            op: Opcode::Mov,
            size: DataSize::W,
            dest: Operand::Phys(Reg::X0),
            src: Operand::Phys(Reg::X1),
        };
        assert_eq!(word(&inst), 0x2A01_03E0);
    }

    #[test]
    fn sequence_concatenates_words() {
        let insts = vec![
            three(Opcode::Add, Reg::X0, Reg::X1, Operand::Phys(Reg::X2)),
            Inst::Two {
                op: Opcode::Ret,
                size: DataSize::X,
                dest: Operand::Phys(Reg::Lr),
                src: Operand::Imm(0),
            },
        ];
        let bytes = encode_sequence(&insts).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[0..4], &0x8B02_0020u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &0xD65F_03C0u32.to_le_bytes());

        let bad = vec![three(Opcode::Add, Reg::X0, Reg::X1, Operand::Imm(0x10000))];
        assert!(encode_sequence(&bad).is_none());
    }
}
