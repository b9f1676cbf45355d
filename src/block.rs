// block.rs - Basic-block assembler
//
// Decodes linearly from a start PC until the first control-flow
// instruction or the end of the text range.

use crate::disasm::{self, Instruction};
use crate::elf::TextSection;
use crate::error::TranslateError;

/// Assemble the basic block starting at `pc`.
///
/// Returns the decoded instructions up to and including the terminator,
/// or up to the end of the text range if no terminator is reached.
/// Fails with `OutOfBounds` if `pc` lies outside the text range and with
/// `BadEncoding` if any word decodes as invalid.
pub fn assemble(text: &TextSection, pc: u64) -> Result<Vec<Instruction>, TranslateError> {
    let start = text.virtual_address;
    let end = start + text.data.len() as u64;
    if pc < start || pc >= end {
        return Err(TranslateError::OutOfBounds);
    }

    let mut instructions = Vec::new();
    let mut offset = (pc - start) as usize;

    while let Some(raw) = disasm::read_word(&text.data, offset) {
        let address = start + offset as u64;
        let inst = disasm::decode(raw, address);
        if !inst.is_valid() {
            return Err(TranslateError::BadEncoding);
        }

        let terminates = inst.opcode.is_terminator();
        instructions.push(inst);
        offset += 4;

        if terminates {
            break;
        }
    }

    Ok(instructions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::Opcode;

    fn text_at(vaddr: u64, words: &[u32]) -> TextSection {
        let mut data = Vec::new();
        for w in words {
            data.extend_from_slice(&w.to_le_bytes());
        }
        TextSection {
            virtual_address: vaddr,
            data,
        }
    }

    #[test]
    fn block_ends_at_terminator() {
        // ADDI x1, x0, 1; ADD x2, x1, x1; JAL x0, 8; ADDI x3, x0, 2
        let text = text_at(
            0x1000,
            &[0x0010_0093, 0x0010_8133, 0x0080_006F, 0x0020_0193],
        );
        let block = assemble(&text, 0x1000).unwrap();
        assert_eq!(block.len(), 3);
        assert_eq!(block[2].opcode, Opcode::JAL);
        assert_eq!(block[0].address, 0x1000);
        assert_eq!(block[2].address, 0x1008);
    }

    #[test]
    fn block_runs_to_end_of_text() {
        // Two plain ADDIs, no terminator
        let text = text_at(0x1000, &[0x0010_0093, 0x0020_0113]);
        let block = assemble(&text, 0x1000).unwrap();
        assert_eq!(block.len(), 2);
        assert_eq!(block[1].opcode, Opcode::ADDI);
    }

    #[test]
    fn start_pc_outside_text_fails() {
        let text = text_at(0x1000, &[0x0010_0093]);
        assert_eq!(
            assemble(&text, 0x2000).unwrap_err(),
            TranslateError::OutOfBounds
        );
        assert_eq!(
            assemble(&text, 0x0FFC).unwrap_err(),
            TranslateError::OutOfBounds
        );
        // One past the last valid byte
        assert_eq!(
            assemble(&text, 0x1004).unwrap_err(),
            TranslateError::OutOfBounds
        );
    }

    #[test]
    fn invalid_word_fails() {
        let text = text_at(0x1000, &[0x0010_0093, 0x0000_0000]);
        assert_eq!(
            assemble(&text, 0x1000).unwrap_err(),
            TranslateError::BadEncoding
        );
    }

    #[test]
    fn block_can_start_mid_text() {
        let text = text_at(
            0x1000,
            &[0x0010_0093, 0x0010_8133, 0x0080_006F],
        );
        let block = assemble(&text, 0x1004).unwrap();
        assert_eq!(block.len(), 2);
        assert_eq!(block[0].address, 0x1004);
    }
}
