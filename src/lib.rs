// rv2a64 - RISC-V RV64I to AArch64 dynamic binary translator
//
// Executes RV64I ELF binaries by translating them to AArch64 machine code
// one basic block at a time, at execution time.
//
// # Architecture
//
// Translation is a strictly layered pipeline; each stage consumes the
// previous stage's output:
//
// 1. **ELF loading** (`elf.rs`): validate the binary, extract `.text` and
//    symbols
// 2. **Decoding** (`disasm.rs`): raw 32-bit words to typed RV64I records
// 3. **Block assembly** (`block.rs`): linear decode until a terminator
// 4. **Lifting** (`lift.rs`): one block to typed SSA IR (`ir.rs`)
// 5. **Selection** (`select.rs`): IR to AArch64 over virtual registers
//    (`arm64.rs`)
// 6. **Liveness** (`liveness.rs`): def/use scan to sorted live intervals
// 7. **Allocation** (`regalloc.rs`): linear scan, virtual to physical
// 8. **Encoding** (`encode.rs`): bit-exact 32-bit words, little-endian
// 9. **Execution** (`engine.rs`): W^X mapping lifecycle and the call
//
// The driver (`translator.rs`) runs the loop: translate the block at the
// current PC, execute it, continue at the PC the block returns. Guest
// registers, PC, and shadow memory live in `guest.rs` and persist across
// blocks.
//
// # Calling convention for generated code
//
// A translated block is an `extern "C"` function taking the guest-state
// pointer in x0 and returning the next guest PC in x0. A returned PC of
// zero ends the run.

pub mod arm64;
pub mod block;
pub mod disasm;
pub mod elf;
pub mod encode;
pub mod engine;
pub mod error;
pub mod guest;
pub mod ir;
pub mod lift;
pub mod liveness;
pub mod regalloc;
pub mod select;
pub mod translator;

pub use error::TranslateError;
pub use translator::Translator;

/// Lower a lifted IR block to encodable AArch64: selection, liveness,
/// linear-scan allocation.
pub fn lower_block(block: &ir::Block) -> Result<Vec<arm64::Inst>, TranslateError> {
    let mut insts = select::select(block);
    let intervals = liveness::live_intervals(&insts);
    regalloc::allocate(&mut insts, &intervals)?;
    Ok(insts)
}

/// Translate a decoded instruction sequence all the way to machine code.
pub fn translate_instructions(
    instructions: &[disasm::Instruction],
) -> Result<Vec<u8>, TranslateError> {
    let ir_block = lift::lift(instructions)?;
    let insts = lower_block(&ir_block)?;
    encode::encode_sequence(&insts).ok_or(TranslateError::EncodingRange)
}
