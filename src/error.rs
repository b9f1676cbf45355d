// error.rs - Pipeline error taxonomy
//
// Every stage of the translation pipeline reports failure through this
// closed enum. The driver attaches the guest PC when surfacing an error.

use thiserror::Error;

/// Errors signalled by the translation pipeline and execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    /// ELF loader failure, with the loader's diagnostic.
    #[error("bad ELF: {0}")]
    BadElf(String),

    /// Program counter outside the text section.
    #[error("pc outside text section")]
    OutOfBounds,

    /// The decoder produced an invalid instruction.
    #[error("invalid instruction encoding")]
    BadEncoding,

    /// The lifter refused an opcode it cannot lower.
    #[error("unsupported instruction in lifter")]
    UnsupportedInstr,

    /// The encoder could not represent an immediate or branch offset.
    #[error("immediate or branch offset out of encodable range")]
    EncodingRange,

    /// Linear scan ran out of physical registers (no spilling).
    #[error("out of physical registers")]
    OutOfRegisters,

    /// Executable memory allocation failed.
    #[error("mmap failed")]
    MmapFailed,

    /// Protection change on executable memory failed.
    #[error("mprotect failed")]
    MprotectFailed,

    /// The driver exceeded its bounded block count.
    #[error("block iteration limit exceeded")]
    IterationLimit,
}
