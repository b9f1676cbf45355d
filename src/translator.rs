// translator.rs - Translate-then-execute driver
//
// Owns the guest state, the loaded binary, and the execution engine, and
// runs the PC-dispatched loop: assemble a block at the current PC, lift it
// to IR, lower it, encode it, run it, repeat with the PC the block
// returned. Every stage failure aborts the loop, tagged with the guest PC
// it occurred at.

use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, trace};

use crate::block;
use crate::elf::LoadedElf;
use crate::encode;
use crate::engine::ExecutionEngine;
use crate::error::TranslateError;
use crate::guest::GuestState;
use crate::lift;

/// Upper bound on executed blocks per run; a runaway guest aborts rather
/// than spinning forever.
pub const BLOCK_LIMIT: usize = 100_000;

pub struct Translator {
    elf: LoadedElf,
    engine: ExecutionEngine,
    state: GuestState,
}

impl Translator {
    /// Load a RISC-V executable and set up fresh guest state.
    pub fn load(path: &Path) -> Result<Translator> {
        let elf = LoadedElf::load(path)
            .map_err(|e| TranslateError::BadElf(format!("{:#}", e)))?;
        debug!(
            "loaded ELF: entry={:#x} text={:#x}+{:#x}",
            elf.entry,
            elf.text.virtual_address,
            elf.text.data.len()
        );

        let mut state = GuestState::new();
        state.init_stack_pointer();

        Ok(Translator {
            elf,
            engine: ExecutionEngine::new(),
            state,
        })
    }

    /// Execute from the ELF entry point (or `main` if the entry is unset).
    /// Returns the value of guest register a0 at termination.
    pub fn run(&mut self) -> Result<u64> {
        let mut entry = self.elf.entry;
        if entry == 0 {
            if let Some(main) = self.elf.function_address("main") {
                entry = main;
            }
        }
        self.run_from(entry)
    }

    /// Execute starting at a named function symbol. Returns `None` when
    /// the symbol is not present.
    pub fn run_function(&mut self, name: &str) -> Result<Option<u64>> {
        match self.elf.function_address(name) {
            Some(addr) => self.run_from(addr).map(Some),
            None => Ok(None),
        }
    }

    /// The driver loop proper.
    pub fn run_from(&mut self, entry: u64) -> Result<u64> {
        let text_start = self.elf.text.virtual_address;
        let text_end = text_start + self.elf.text.data.len() as u64;

        self.state.pc = entry;
        let mut executed = 0usize;

        while self.state.pc >= text_start && self.state.pc < text_end {
            if executed >= BLOCK_LIMIT {
                return Err(TranslateError::IterationLimit)
                    .with_context(|| format!("at pc {:#x}", self.state.pc));
            }
            executed += 1;

            let pc = self.state.pc;
            let code = self
                .translate_block(pc)
                .with_context(|| format!("at pc {:#x}", pc))?;

            let next_pc = unsafe { self.engine.execute(&code, &mut self.state) }
                .with_context(|| format!("at pc {:#x}", pc))?;
            debug!("block {:#x} -> next pc {:#x}", pc, next_pc);

            if next_pc == 0 {
                break;
            }
            self.state.pc = next_pc;
        }

        Ok(self.state.read_register(10))
    }

    /// Run one block through the whole pipeline, producing machine code.
    pub fn translate_block(&self, pc: u64) -> std::result::Result<Vec<u8>, TranslateError> {
        let instructions = block::assemble(&self.elf.text, pc)?;
        debug!("block at {:#x}: {} instructions", pc, instructions.len());
        for inst in &instructions {
            trace!("  {}", inst);
        }

        let ir_block = lift::lift(&instructions)?;
        trace!("lifted block:\n{}", ir_block);

        let insts = crate::lower_block(&ir_block)?;
        encode::encode_sequence(&insts).ok_or(TranslateError::EncodingRange)
    }

    pub fn guest_state(&self) -> &GuestState {
        &self.state
    }

    pub fn guest_state_mut(&mut self) -> &mut GuestState {
        &mut self.state
    }
}
