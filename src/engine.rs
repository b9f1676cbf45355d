// engine.rs - Executable memory and block invocation
//
// Owns every mapping produced for translated code. A block's bytes go
// through the W^X lifecycle: anonymous RW mapping, copy, instruction-cache
// maintenance, protection flip to RX, then the call. No mapping is ever
// writable and executable at the same time, and all mappings are released
// when the engine is dropped.

use std::ptr::NonNull;

use log::debug;

use crate::error::TranslateError;
use crate::guest::GuestState;

/// Signature of an installed block: guest state in, next guest PC out.
type BlockFn = unsafe extern "C" fn(*mut GuestState) -> u64;

struct Mapping {
    ptr: NonNull<u8>,
    size: usize,
}

/// Installs translated code and runs it against a guest state.
pub struct ExecutionEngine {
    mappings: Vec<Mapping>,
}

impl ExecutionEngine {
    pub fn new() -> Self {
        ExecutionEngine {
            mappings: Vec::new(),
        }
    }

    /// Number of live code mappings.
    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    /// Copy `code` into fresh executable memory and return its base.
    pub fn install(&mut self, code: &[u8]) -> Result<*const u8, TranslateError> {
        let page_size = page_size();
        let size = code.len().div_ceil(page_size) * page_size;

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(TranslateError::MmapFailed);
        }
        let base = match NonNull::new(ptr as *mut u8) {
            Some(p) => p,
            None => return Err(TranslateError::MmapFailed),
        };

        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), base.as_ptr(), code.len());
        }

        flush_icache(base.as_ptr(), code.len());

        // Drop write permission before the code becomes executable.
        let rc = unsafe { libc::mprotect(ptr, size, libc::PROT_READ | libc::PROT_EXEC) };
        if rc != 0 {
            unsafe {
                libc::munmap(ptr, size);
            }
            return Err(TranslateError::MprotectFailed);
        }

        self.mappings.push(Mapping { ptr: base, size });
        Ok(base.as_ptr())
    }

    /// Install `code` and invoke it with `state`. Returns the next guest
    /// PC reported by the block.
    ///
    /// # Safety
    ///
    /// `code` must be valid AArch64 machine code for the block signature:
    /// guest-state pointer in x0, next PC returned in x0.
    pub unsafe fn execute(
        &mut self,
        code: &[u8],
        state: &mut GuestState,
    ) -> Result<u64, TranslateError> {
        let base = self.install(code)?;
        debug!(
            "executing {} bytes of AArch64 code at {:p}",
            code.len(),
            base
        );
        let func: BlockFn = unsafe { std::mem::transmute(base) };
        let next_pc = unsafe { func(state as *mut GuestState) };
        Ok(next_pc)
    }
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ExecutionEngine {
    fn drop(&mut self) {
        for mapping in &self.mappings {
            unsafe {
                libc::munmap(mapping.ptr.as_ptr() as *mut libc::c_void, mapping.size);
            }
        }
    }
}

fn page_size() -> usize {
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz > 0 {
        sz as usize
    } else {
        4096
    }
}

/// Make freshly written code visible to instruction fetch: clean the data
/// cache to the point of unification, invalidate the instruction cache,
/// and order both against the upcoming execution.
#[cfg(target_arch = "aarch64")]
fn flush_icache(ptr: *const u8, len: usize) {
    // Conservative 64-byte line; CTR_EL0 could refine this.
    const LINE: usize = 64;
    let start = ptr as usize & !(LINE - 1);
    let end = ptr as usize + len;
    unsafe {
        let mut addr = start;
        while addr < end {
            core::arch::asm!("dc cvau, {0}", in(reg) addr);
            addr += LINE;
        }
        core::arch::asm!("dsb ish");
        let mut addr = start;
        while addr < end {
            core::arch::asm!("ic ivau, {0}", in(reg) addr);
            addr += LINE;
        }
        core::arch::asm!("dsb ish", "isb");
    }
}

/// On other hosts the mprotect transition provides coherence.
#[cfg(not(target_arch = "aarch64"))]
fn flush_icache(_ptr: *const u8, _len: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_rounds_to_page_and_tracks_mapping() {
        let mut engine = ExecutionEngine::new();
        let code = vec![0u8; 12];
        let base = engine.install(&code).unwrap();
        assert!(!base.is_null());
        assert_eq!(engine.mapping_count(), 1);

        engine.install(&code).unwrap();
        assert_eq!(engine.mapping_count(), 2);
    }

    #[test]
    fn installed_bytes_are_readable() {
        let mut engine = ExecutionEngine::new();
        let code: Vec<u8> = 0xD65F_03C0u32.to_le_bytes().to_vec(); // RET
        let base = engine.install(&code).unwrap();
        let readback = unsafe { std::slice::from_raw_parts(base, 4) };
        assert_eq!(readback, &code[..]);
    }

    #[cfg(target_arch = "aarch64")]
    #[test]
    fn execute_runs_a_return_block() {
        // MOVZ X0, #7; RET
        let mut code = Vec::new();
        code.extend_from_slice(&0xD280_00E0u32.to_le_bytes());
        code.extend_from_slice(&0xD65F_03C0u32.to_le_bytes());

        let mut engine = ExecutionEngine::new();
        let mut state = GuestState::new();
        let next_pc = unsafe { engine.execute(&code, &mut state).unwrap() };
        assert_eq!(next_pc, 7);
    }
}
