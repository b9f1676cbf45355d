// elf.rs - RISC-V ELF loading
//
// Uses goblin to parse the input binary, validate that it is a 64-bit
// RISC-V executable, and extract the .text section plus a symbol table
// for function-entry lookup.

use std::collections::HashMap;

use anyhow::{Context, Result};
use goblin::elf::{header, Elf};

/// The executable text section of a loaded binary.
#[derive(Debug, Clone)]
pub struct TextSection {
    pub virtual_address: u64,
    pub data: Vec<u8>,
}

/// A loaded and validated RV64 ELF executable.
#[derive(Debug)]
pub struct LoadedElf {
    pub entry: u64,
    pub text: TextSection,
    symbols: HashMap<String, u64>,
}

impl LoadedElf {
    /// Parse and validate an ELF image.
    pub fn parse(data: &[u8]) -> Result<LoadedElf> {
        let elf = Elf::parse(data).context("invalid ELF format")?;

        if !elf.is_64 {
            anyhow::bail!("not a 64-bit ELF file");
        }
        if elf.header.e_machine != header::EM_RISCV {
            anyhow::bail!(
                "not a RISC-V binary (e_machine=0x{:x})",
                elf.header.e_machine
            );
        }
        if elf.header.e_type != header::ET_EXEC {
            anyhow::bail!("not an executable ELF file (e_type={})", elf.header.e_type);
        }

        let text = extract_text(&elf, data)?;
        let symbols = collect_symbols(&elf);

        Ok(LoadedElf {
            entry: elf.entry,
            text,
            symbols,
        })
    }

    /// Load an ELF executable from disk.
    pub fn load(path: &std::path::Path) -> Result<LoadedElf> {
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        LoadedElf::parse(&data)
    }

    /// Address of a named function symbol, if present.
    pub fn function_address(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }
}

fn extract_text(elf: &Elf, data: &[u8]) -> Result<TextSection> {
    for section in &elf.section_headers {
        let name = elf.shdr_strtab.get_at(section.sh_name);
        if name != Some(".text") {
            continue;
        }
        if section.sh_flags & u64::from(goblin::elf::section_header::SHF_EXECINSTR) == 0 {
            anyhow::bail!(".text section is not executable");
        }

        let start = section.sh_offset as usize;
        let end = start + section.sh_size as usize;
        let bytes = data
            .get(start..end)
            .context(".text section data out of file bounds")?;

        return Ok(TextSection {
            virtual_address: section.sh_addr,
            data: bytes.to_vec(),
        });
    }
    anyhow::bail!("no .text section found")
}

fn collect_symbols(elf: &Elf) -> HashMap<String, u64> {
    let mut symbols = HashMap::new();
    for (sym, strtab) in elf
        .syms
        .iter()
        .map(|s| (s, &elf.strtab))
        .chain(elf.dynsyms.iter().map(|s| (s, &elf.dynstrtab)))
    {
        if sym.st_value == 0 {
            continue;
        }
        if let Some(name) = strtab.get_at(sym.st_name) {
            if !name.is_empty() {
                symbols.entry(name.to_string()).or_insert(sym.st_value);
            }
        }
    }
    symbols
}
