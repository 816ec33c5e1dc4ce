//! Program-image store backing the ELF-style loader.
//!
//! The machine holds the executables the kernel can load by path. An image
//! is already split into the two segments the loader maps: text (read +
//! execute) and data (read + write). Images come either from a direct
//! registration (synthetic programs in tests and demos) or from a real ELF
//! file via goblin.

use std::collections::HashMap;

use goblin::elf::program_header::{PF_X, PT_LOAD};
use goblin::elf::Elf;

use crate::machine::MachineError;

/// One loadable program: flat text and data segments plus the entry offset
/// into the text segment.
#[derive(Clone, Debug, Default)]
pub struct ProgramImage {
    pub text: Vec<u8>,
    pub data: Vec<u8>,
    pub entry: u32,
}

impl ProgramImage {
    pub fn new(text: Vec<u8>, data: Vec<u8>) -> Self {
        Self {
            text,
            data,
            entry: 0,
        }
    }

    /// Flatten an ELF executable into text/data segments.
    ///
    /// Executable `PT_LOAD` segments concatenate into text (lowest vaddr
    /// first), everything else loadable into data. The entry point is kept
    /// relative to the first executable segment.
    pub fn from_elf(bytes: &[u8]) -> Result<Self, MachineError> {
        let elf =
            Elf::parse(bytes).map_err(|e| MachineError::BadImage(format!("elf parse: {}", e)))?;

        let mut exec: Vec<&goblin::elf::ProgramHeader> = Vec::new();
        let mut other: Vec<&goblin::elf::ProgramHeader> = Vec::new();
        for ph in elf
            .program_headers
            .iter()
            .filter(|ph| ph.p_type == PT_LOAD && ph.p_filesz > 0)
        {
            if ph.p_flags & PF_X != 0 {
                exec.push(ph);
            } else {
                other.push(ph);
            }
        }
        if exec.is_empty() {
            return Err(MachineError::BadImage(
                "no executable PT_LOAD segment".to_string(),
            ));
        }
        exec.sort_by_key(|ph| ph.p_vaddr);
        other.sort_by_key(|ph| ph.p_vaddr);

        let text_base = exec[0].p_vaddr;
        let mut image = ProgramImage::default();
        for ph in exec {
            let start = ph.p_offset as usize;
            let end = start + ph.p_filesz as usize;
            let slice = bytes
                .get(start..end)
                .ok_or_else(|| MachineError::BadImage("segment outside file".to_string()))?;
            // Keep intra-text gaps so offsets from text_base stay correct.
            let rel = (ph.p_vaddr - text_base) as usize;
            if image.text.len() < rel {
                image.text.resize(rel, 0);
            }
            image.text.extend_from_slice(slice);
        }
        for ph in other {
            let start = ph.p_offset as usize;
            let end = start + ph.p_filesz as usize;
            let slice = bytes
                .get(start..end)
                .ok_or_else(|| MachineError::BadImage("segment outside file".to_string()))?;
            image.data.extend_from_slice(slice);
        }
        image.entry = elf.entry.saturating_sub(text_base) as u32;
        Ok(image)
    }
}

/// Path-keyed registry of loadable programs.
#[derive(Debug, Default)]
pub struct ProgramStore {
    images: HashMap<String, ProgramImage>,
}

impl ProgramStore {
    pub fn register(&mut self, path: &str, image: ProgramImage) {
        self.images.insert(path.to_string(), image);
    }

    pub fn get(&self, path: &str) -> Option<ProgramImage> {
        self.images.get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.images.contains_key(path)
    }
}
