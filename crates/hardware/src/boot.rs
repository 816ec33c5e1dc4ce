//! Boot-time handoff from the machine to the kernel.

use crate::{MAX_PT_LEN, PAGE_SIZE};

/// What the machine tells the kernel about itself at boot: total physical
/// memory and where the loaded kernel image's text ends, data/heap begin,
/// and the boot-time break sits (all as region-0 page numbers).
#[derive(Clone, Copy, Debug)]
pub struct BootInfo {
    pub memory_size: usize,
    pub first_text_page: usize,
    pub first_data_page: usize,
    pub orig_brk_page: usize,
}

impl BootInfo {
    /// Conventional layout: 8 pages of text, 8 of data, break right after.
    pub fn with_memory(memory_size: usize) -> Self {
        Self {
            memory_size,
            first_text_page: 0,
            first_data_page: 8,
            orig_brk_page: 16,
        }
    }

    pub fn num_frames(&self) -> usize {
        self.memory_size / PAGE_SIZE
    }
}

impl Default for BootInfo {
    fn default() -> Self {
        // Enough memory that the identity-mapped kernel stack pages at the
        // top of region 0 exist as physical frames.
        Self::with_memory(2 * MAX_PT_LEN * PAGE_SIZE)
    }
}
