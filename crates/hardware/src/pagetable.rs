//! Page-table entries and tables shared between the kernel and the
//! translation hardware.
//!
//! The kernel owns each table; the machine's PTBR registers hold a second
//! handle to whichever tables are currently installed, so both sides see
//! edits immediately (the TLB flush log records when the kernel declares
//! stale mappings gone).

use std::cell::RefCell;
use std::rc::Rc;

/// Access permissions on one page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Prot {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

impl Prot {
    pub const fn read_exec() -> Self {
        Self {
            read: true,
            write: false,
            exec: true,
        }
    }

    pub const fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            exec: false,
        }
    }
}

/// One page-table entry: a valid bit, permissions, and the backing frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pte {
    pub valid: bool,
    pub prot: Prot,
    pub pfn: usize,
}

impl Pte {
    pub fn mapped(pfn: usize, prot: Prot) -> Self {
        Self {
            valid: true,
            prot,
            pfn,
        }
    }
}

/// A region's page table, indexed by virtual page number within the region.
#[derive(Clone, Debug)]
pub struct PageTable {
    entries: Vec<Pte>,
}

impl PageTable {
    pub fn new(len: usize) -> Self {
        Self {
            entries: vec![Pte::default(); len],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, vpn: usize) -> Pte {
        self.entries[vpn]
    }

    pub fn set(&mut self, vpn: usize, pte: Pte) {
        self.entries[vpn] = pte;
    }

    /// Drop the mapping at `vpn`, leaving the slot invalid.
    pub fn clear(&mut self, vpn: usize) {
        self.entries[vpn] = Pte::default();
    }

    /// Rewrite only the frame of an existing mapping (kernel-stack slots).
    pub fn set_pfn(&mut self, vpn: usize, pfn: usize) {
        self.entries[vpn].pfn = pfn;
    }

    pub fn valid_entries(&self) -> impl Iterator<Item = (usize, Pte)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.valid)
            .map(|(vpn, e)| (vpn, *e))
    }

    /// First invalid slot, used for scratch mappings.
    pub fn first_invalid(&self) -> Option<usize> {
        self.entries.iter().position(|e| !e.valid)
    }
}

/// Shared handle to a page table: the owning PCB keeps one, the PTBR
/// register keeps another while the table is installed.
pub type PageTableRef = Rc<RefCell<PageTable>>;

pub fn new_table_ref(len: usize) -> PageTableRef {
    Rc::new(RefCell::new(PageTable::new(len)))
}
