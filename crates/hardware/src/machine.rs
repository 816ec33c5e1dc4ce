//! The machine itself: translation, virtual memory access for the kernel,
//! the kernel-context-switch primitive, terminals, PIDs, and halt.

use std::cell::{Cell, RefCell};

use log::{debug, error, trace};

use crate::context::KernelContext;
use crate::memory::PhysicalMemory;
use crate::pagetable::PageTableRef;
use crate::pids::PidAllocator;
use crate::programs::ProgramStore;
use crate::registers::{Region, Registers};
use crate::tty::TtyDevice;
use crate::{PAGE_SIZE, VMEM_0_LIMIT, VMEM_1_LIMIT};

/// Faults and misuse the machine can report back to the kernel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MachineError {
    /// No valid mapping for the address under the installed tables.
    TranslationFault(u32),
    /// Mapping exists but forbids the access.
    ProtectionFault(u32),
    /// Address beyond both regions, or physical frame out of range.
    OutOfRange(u32),
    /// Transmit requested while one is already in flight.
    TtyBusy(usize),
    /// Terminal id beyond the wired devices.
    BadTty(usize),
    /// Malformed program image.
    BadImage(String),
}

impl std::fmt::Display for MachineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineError::TranslationFault(va) => write!(f, "translation fault at 0x{:08x}", va),
            MachineError::ProtectionFault(va) => write!(f, "protection fault at 0x{:08x}", va),
            MachineError::OutOfRange(va) => write!(f, "address 0x{:08x} out of range", va),
            MachineError::TtyBusy(tty) => write!(f, "terminal {} transmit already in flight", tty),
            MachineError::BadTty(tty) => write!(f, "no terminal {}", tty),
            MachineError::BadImage(msg) => write!(f, "bad program image: {}", msg),
        }
    }
}

impl std::error::Error for MachineError {}

/// Kind of memory access, for permission checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// The simulated machine. Interior mutability throughout: the kernel holds
/// it behind an `Rc` and the hardware has no business being re-entrant.
pub struct Machine {
    memory: PhysicalMemory,
    registers: RefCell<Registers>,
    tlb_flushes: [Cell<u64>; 2],
    kernel_context: RefCell<KernelContext>,
    ttys: Vec<RefCell<TtyDevice>>,
    pids: RefCell<PidAllocator>,
    programs: RefCell<ProgramStore>,
    halted: Cell<bool>,
}

impl Machine {
    pub fn new(memory_size: usize, num_terminals: usize) -> Self {
        Self {
            memory: PhysicalMemory::new(memory_size),
            registers: RefCell::new(Registers::default()),
            tlb_flushes: [Cell::new(0), Cell::new(0)],
            kernel_context: RefCell::new(KernelContext::default()),
            ttys: (0..num_terminals)
                .map(|_| RefCell::new(TtyDevice::default()))
                .collect(),
            pids: RefCell::new(PidAllocator::new()),
            programs: RefCell::new(ProgramStore::default()),
            halted: Cell::new(false),
        }
    }

    // ---- physical memory -------------------------------------------------

    pub fn num_frames(&self) -> usize {
        self.memory.num_frames()
    }

    pub fn read_frame(&self, pfn: usize, offset: usize, dst: &mut [u8]) {
        self.memory.read(pfn, offset, dst);
    }

    pub fn write_frame(&self, pfn: usize, offset: usize, src: &[u8]) {
        self.memory.write(pfn, offset, src);
    }

    pub fn zero_frame(&self, pfn: usize) {
        self.memory.zero_frame(pfn);
    }

    // ---- registers and TLB ----------------------------------------------

    pub fn set_page_table(&self, region: Region, table: PageTableRef, len: usize) {
        self.registers
            .borrow_mut()
            .set_page_table(region, table, len);
    }

    pub fn page_table(&self, region: Region) -> Option<PageTableRef> {
        self.registers.borrow().page_table(region)
    }

    pub fn enable_vm(&self) {
        self.registers.borrow_mut().enable_vm();
    }

    pub fn vm_enabled(&self) -> bool {
        self.registers.borrow().vm_enabled()
    }

    pub fn flush_tlb(&self, region: Region) {
        let counter = &self.tlb_flushes[region.index()];
        counter.set(counter.get() + 1);
        trace!("tlb flush region {:?}", region);
    }

    pub fn tlb_flushes(&self, region: Region) -> u64 {
        self.tlb_flushes[region.index()].get()
    }

    // ---- translation and virtual access ---------------------------------

    /// Walk the installed tables and resolve `va` to (frame, offset).
    ///
    /// Before VM is enabled every address is interpreted physically.
    pub fn translate(&self, va: u32, access: Access) -> Result<(usize, usize), MachineError> {
        if !self.vm_enabled() {
            let pfn = va as usize / PAGE_SIZE;
            if pfn >= self.memory.num_frames() {
                return Err(MachineError::OutOfRange(va));
            }
            return Ok((pfn, va as usize % PAGE_SIZE));
        }

        let (region, base) = if va < VMEM_0_LIMIT {
            (Region::Kernel, 0u32)
        } else if va < VMEM_1_LIMIT {
            (Region::User, VMEM_0_LIMIT)
        } else {
            return Err(MachineError::OutOfRange(va));
        };

        let registers = self.registers.borrow();
        let vpn = (va - base) as usize / PAGE_SIZE;
        if vpn >= registers.table_len(region) {
            return Err(MachineError::TranslationFault(va));
        }
        let table = registers
            .page_table(region)
            .ok_or(MachineError::TranslationFault(va))?;
        let pte = table.borrow().entry(vpn);
        if !pte.valid {
            return Err(MachineError::TranslationFault(va));
        }
        let allowed = match access {
            Access::Read => pte.prot.read || pte.prot.exec,
            Access::Write => pte.prot.write,
        };
        if !allowed {
            return Err(MachineError::ProtectionFault(va));
        }
        if pte.pfn >= self.memory.num_frames() {
            return Err(MachineError::OutOfRange(va));
        }
        Ok((pte.pfn, (va - base) as usize % PAGE_SIZE))
    }

    /// Read through the installed tables, spanning pages as needed.
    pub fn read_virtual(&self, va: u32, dst: &mut [u8]) -> Result<(), MachineError> {
        let mut done = 0usize;
        while done < dst.len() {
            let addr = va + done as u32;
            let (pfn, offset) = self.translate(addr, Access::Read)?;
            let take = (PAGE_SIZE - offset).min(dst.len() - done);
            self.memory.read(pfn, offset, &mut dst[done..done + take]);
            done += take;
        }
        Ok(())
    }

    /// Write through the installed tables, spanning pages as needed.
    pub fn write_virtual(&self, va: u32, src: &[u8]) -> Result<(), MachineError> {
        let mut done = 0usize;
        while done < src.len() {
            let addr = va + done as u32;
            let (pfn, offset) = self.translate(addr, Access::Write)?;
            let take = (PAGE_SIZE - offset).min(src.len() - done);
            self.memory.write(pfn, offset, &src[done..done + take]);
            done += take;
        }
        Ok(())
    }

    pub fn write_virtual_i32(&self, va: u32, value: i32) -> Result<(), MachineError> {
        self.write_virtual(va, &value.to_le_bytes())
    }

    pub fn read_virtual_u32(&self, va: u32) -> Result<u32, MachineError> {
        let mut buf = [0u8; 4];
        self.read_virtual(va, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read a NUL-terminated string, capped at `max` bytes.
    pub fn read_virtual_cstring(&self, va: u32, max: usize) -> Result<String, MachineError> {
        let mut out = Vec::new();
        for i in 0..max {
            let mut byte = [0u8];
            self.read_virtual(va + i as u32, &mut byte)?;
            if byte[0] == 0 {
                break;
            }
            out.push(byte[0]);
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    // ---- kernel context switch ------------------------------------------

    /// The context-switch primitive: hands the live kernel context to the
    /// trampoline and resumes whatever context the trampoline returns.
    /// A trampoline that returns `None` abandons the switch; the outgoing
    /// context stays live (the kernel logs, nothing unwinds).
    pub fn kernel_context_switch<F>(&self, trampoline: F)
    where
        F: FnOnce(&KernelContext) -> Option<KernelContext>,
    {
        let outgoing = self.kernel_context.borrow().clone();
        match trampoline(&outgoing) {
            Some(incoming) => *self.kernel_context.borrow_mut() = incoming,
            None => error!("context-switch trampoline abandoned; outgoing context stays live"),
        }
    }

    pub fn current_kernel_context(&self) -> KernelContext {
        self.kernel_context.borrow().clone()
    }

    /// Stamp the live context (used at boot so snapshots are non-trivial).
    pub fn seed_kernel_context(&self, tag: u64) {
        *self.kernel_context.borrow_mut() = KernelContext::tagged(tag);
    }

    // ---- terminals -------------------------------------------------------

    pub fn num_terminals(&self) -> usize {
        self.ttys.len()
    }

    fn tty(&self, tty: usize) -> Result<&RefCell<TtyDevice>, MachineError> {
        self.ttys.get(tty).ok_or(MachineError::BadTty(tty))
    }

    /// Start an asynchronous transmit. Completion arrives later as a trap.
    pub fn tty_transmit(&self, tty: usize, data: &[u8]) -> Result<(), MachineError> {
        let dev = self.tty(tty)?;
        if !dev.borrow_mut().start_transmit(data) {
            return Err(MachineError::TtyBusy(tty));
        }
        debug!("tty {}: transmit of {} bytes started", tty, data.len());
        Ok(())
    }

    /// Pull the oldest pending input line, up to `max` bytes.
    pub fn tty_receive(&self, tty: usize, max: usize) -> Vec<u8> {
        match self.tty(tty) {
            Ok(dev) => dev.borrow_mut().receive(max),
            Err(_) => Vec::new(),
        }
    }

    /// Harness side: queue a typed line. Fire the receive trap afterwards.
    pub fn tty_push_input(&self, tty: usize, line: &[u8]) {
        if let Ok(dev) = self.tty(tty) {
            dev.borrow_mut().push_input(line);
        }
    }

    /// Harness side: finish the in-flight transmit. Fire the transmit trap
    /// afterwards if this returns true.
    pub fn tty_complete_transmit(&self, tty: usize) -> bool {
        match self.tty(tty) {
            Ok(dev) => dev.borrow_mut().complete_transmit(),
            Err(_) => false,
        }
    }

    pub fn tty_transmit_in_flight(&self, tty: usize) -> bool {
        self.tty(tty)
            .map(|dev| dev.borrow().transmit_in_flight())
            .unwrap_or(false)
    }

    pub fn tty_transmitted(&self, tty: usize) -> Vec<Vec<u8>> {
        self.tty(tty)
            .map(|dev| dev.borrow().transmitted().to_vec())
            .unwrap_or_default()
    }

    // ---- pids, programs, halt -------------------------------------------

    pub fn new_pid(&self) -> i32 {
        self.pids.borrow_mut().new_pid()
    }

    pub fn retire_pid(&self, pid: i32) {
        self.pids.borrow_mut().retire(pid);
    }

    pub fn pid_live(&self, pid: i32) -> bool {
        self.pids.borrow().is_live(pid)
    }

    pub fn register_program(&self, path: &str, image: crate::programs::ProgramImage) {
        self.programs.borrow_mut().register(path, image);
    }

    pub fn program(&self, path: &str) -> Option<crate::programs::ProgramImage> {
        self.programs.borrow().get(path)
    }

    /// Stop the machine. Nothing runs after this; the kernel checks the
    /// flag instead of expecting the call not to return.
    pub fn halt(&self) {
        debug!("machine halted");
        self.halted.set(true);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.get()
    }
}
