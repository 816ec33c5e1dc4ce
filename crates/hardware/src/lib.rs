//! Simulated machine the kernel runs on.
//!
//! This crate plays the role of the hardware: a contiguous physical memory
//! split into frames, per-region page-table registers with a software
//! translation walk, a TLB flush register (modeled as a flush log), an
//! opaque kernel-context slot behind the `kernel_context_switch` primitive,
//! asynchronous serial terminals, a PID allocator, and a program-image
//! store for the ELF-style loader. The kernel crate consumes these by name;
//! nothing here knows about PCBs or scheduling.

pub mod boot;
pub mod context;
pub mod machine;
pub mod memory;
pub mod pagetable;
pub mod pids;
pub mod programs;
pub mod registers;
pub mod tty;

pub use boot::BootInfo;
pub use context::{syscall, KernelContext, TrapVector, UserContext, NUM_REGS};
pub use machine::{Access, Machine, MachineError};
pub use memory::PhysicalMemory;
pub use pagetable::{new_table_ref, PageTable, PageTableRef, Prot, Pte};
pub use programs::{ProgramImage, ProgramStore};
pub use registers::Region;

/// Bytes per page / frame.
pub const PAGE_SIZE: usize = 4096;

/// Pages per virtual region; also the PTLR value both regions boot with.
pub const MAX_PT_LEN: usize = 128;

pub const VMEM_0_BASE: u32 = 0;
pub const VMEM_0_LIMIT: u32 = (MAX_PT_LEN * PAGE_SIZE) as u32;
pub const VMEM_1_BASE: u32 = VMEM_0_LIMIT;
pub const VMEM_1_LIMIT: u32 = 2 * VMEM_0_LIMIT;

/// The kernel stack occupies the two highest pages of region 0. The frames
/// behind these two slots are rewritten on every context switch.
pub const KERNEL_STACK_PAGES: usize = 2;
pub const KERNEL_STACK_LIMIT: u32 = VMEM_0_LIMIT;
pub const KERNEL_STACK_BASE: u32 = VMEM_0_LIMIT - (KERNEL_STACK_PAGES * PAGE_SIZE) as u32;

/// Largest transmit the terminal hardware accepts in one call.
pub const TERMINAL_MAX_LINE: usize = 128;

/// Serial terminals wired to the machine.
pub const NUM_TERMINALS: usize = 4;
