//! Kernel-wide constants. Geometry comes from the hardware; the rest are
//! kernel policy.

use hardware::{KERNEL_STACK_PAGES, MAX_PT_LEN, PAGE_SIZE};

pub struct Config;

impl Config {
    pub const PAGE_SIZE: usize = PAGE_SIZE;
    pub const MAX_PT_LEN: usize = MAX_PT_LEN;

    pub const VMEM_1_BASE: u32 = hardware::VMEM_1_BASE;
    pub const VMEM_1_LIMIT: u32 = hardware::VMEM_1_LIMIT;

    /// Region-0 page numbers of the two kernel-stack slots.
    pub const KERNEL_STACK_PAGES: usize = KERNEL_STACK_PAGES;
    pub const KERNEL_STACK_BASE_PAGE: usize = MAX_PT_LEN - KERNEL_STACK_PAGES;

    /// Scratch slots just below the kernel stack, used for the transient
    /// mappings during stack cloning and fork page copies.
    pub const SCRATCH_BASE_PAGE: usize = Self::KERNEL_STACK_BASE_PAGE - KERNEL_STACK_PAGES;

    pub const TERMINAL_MAX_LINE: usize = hardware::TERMINAL_MAX_LINE;
    /// Initial kernel-side terminal line buffer; grows by doubling.
    pub const TERMINAL_BUFFER_SIZE: usize = 1024;
    pub const NUM_TERMINALS: usize = hardware::NUM_TERMINALS;

    /// Ring capacity of a pipe. Effective capacity is one byte less.
    pub const PIPE_BUFFER_LEN: usize = 256;

    /// Pages the memory-fault handler will grow the user stack by, at most.
    pub const STACK_GROWTH_WINDOW: usize = 2;

    /// Initial user stack mapping at the top of region 1.
    pub const USER_STACK_PAGES: usize = 1;

    /// Syscall-level error return.
    pub const ERROR: i32 = -1;

    /// Program the boot argument vector defaults to.
    pub const DEFAULT_INIT: &'static str = "test/init";
    /// Program loaded into the idle process.
    pub const IDLE_PROGRAM: &'static str = "test/idle";
}
