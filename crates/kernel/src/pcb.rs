//! Process control blocks.

use hardware::{KernelContext, PageTableRef, UserContext, KERNEL_STACK_PAGES};

pub type Pid = i32;

/// Why a process is off the CPU, and — because a woken process finishes its
/// interrupted syscall when it is next dispatched — what remains to be done
/// for it. Wakers move a PCB to ready without clearing this; the dispatcher
/// takes it and runs the matching completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockReason {
    /// Sleeping until the tick countdown hits zero.
    Delay { ticks: i32 },
    /// Waiting for a child to turn up defunct.
    Wait,
    /// Blocked reading an empty pipe.
    PipeRead { pipe_id: i32 },
    /// Blocked until a line arrives on the terminal.
    TtyRead { tty: usize },
    /// Waiting for the terminal to go idle before transmitting.
    TtyWritePending { tty: usize },
    /// Waiting for own transmit to complete.
    TtyWriteInFlight { tty: usize },
    /// Queued on a lock's wait list.
    LockWait { lock_id: i32 },
    /// Queued on a condition variable; reacquires `lock_id` on wake.
    CvarWait { cvar_id: i32, lock_id: i32 },
}

/// Progress of a chunked terminal write. The interrupted loop cannot be
/// recovered from the saved registers alone, so it lives here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TtyWriteJob {
    pub tty: usize,
    /// Total bytes the caller asked to write.
    pub total: usize,
    /// Bytes whose transmits have completed.
    pub written: usize,
    /// Size of the chunk currently in flight.
    pub chunk: usize,
}

/// Per-process kernel record.
#[derive(Clone, Debug)]
pub struct Pcb {
    pub pid: Pid,
    /// Exit status; forced to ERROR by fatal faults.
    pub status: i32,
    pub uc: UserContext,
    pub kc: KernelContext,
    /// Region-1 page table, exclusively owned (the PTBR holds a second
    /// handle only while this process is dispatched).
    pub page_table: PageTableRef,
    /// Frames backing the kernel stack; `kernel_stack_frames[j]` backs
    /// region-0 page `KERNEL_STACK_BASE_PAGE + j`.
    pub kernel_stack_frames: [usize; KERNEL_STACK_PAGES],
    /// Highest mapped page of user text+data.
    pub last_user_data_page: usize,
    /// Lowest mapped page of the user stack.
    pub last_user_stack_page: usize,
    /// First unmapped heap page; `Brk` moves this.
    pub brk: usize,
    /// Weak parent edge; nulled when the parent exits.
    pub parent: Option<Pid>,
    pub children: Vec<Pid>,
    pub block_reason: Option<BlockReason>,
    pub tty_write: Option<TtyWriteJob>,
    /// Lock currently held, if any.
    pub held_lock: Option<i32>,
}

impl Pcb {
    pub fn new(
        pid: Pid,
        uc: UserContext,
        page_table: PageTableRef,
        kernel_stack_frames: [usize; KERNEL_STACK_PAGES],
    ) -> Self {
        Self {
            pid,
            status: 0,
            uc,
            kc: KernelContext::default(),
            page_table,
            kernel_stack_frames,
            last_user_data_page: 0,
            last_user_stack_page: 0,
            brk: 0,
            parent: None,
            children: Vec::new(),
            block_reason: None,
            tty_write: None,
            held_lock: None,
        }
    }
}
