//! The trap vector: one handler per hardware trap, registered in a
//! dispatch table at boot.

use std::collections::HashMap;

use hardware::{Prot, Pte, TrapVector};
use log::{debug, trace, warn};

use crate::config::Config;
use crate::kernel::Kernel;
use crate::pcb::BlockReason;
use crate::syscall;

pub type TrapHandler = fn(&mut Kernel);

/// Vector-indexed handler table, the software stand-in for the hardware's
/// vector base register.
pub struct TrapTable {
    handlers: HashMap<TrapVector, TrapHandler>,
}

impl TrapTable {
    pub fn new() -> Self {
        let mut handlers: HashMap<TrapVector, TrapHandler> = HashMap::new();
        handlers.insert(TrapVector::Kernel, handle_trap_kernel as TrapHandler);
        handlers.insert(TrapVector::Clock, handle_trap_clock as TrapHandler);
        handlers.insert(TrapVector::Illegal, handle_trap_illegal as TrapHandler);
        handlers.insert(TrapVector::Memory, handle_trap_memory as TrapHandler);
        handlers.insert(TrapVector::Math, handle_trap_math as TrapHandler);
        handlers.insert(TrapVector::TtyReceive, handle_trap_tty_receive as TrapHandler);
        handlers.insert(TrapVector::TtyTransmit, handle_trap_tty_transmit as TrapHandler);
        Self { handlers }
    }

    fn handler(&self, vector: TrapVector) -> Option<TrapHandler> {
        self.handlers.get(&vector).copied()
    }
}

impl Default for TrapTable {
    fn default() -> Self {
        Self::new()
    }
}

pub fn dispatch(k: &mut Kernel, vector: TrapVector) {
    match k.trap_table.handler(vector) {
        Some(handler) => handler(k),
        None => warn!("trap {:?} not handled", vector),
    }
}

/// Syscall trap: hand off to the syscall dispatcher.
fn handle_trap_kernel(k: &mut Kernel) {
    syscall::dispatch(k);
}

/// Clock tick. First a wake pass over the blocked queue: delays count
/// down, waiters with a defunct child and readers of no-longer-empty pipes
/// move to ready. Then the running PCB is preempted round-robin.
fn handle_trap_clock(k: &mut Kernel) {
    for pid in k.blocked.snapshot() {
        let reason = match k.procs.get(&pid) {
            Some(pcb) => pcb.block_reason,
            None => continue,
        };
        match reason {
            Some(BlockReason::Delay { ticks }) => {
                let left = ticks - 1;
                k.pcb_mut(pid).block_reason = Some(BlockReason::Delay { ticks: left });
                if left == 0 {
                    trace!("pid {} delay expired", pid);
                    k.wake_from_blocked(pid);
                }
            }
            Some(BlockReason::Wait) => {
                let has_defunct_child = k
                    .defunct
                    .snapshot()
                    .iter()
                    .any(|d| k.procs.get(d).map_or(false, |p| p.parent == Some(pid)));
                if has_defunct_child {
                    k.wake_from_blocked(pid);
                }
            }
            Some(BlockReason::PipeRead { pipe_id }) => {
                let has_bytes = k
                    .pipe(pipe_id)
                    .map_or(false, |p| p.write_index != p.read_index);
                if has_bytes {
                    k.wake_from_blocked(pid);
                }
            }
            _ => {}
        }
    }
    k.preempt();
}

/// Illegal instruction: abort the running process, keep the rest going.
fn handle_trap_illegal(k: &mut Kernel) {
    let pid = k.running;
    warn!("pid {}: illegal instruction", pid);
    k.pcb_mut(pid).status = Config::ERROR;
    syscall::process::exit_current(k, pid);
}

/// Arithmetic fault: same fate as an illegal instruction.
fn handle_trap_math(k: &mut Kernel) {
    let pid = k.running;
    warn!("pid {}: math fault", pid);
    k.pcb_mut(pid).status = Config::ERROR;
    syscall::process::exit_current(k, pid);
}

/// Memory fault. A touch within the growth window just below the user
/// stack (and above the break) grows the stack by mapping fresh frames;
/// anything else is fatal to the process.
fn handle_trap_memory(k: &mut Kernel) {
    let pid = k.running;
    let addr = k.pcb_ref(pid).uc.addr;
    debug!("pid {}: memory fault at 0x{:08x}", pid, addr);

    if addr < Config::VMEM_1_BASE || addr >= Config::VMEM_1_LIMIT {
        warn!("pid {}: fault outside the user region", pid);
        k.pcb_mut(pid).status = Config::ERROR;
        syscall::process::exit_current(k, pid);
        return;
    }

    let page = (addr - Config::VMEM_1_BASE) as usize / Config::PAGE_SIZE;
    let (last_stack, brk) = {
        let pcb = k.pcb_ref(pid);
        (pcb.last_user_stack_page, pcb.brk)
    };
    let in_window =
        page + Config::STACK_GROWTH_WINDOW >= last_stack && page < last_stack && page > brk;
    if !in_window {
        warn!(
            "pid {}: fault page {} not in the stack growth window (stack {} brk {})",
            pid, page, last_stack, brk
        );
        k.pcb_mut(pid).status = Config::ERROR;
        syscall::process::exit_current(k, pid);
        return;
    }

    let table = k.pcb_ref(pid).page_table.clone();
    for vpn in page..last_stack {
        let Some(frame) = k.frames.alloc() else {
            warn!("pid {}: no frames left to grow the stack", pid);
            k.pcb_mut(pid).status = Config::ERROR;
            syscall::process::exit_current(k, pid);
            return;
        };
        k.machine.zero_frame(frame);
        table
            .borrow_mut()
            .set(vpn, Pte::mapped(frame, Prot::read_write()));
    }
    k.pcb_mut(pid).last_user_stack_page = page;
    debug!("pid {}: stack grown down to page {}", pid, page);
}

/// A transmit completed: clear the busy bit, wake the writer whose bytes
/// went out, then hand the device to at most one writer queued behind it
/// (the busy bit is set for it now; it transmits when dispatched).
fn handle_trap_tty_transmit(k: &mut Kernel) {
    let tty = k.pcb_ref(k.running).uc.code as usize;
    if tty >= k.terminals.len() {
        warn!("transmit trap for unknown terminal {}", tty);
        return;
    }
    k.terminals[tty].busy = false;

    for pid in k.blocked.snapshot() {
        let reason = k.procs.get(&pid).and_then(|p| p.block_reason);
        if reason == Some(BlockReason::TtyWriteInFlight { tty }) {
            trace!("tty {}: transmit done, pid {} wakes", tty, pid);
            k.wake_from_blocked(pid);
            break;
        }
    }

    for pid in k.blocked.snapshot().into_iter().rev() {
        let reason = k.procs.get(&pid).and_then(|p| p.block_reason);
        if reason == Some(BlockReason::TtyWritePending { tty }) {
            trace!("tty {}: reserved for queued writer pid {}", tty, pid);
            k.wake_from_blocked(pid);
            k.terminals[tty].busy = true;
            break;
        }
    }
}

/// A line arrived: pull it into the terminal's buffer (growing it by
/// doubling under unread input) and wake one blocked reader.
fn handle_trap_tty_receive(k: &mut Kernel) {
    let tty = k.pcb_ref(k.running).uc.code as usize;
    if tty >= k.terminals.len() {
        warn!("receive trap for unknown terminal {}", tty);
        return;
    }
    k.terminals[tty].ensure_room();
    let line = k.machine.tty_receive(tty, Config::TERMINAL_MAX_LINE);
    if line.is_empty() {
        debug!("tty {}: receive trap with no pending input", tty);
        return;
    }
    k.terminals[tty].push_received(&line);

    for pid in k.blocked.snapshot().into_iter().rev() {
        let reason = k.procs.get(&pid).and_then(|p| p.block_reason);
        if reason == Some(BlockReason::TtyRead { tty }) {
            trace!("tty {}: line in, pid {} wakes", tty, pid);
            k.wake_from_blocked(pid);
            break;
        }
    }
}
