//! Terminal syscalls.
//!
//! Writes go out in hardware-maximum chunks. The writer blocks twice per
//! chunk at most: once waiting for the device to go idle, once for its own
//! transmit to complete. The transmit-completion trap wakes it (or
//! reserves the device for it), and the chunk loop continues from
//! [`resume_inflight_write`] / [`resume_pending_write`] when the writer is
//! next dispatched.

use log::{debug, warn};

use super::ret;
use crate::config::Config;
use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::pcb::{BlockReason, Pid, TtyWriteJob};

pub fn sys_tty_write(k: &mut Kernel, caller: Pid) {
    let (tty_raw, len) = {
        let uc = &k.pcb_ref(caller).uc;
        (uc.regs[0], uc.regs[2])
    };
    if tty_raw < 0 || tty_raw as usize >= k.terminals.len() {
        ret(k, caller, Err(KernelError::InvalidArgument("terminal id")));
        return;
    }
    if len < 0 {
        ret(k, caller, Err(KernelError::InvalidArgument("negative length")));
        return;
    }
    if len == 0 {
        k.set_user_return(caller, 0);
        return;
    }
    let tty = tty_raw as usize;
    k.pcb_mut(caller).tty_write = Some(TtyWriteJob {
        tty,
        total: len as usize,
        written: 0,
        chunk: 0,
    });

    if k.terminals[tty].busy {
        debug!("pid {}: tty {} busy, queuing behind it", caller, tty);
        k.block_running(BlockReason::TtyWritePending { tty });
        return;
    }
    match start_next_chunk(k, caller, tty) {
        Ok(()) => k.dispatch(),
        Err(e) => fail_write(k, caller, tty, e),
    }
}

/// Copy the next chunk out of user space into a kernel buffer, start the
/// hardware transmit, and block the writer until the completion trap.
fn start_next_chunk(k: &mut Kernel, pid: Pid, tty: usize) -> Result<(), KernelError> {
    let job = k
        .pcb_ref(pid)
        .tty_write
        .ok_or(KernelError::InvalidArgument("no write in progress"))?;
    let chunk = Config::TERMINAL_MAX_LINE.min(job.total - job.written);
    let base = k.pcb_ref(pid).uc.regs[1] as u32 + job.written as u32;
    let data = k.read_user(base, chunk)?;

    k.terminals[tty].busy = true;
    k.machine.tty_transmit(tty, &data)?;
    if let Some(job) = &mut k.pcb_mut(pid).tty_write {
        job.chunk = chunk;
    }
    k.pcb_mut(pid).block_reason = Some(BlockReason::TtyWriteInFlight { tty });
    k.blocked.push_head(pid);
    Ok(())
}

fn fail_write(k: &mut Kernel, pid: Pid, tty: usize, e: KernelError) {
    warn!("pid {}: terminal write failed: {}", pid, e);
    k.pcb_mut(pid).tty_write = None;
    // Nothing of ours is in flight on an error path.
    k.terminals[tty].busy = k.machine.tty_transmit_in_flight(tty);
    k.set_user_return(pid, Config::ERROR);
}

/// Dispatched after the completion trap reserved the device for us: put
/// the next chunk on the wire. Returns true because the writer blocks for
/// the transmit.
pub fn resume_pending_write(k: &mut Kernel, pid: Pid, tty: usize) -> bool {
    match start_next_chunk(k, pid, tty) {
        Ok(()) => true,
        Err(e) => {
            fail_write(k, pid, tty, e);
            false
        }
    }
}

/// Dispatched after our own transmit completed: account the chunk, then
/// finish, queue behind a busy device, or send the next chunk.
pub fn resume_inflight_write(k: &mut Kernel, pid: Pid, tty: usize) -> bool {
    let Some(mut job) = k.pcb_ref(pid).tty_write else {
        warn!("pid {} resumed a terminal write with no job", pid);
        k.set_user_return(pid, Config::ERROR);
        return false;
    };
    job.written += job.chunk;
    job.chunk = 0;
    if job.written >= job.total {
        k.pcb_mut(pid).tty_write = None;
        k.set_user_return(pid, job.total as i32);
        debug!("pid {}: terminal write of {} bytes complete", pid, job.total);
        return false;
    }
    k.pcb_mut(pid).tty_write = Some(job);

    if k.terminals[tty].busy {
        // Another writer won the device between transmits.
        k.pcb_mut(pid).block_reason = Some(BlockReason::TtyWritePending { tty });
        k.blocked.push_head(pid);
        return true;
    }
    match start_next_chunk(k, pid, tty) {
        Ok(()) => true,
        Err(e) => {
            fail_write(k, pid, tty, e);
            false
        }
    }
}

pub fn sys_tty_read(k: &mut Kernel, caller: Pid) {
    let (tty_raw, len) = {
        let uc = &k.pcb_ref(caller).uc;
        (uc.regs[0], uc.regs[2])
    };
    if tty_raw < 0 || tty_raw as usize >= k.terminals.len() {
        ret(k, caller, Err(KernelError::InvalidArgument("terminal id")));
        return;
    }
    if len < 0 {
        ret(k, caller, Err(KernelError::InvalidArgument("negative length")));
        return;
    }
    if len == 0 {
        k.set_user_return(caller, 0);
        return;
    }
    let tty = tty_raw as usize;
    if !k.terminals[tty].has_input() {
        debug!("pid {} blocks reading tty {}", caller, tty);
        k.block_running(BlockReason::TtyRead { tty });
        return;
    }
    let result = deliver_line(k, caller, tty);
    ret(k, caller, result);
}

/// Copy up to `len` bytes, or through the first newline, into the
/// caller's buffer; the terminal buffer compacts behind the read.
fn deliver_line(k: &mut Kernel, caller: Pid, tty: usize) -> Result<i32, KernelError> {
    let (buf, len) = {
        let uc = &k.pcb_ref(caller).uc;
        (uc.regs[1] as u32, uc.regs[2] as usize)
    };
    let data = k.terminals[tty].take_line(len);
    k.write_user(buf, &data)?;
    Ok(data.len() as i32)
}

/// Resumption half of a blocked read. A ready-queue racer may have eaten
/// the line before we were dispatched; block again if so.
pub fn finish_tty_read(k: &mut Kernel, pid: Pid, tty: usize) -> bool {
    if !k.terminals[tty].has_input() {
        k.pcb_mut(pid).block_reason = Some(BlockReason::TtyRead { tty });
        k.blocked.push_head(pid);
        return true;
    }
    let result = deliver_line(k, pid, tty);
    ret(k, pid, result);
    false
}
