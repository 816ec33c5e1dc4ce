//! Round-robin dispatch.
//!
//! Every suspension funnels through [`Kernel::dispatch`]: the caller parks
//! the current PCB somewhere (blocked queue, a wait list, the defunct
//! queue, or back onto ready for preemption) and dispatch picks successors
//! off the ready tail until one of them completes its pending work. A
//! freshly dispatched PCB that was woken mid-syscall finishes that syscall
//! here — and may legally block again, hence the loop. Idle never carries
//! pending work, so the loop always terminates.

use log::trace;

use crate::kernel::Kernel;
use crate::pcb::{BlockReason, Pid};
use crate::syscall;

impl Kernel {
    /// Tail of the ready queue, or idle when nothing is runnable.
    pub(crate) fn find_ready_pcb(&self) -> Pid {
        self.ready.tail().unwrap_or(self.idle_pid)
    }

    /// Switch to successors until one has nothing left to finish. On every
    /// iteration the incoming PCB's region-1 table is reinstalled and the
    /// user TLB flushed; the register was pointing at some other process's
    /// table while the PCB was away.
    pub(crate) fn dispatch(&mut self) {
        loop {
            let next = self.find_ready_pcb();
            self.ready.remove(next);
            let from = if self.procs.contains_key(&self.running) {
                Some(self.running)
            } else {
                None
            };
            self.context_switch(from, next);
            self.install_running_user_table();
            if !self.finish_pending_syscall() {
                break;
            }
        }
    }

    /// Clock preemption: the running PCB joins the head of ready and the
    /// tail runs next, which is what makes the rotation round-robin.
    pub(crate) fn preempt(&mut self) {
        self.enqueue_ready(self.running);
        self.dispatch();
    }

    /// Complete the syscall a just-dispatched PCB was blocked in. Returns
    /// true if the completion blocked again.
    fn finish_pending_syscall(&mut self) -> bool {
        let pid = self.running;
        let Some(reason) = self.pcb_mut(pid).block_reason.take() else {
            return false;
        };
        trace!("pid {} resumes from {:?}", pid, reason);
        match reason {
            BlockReason::Delay { .. } => {
                self.set_user_return(pid, 0);
                false
            }
            BlockReason::Wait => syscall::process::finish_wait(self, pid),
            BlockReason::PipeRead { pipe_id } => syscall::pipe::finish_pipe_read(self, pid, pipe_id),
            BlockReason::TtyRead { tty } => syscall::tty::finish_tty_read(self, pid, tty),
            BlockReason::TtyWritePending { tty } => {
                syscall::tty::resume_pending_write(self, pid, tty)
            }
            BlockReason::TtyWriteInFlight { tty } => {
                syscall::tty::resume_inflight_write(self, pid, tty)
            }
            BlockReason::LockWait { lock_id } => syscall::sync::finish_acquire(self, pid, lock_id),
            BlockReason::CvarWait { lock_id, .. } => {
                syscall::sync::finish_cvar_wait(self, pid, lock_id)
            }
        }
    }

    /// Park the running PCB on the blocked queue with `reason` and give
    /// the CPU away.
    pub(crate) fn block_running(&mut self, reason: BlockReason) {
        let pid = self.running;
        self.pcb_mut(pid).block_reason = Some(reason);
        self.blocked.push_head(pid);
        self.dispatch();
    }
}
