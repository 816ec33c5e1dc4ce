//! The two trampolines behind the hardware context-switch primitive.
//!
//! Both are pure state rewriters: Clone copies the live kernel stack and
//! context into a destination PCB, Switch saves the outgoing context and
//! repoints the kernel-stack mappings at the incoming PCB's frames. A
//! trampoline handed a PCB that does not exist logs and abandons the
//! switch; nothing unwinds.

use std::rc::Rc;

use hardware::{Prot, Pte, Region, KERNEL_STACK_PAGES, PAGE_SIZE};
use log::{error, trace};

use crate::config::Config;
use crate::kernel::Kernel;
use crate::pcb::Pid;

impl Kernel {
    /// Clone trampoline: duplicate the running kernel stack into `dest`'s
    /// preallocated frames via the scratch slots just below the stack, and
    /// deep-copy the outgoing kernel context into `dest`. The outgoing
    /// context resumes, so the caller keeps running.
    pub(crate) fn clone_kernel_stack(&mut self, dest: Pid) {
        let machine = Rc::clone(&self.machine);
        machine.kernel_context_switch(|outgoing| {
            if !self.procs.contains_key(&dest) {
                error!("clone trampoline given unknown pid {}", dest);
                return None;
            }
            self.pcb_mut(dest).kc = outgoing.clone();

            let dest_frames = self.pcb_ref(dest).kernel_stack_frames;
            {
                let mut table = self.kernel_table.borrow_mut();
                for (j, &frame) in dest_frames.iter().enumerate() {
                    table.set(
                        Config::SCRATCH_BASE_PAGE + j,
                        Pte::mapped(frame, Prot::read_write()),
                    );
                }
            }

            let mut page = vec![0u8; PAGE_SIZE];
            for j in 0..KERNEL_STACK_PAGES {
                let src = ((Config::KERNEL_STACK_BASE_PAGE + j) * PAGE_SIZE) as u32;
                let dst = ((Config::SCRATCH_BASE_PAGE + j) * PAGE_SIZE) as u32;
                if machine
                    .read_virtual(src, &mut page)
                    .and_then(|_| machine.write_virtual(dst, &page))
                    .is_err()
                {
                    error!("kernel stack clone faulted copying page {}", j);
                }
            }

            {
                let mut table = self.kernel_table.borrow_mut();
                for j in 0..KERNEL_STACK_PAGES {
                    table.clear(Config::SCRATCH_BASE_PAGE + j);
                }
            }
            machine.flush_tlb(Region::Kernel);
            trace!("kernel stack cloned into pid {}", dest);
            Some(outgoing.clone())
        });
    }

    /// Switch trampoline: save the outgoing kernel context, rewrite the
    /// two kernel-stack slots to the incoming PCB's frames, flush, update
    /// `running`, and resume the incoming PCB's saved context.
    pub(crate) fn context_switch(&mut self, from: Option<Pid>, to: Pid) {
        if from == Some(to) {
            return;
        }
        let machine = Rc::clone(&self.machine);
        machine.kernel_context_switch(|outgoing| {
            let Some(next) = self.procs.get(&to) else {
                error!("switch trampoline given unknown pid {}", to);
                return None;
            };
            let next_frames = next.kernel_stack_frames;
            let next_kc = next.kc.clone();

            if let Some(out) = from {
                match self.procs.get_mut(&out) {
                    Some(pcb) => pcb.kc = outgoing.clone(),
                    None => error!("switch trampoline: outgoing pid {} has no PCB", out),
                }
            }

            {
                let mut table = self.kernel_table.borrow_mut();
                for (j, &frame) in next_frames.iter().enumerate() {
                    table.set_pfn(Config::KERNEL_STACK_BASE_PAGE + j, frame);
                }
            }
            machine.flush_tlb(Region::Kernel);
            self.running = to;
            trace!("context switch {:?} -> {}", from, to);
            Some(next_kc)
        });
    }
}
