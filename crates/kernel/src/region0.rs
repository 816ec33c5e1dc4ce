//! Region-0 (kernel) page-table maintenance: boot mapping, the kernel
//! break, and the scratch mappings used to reach other processes' frames.

use hardware::{Prot, Pte, Region};
use log::{debug, trace, warn};

use crate::config::Config;
use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::pcb::Pid;

impl Kernel {
    /// Map one kernel page. Before VM is enabled the page is identity
    /// mapped and the matching frame claimed; afterwards a fresh frame is
    /// allocated. Exhaustion here cannot unwind cleanly, so it drains the
    /// ready queue and parks the machine on idle before reporting failure.
    pub(crate) fn add_kernel_page(&mut self, vpn: usize, prot: Prot) -> Result<(), KernelError> {
        if vpn >= Config::MAX_PT_LEN {
            return Err(KernelError::BadAddress((vpn * Config::PAGE_SIZE) as u32));
        }
        if !self.machine.vm_enabled() {
            self.frames.mark_used(vpn);
            self.kernel_table
                .borrow_mut()
                .set(vpn, Pte::mapped(vpn, prot));
            trace!("kernel page {} identity mapped", vpn);
            return Ok(());
        }
        let pfn = match self.frames.alloc() {
            Some(pfn) => pfn,
            None => {
                self.frames_exhausted_fallback();
                return Err(KernelError::OutOfMemory);
            }
        };
        self.kernel_table
            .borrow_mut()
            .set(vpn, Pte::mapped(pfn, prot));
        trace!("kernel page {} mapped to frame {}", vpn, pfn);
        Ok(())
    }

    /// Out of frames in the middle of table maintenance: everything
    /// runnable is dropped from ready and idle takes the CPU.
    fn frames_exhausted_fallback(&mut self) {
        warn!("no free frames during kernel table maintenance; idling the machine");
        for pid in self.ready.snapshot() {
            self.ready.remove(pid);
        }
        let idle = self.idle_pid;
        if idle >= 0 && self.running != idle {
            let from = self.running;
            self.context_switch(Some(from), idle);
            self.install_running_user_table();
        }
    }

    /// Move the kernel break. Rounds the address up to a page boundary,
    /// then maps fresh read-write pages when growing or zeroes and unmaps
    /// when shrinking. Shrinking below the boot break, or growing within
    /// one page of the kernel stack, is refused. Before VM is enabled only
    /// identity-mapped growth is possible.
    pub fn set_kernel_brk(&mut self, addr: u32) -> Result<(), KernelError> {
        let new_brk = (addr as usize).div_ceil(Config::PAGE_SIZE);
        debug!(
            "kernel brk: page {} -> page {} (vm {})",
            self.kernel_brk_page,
            new_brk,
            self.machine.vm_enabled()
        );

        if !self.machine.vm_enabled() {
            if new_brk < self.kernel_brk_page {
                return Err(KernelError::BadBreak);
            }
            for vpn in self.kernel_brk_page..new_brk {
                self.add_kernel_page(vpn, Prot::read_write())?;
            }
            self.kernel_brk_page = new_brk;
            return Ok(());
        }

        if new_brk >= self.kernel_brk_page {
            // The two scratch slots below the stack must stay unmapped.
            if new_brk > Config::SCRATCH_BASE_PAGE {
                warn!("kernel brk would run into the kernel stack");
                return Err(KernelError::BadBreak);
            }
            for vpn in self.kernel_brk_page..new_brk {
                self.add_kernel_page(vpn, Prot::read_write())?;
            }
        } else {
            if new_brk < self.orig_kernel_brk_page {
                warn!("kernel brk below the boot break");
                return Err(KernelError::BadBreak);
            }
            // Zero the physical contents on the way out.
            let mut freed = Vec::new();
            {
                let mut table = self.kernel_table.borrow_mut();
                for vpn in new_brk..self.kernel_brk_page {
                    let pte = table.entry(vpn);
                    if pte.valid {
                        table.clear(vpn);
                        freed.push(pte.pfn);
                    }
                }
            }
            for pfn in freed {
                self.machine.zero_frame(pfn);
                self.frames.free(pfn);
            }
            self.machine.flush_tlb(Region::Kernel);
        }
        self.kernel_brk_page = new_brk;
        Ok(())
    }

    /// Copy one user page of the running process into `dest_pfn` through a
    /// transient mapping in the first free kernel slot.
    pub(crate) fn copy_user_page_to_frame(
        &mut self,
        user_vpn: usize,
        dest_pfn: usize,
    ) -> Result<(), KernelError> {
        let scratch_vpn = self
            .kernel_table
            .borrow()
            .first_invalid()
            .ok_or(KernelError::OutOfMemory)?;
        self.kernel_table
            .borrow_mut()
            .set(scratch_vpn, Pte::mapped(dest_pfn, Prot::read_write()));

        let src_va = Config::VMEM_1_BASE + (user_vpn * Config::PAGE_SIZE) as u32;
        let dst_va = (scratch_vpn * Config::PAGE_SIZE) as u32;
        let mut page = vec![0u8; Config::PAGE_SIZE];
        let result = self
            .machine
            .read_virtual(src_va, &mut page)
            .and_then(|_| self.machine.write_virtual(dst_va, &page));

        self.kernel_table.borrow_mut().clear(scratch_vpn);
        self.machine.flush_tlb(Region::Kernel);
        result.map_err(KernelError::from)
    }

    /// Tear down a process's user address space, freeing every frame.
    pub(crate) fn free_user_pages(&mut self, pid: Pid) {
        let table = self.pcb_ref(pid).page_table.clone();
        let valid: Vec<(usize, Pte)> = table.borrow().valid_entries().collect();
        {
            let mut t = table.borrow_mut();
            for (vpn, _) in &valid {
                t.clear(*vpn);
            }
        }
        for (_, pte) in valid {
            self.frames.free(pte.pfn);
        }
        self.machine.flush_tlb(Region::User);
    }
}
