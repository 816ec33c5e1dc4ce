//! Process lifecycle syscalls: fork, exec, exit, wait, delay, brk, getpid.

use hardware::{new_table_ref, Prot, Pte, Region};
use log::{debug, info, warn};

use super::ret;
use crate::config::Config;
use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::loader;
use crate::pcb::{BlockReason, Pid};

const EXEC_PATH_MAX: usize = 256;
const EXEC_ARGS_MAX: usize = 16;

pub fn sys_getpid(k: &mut Kernel, caller: Pid) {
    k.set_user_return(caller, caller);
}

// ---- fork ----------------------------------------------------------------

pub fn sys_fork(k: &mut Kernel, caller: Pid) {
    let result = do_fork(k, caller);
    ret(k, caller, result);
}

/// Duplicate the caller: copy every valid user page into fresh frames via
/// a transient kernel mapping, build the child PCB, queue it, then clone
/// the kernel stack into it. The child's saved context already answers 0.
/// A failure part-way unwinds everything the unborn child was given.
fn do_fork(k: &mut Kernel, caller: Pid) -> Result<i32, KernelError> {
    let parent_table = k.pcb_ref(caller).page_table.clone();
    let child_table = new_table_ref(Config::MAX_PT_LEN);
    let parent_pages: Vec<(usize, Pte)> = parent_table.borrow().valid_entries().collect();

    let mut copied: Vec<usize> = Vec::with_capacity(parent_pages.len());
    let mut failure: Option<KernelError> = None;
    for (vpn, pte) in parent_pages {
        let Some(frame) = k.frames.alloc() else {
            failure = Some(KernelError::OutOfMemory);
            break;
        };
        if let Err(e) = k.copy_user_page_to_frame(vpn, frame) {
            k.frames.free(frame);
            failure = Some(e);
            break;
        }
        child_table
            .borrow_mut()
            .set(vpn, Pte::mapped(frame, pte.prot));
        copied.push(frame);
    }
    if let Some(e) = failure {
        for frame in copied {
            k.frames.free(frame);
        }
        return Err(e);
    }

    let mut child_uc = k.pcb_ref(caller).uc.clone();
    child_uc.regs[0] = 0;
    let mut child = match k.initialize_pcb(child_uc, child_table) {
        Ok(child) => child,
        Err(e) => {
            for frame in copied {
                k.frames.free(frame);
            }
            return Err(e);
        }
    };
    {
        let parent = k.pcb_ref(caller);
        child.brk = parent.brk;
        child.last_user_data_page = parent.last_user_data_page;
        child.last_user_stack_page = parent.last_user_stack_page;
    }
    child.parent = Some(caller);
    let child_pid = child.pid;
    k.procs.insert(child_pid, child);
    k.pcb_mut(caller).children.push(child_pid);
    k.enqueue_ready(child_pid);

    // The parent's answer lands before the stack clone, so the cloned
    // stack belongs to a parent that already returned the child's pid.
    k.set_user_return(caller, child_pid);
    k.clone_kernel_stack(child_pid);
    info!("pid {} forked child {}", caller, child_pid);
    Ok(child_pid)
}

// ---- exec ----------------------------------------------------------------

pub fn sys_exec(k: &mut Kernel, caller: Pid) {
    let result = do_exec(k, caller);
    ret(k, caller, result);
}

/// Reload the caller with a new program image. On failure the old address
/// space is already gone; the caller gets ERROR and keeps running on
/// whatever is left, which is the accepted limitation.
fn do_exec(k: &mut Kernel, caller: Pid) -> Result<i32, KernelError> {
    let (path_ptr, argv_ptr) = {
        let uc = &k.pcb_ref(caller).uc;
        (uc.regs[0] as u32, uc.regs[1] as u32)
    };
    let path = k.read_user_cstring(path_ptr, EXEC_PATH_MAX)?;
    let mut args = Vec::new();
    if argv_ptr != 0 {
        for i in 0..EXEC_ARGS_MAX {
            let p = k.machine.read_virtual_u32(argv_ptr + (i * 4) as u32)?;
            if p == 0 {
                break;
            }
            args.push(k.read_user_cstring(p, EXEC_PATH_MAX)?);
        }
    }
    if args.is_empty() {
        args.push(path.clone());
    }
    loader::load_program(k, caller, &path, &args)?;
    Ok(0)
}

// ---- exit and wait -------------------------------------------------------

pub fn sys_exit(k: &mut Kernel, caller: Pid) {
    let status = k.pcb_ref(caller).uc.regs[0];
    if k.pcb_ref(caller).status != Config::ERROR {
        k.pcb_mut(caller).status = status;
    }
    exit_current(k, caller);
}

/// Teardown and defunct handoff. Also the landing path for fatal faults,
/// which set `status = ERROR` before calling in. The boot init exiting
/// halts the machine outright.
pub fn exit_current(k: &mut Kernel, pid: Pid) {
    if pid == k.init_pid {
        info!("init exited; halting the machine");
        k.machine.halt();
        return;
    }
    info!("pid {} exits with status {}", pid, k.pcb_ref(pid).status);

    k.machine.retire_pid(pid);
    k.free_user_pages(pid);

    // Dying while holding a lock would leave a held bit nobody can clear.
    if let Some(lock_id) = k.pcb_ref(pid).held_lock {
        super::sync::release_on_exit(k, pid, lock_id);
    }

    // Children outlive the parent as orphans.
    let children = std::mem::take(&mut k.pcb_mut(pid).children);
    for child in children {
        if let Some(pcb) = k.procs.get_mut(&child) {
            pcb.parent = None;
        }
    }

    if k.pcb_ref(pid).parent.is_none() {
        k.destroy_pcb(pid);
    } else {
        // The parent reaps this later; the clock handler wakes it.
        k.defunct.push_head(pid);
    }
    k.dispatch();
}

pub fn sys_wait(k: &mut Kernel, caller: Pid) {
    if k.pcb_ref(caller).children.is_empty() {
        ret(k, caller, Err(KernelError::NoChildren));
        return;
    }
    if try_reap(k, caller) {
        return;
    }
    k.block_running(BlockReason::Wait);
}

/// Scan defunct (oldest first) for a child of `parent`. Reaping copies the
/// status out, returns the child pid, and frees the corpse.
fn try_reap(k: &mut Kernel, parent: Pid) -> bool {
    for pid in k.defunct.snapshot().into_iter().rev() {
        let is_child = k
            .procs
            .get(&pid)
            .map_or(false, |p| p.parent == Some(parent));
        if !is_child {
            continue;
        }
        let status = k.pcb_ref(pid).status;
        let status_ptr = k.pcb_ref(parent).uc.regs[0] as u32;
        if let Err(e) = k.write_user_i32(status_ptr, status) {
            warn!("pid {}: bad wait status pointer: {}", parent, e);
            k.set_user_return(parent, Config::ERROR);
            return true;
        }
        k.defunct.remove(pid);
        k.destroy_pcb(pid);
        k.pcb_mut(parent).children.retain(|&c| c != pid);
        k.set_user_return(parent, pid);
        debug!("pid {} reaped child {} (status {})", parent, pid, status);
        return true;
    }
    false
}

/// Resumption half of wait: the clock handler saw a defunct child.
pub fn finish_wait(k: &mut Kernel, pid: Pid) -> bool {
    if try_reap(k, pid) {
        false
    } else {
        k.pcb_mut(pid).block_reason = Some(BlockReason::Wait);
        k.blocked.push_head(pid);
        true
    }
}

// ---- delay ---------------------------------------------------------------

pub fn sys_delay(k: &mut Kernel, caller: Pid) {
    let ticks = k.pcb_ref(caller).uc.regs[0];
    if ticks < 0 {
        ret(k, caller, Err(KernelError::InvalidArgument("negative delay")));
    } else if ticks == 0 {
        k.set_user_return(caller, 0);
    } else {
        debug!("pid {} delays for {} ticks", caller, ticks);
        k.block_running(BlockReason::Delay { ticks });
    }
}

// ---- brk -----------------------------------------------------------------

pub fn sys_brk(k: &mut Kernel, caller: Pid) {
    let result = do_brk(k, caller);
    ret(k, caller, result);
}

fn do_brk(k: &mut Kernel, caller: Pid) -> Result<i32, KernelError> {
    let addr = k.pcb_ref(caller).uc.regs[0] as u32;
    if addr < Config::VMEM_1_BASE || addr >= Config::VMEM_1_LIMIT {
        return Err(KernelError::BadAddress(addr));
    }
    let page = ((addr - Config::VMEM_1_BASE) as usize).div_ceil(Config::PAGE_SIZE);
    let (last_data, last_stack, brk) = {
        let pcb = k.pcb_ref(caller);
        (
            pcb.last_user_data_page,
            pcb.last_user_stack_page,
            pcb.brk,
        )
    };
    if page <= last_data || page >= last_stack {
        return Err(KernelError::BadBreak);
    }

    let table = k.pcb_ref(caller).page_table.clone();
    if page > brk {
        let mut mapped: Vec<(usize, usize)> = Vec::new();
        for vpn in brk..page {
            let Some(frame) = k.frames.alloc() else {
                for (vpn, frame) in mapped {
                    table.borrow_mut().clear(vpn);
                    k.frames.free(frame);
                }
                return Err(KernelError::OutOfMemory);
            };
            k.machine.zero_frame(frame);
            table
                .borrow_mut()
                .set(vpn, Pte::mapped(frame, Prot::read_write()));
            mapped.push((vpn, frame));
        }
    } else if page < brk {
        let mut freed = Vec::new();
        {
            let mut t = table.borrow_mut();
            for vpn in page..brk {
                let pte = t.entry(vpn);
                if pte.valid {
                    t.clear(vpn);
                    freed.push(pte.pfn);
                }
            }
        }
        for frame in freed {
            k.frames.free(frame);
        }
        k.machine.flush_tlb(Region::User);
    }
    k.pcb_mut(caller).brk = page;
    debug!("pid {} break moved to page {}", caller, page);
    Ok(0)
}
