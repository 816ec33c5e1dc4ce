//! Locks, condition variables, and reclaim.
//!
//! Release policy: a released lock is not handed to anyone. The oldest
//! waiter moves to ready and re-runs the acquire path when dispatched, so
//! an intervening acquirer can win the lock first.

use log::{debug, warn};

use super::ret;
use crate::config::Config;
use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::objects::{kind_of, Cvar, Lock, ObjectKind};
use crate::pcb::{BlockReason, Pid};

// ---- locks ---------------------------------------------------------------

pub fn sys_lock_init(k: &mut Kernel, caller: Pid) {
    let result = do_lock_init(k, caller);
    ret(k, caller, result);
}

fn do_lock_init(k: &mut Kernel, caller: Pid) -> Result<i32, KernelError> {
    let id_ptr = k.pcb_ref(caller).uc.regs[0] as u32;
    let id = k.next_lock_id;
    k.next_lock_id += 2;
    k.write_user_i32(id_ptr, id)?;
    k.locks.push(Lock::new(id));
    debug!("pid {} created lock {}", caller, id);
    Ok(0)
}

/// Take the lock if it is free, otherwise join its wait list. Returns
/// true when the caller blocked. Shared with the cvar-wait reacquire.
fn acquire_or_block(k: &mut Kernel, caller: Pid, lock_id: i32) -> bool {
    let held = match k.lock(lock_id) {
        Some(lock) => lock.held,
        None => {
            // The lock can be reclaimed while a cvar waiter was asleep.
            warn!("pid {}: lock {} vanished before reacquire", caller, lock_id);
            k.set_user_return(caller, Config::ERROR);
            return false;
        }
    };
    if !held {
        if let Some(lock) = k.lock_mut(lock_id) {
            lock.held = true;
        }
        k.pcb_mut(caller).held_lock = Some(lock_id);
        false
    } else {
        k.pcb_mut(caller).held_lock = None;
        k.pcb_mut(caller).block_reason = Some(BlockReason::LockWait { lock_id });
        if let Some(lock) = k.lock_mut(lock_id) {
            lock.waiting.push_head(caller);
        }
        debug!("pid {} waits on lock {}", caller, lock_id);
        true
    }
}

pub fn sys_lock_acquire(k: &mut Kernel, caller: Pid) {
    let lock_id = k.pcb_ref(caller).uc.regs[0];
    if k.lock(lock_id).is_none() {
        ret(k, caller, Err(KernelError::NoSuchObject(lock_id)));
        return;
    }
    if acquire_or_block(k, caller, lock_id) {
        k.dispatch();
    } else {
        k.set_user_return(caller, 0);
    }
}

/// Resumption half of acquire: compete for the lock again; an intervening
/// caller may have taken it, in which case the waiter goes back to sleep.
pub fn finish_acquire(k: &mut Kernel, pid: Pid, lock_id: i32) -> bool {
    if acquire_or_block(k, pid, lock_id) {
        true
    } else {
        k.set_user_return(pid, 0);
        false
    }
}

pub fn sys_lock_release(k: &mut Kernel, caller: Pid) {
    let result = do_lock_release(k, caller);
    ret(k, caller, result);
}

fn do_lock_release(k: &mut Kernel, caller: Pid) -> Result<i32, KernelError> {
    let lock_id = k.pcb_ref(caller).uc.regs[0];
    if k.pcb_ref(caller).held_lock != Some(lock_id) {
        return Err(KernelError::NotOwner(lock_id));
    }
    let waiter = {
        let lock = k
            .lock_mut(lock_id)
            .ok_or(KernelError::NoSuchObject(lock_id))?;
        lock.held = false;
        let waiter = lock.waiting.tail();
        if let Some(w) = waiter {
            lock.waiting.remove(w);
        }
        waiter
    };
    k.pcb_mut(caller).held_lock = None;
    if let Some(w) = waiter {
        debug!("lock {} released; pid {} moves to ready", lock_id, w);
        k.enqueue_ready(w);
    }
    Ok(0)
}

/// Exit-path release: the dying holder cannot answer errors, so this just
/// clears the held bit and frees the oldest waiter.
pub fn release_on_exit(k: &mut Kernel, pid: Pid, lock_id: i32) {
    warn!("pid {} exits still holding lock {}", pid, lock_id);
    let waiter = match k.lock_mut(lock_id) {
        Some(lock) => {
            lock.held = false;
            let waiter = lock.waiting.tail();
            if let Some(w) = waiter {
                lock.waiting.remove(w);
            }
            waiter
        }
        None => None,
    };
    k.pcb_mut(pid).held_lock = None;
    if let Some(w) = waiter {
        k.enqueue_ready(w);
    }
}

// ---- condition variables -------------------------------------------------

pub fn sys_cvar_init(k: &mut Kernel, caller: Pid) {
    let result = do_cvar_init(k, caller);
    ret(k, caller, result);
}

fn do_cvar_init(k: &mut Kernel, caller: Pid) -> Result<i32, KernelError> {
    let id_ptr = k.pcb_ref(caller).uc.regs[0] as u32;
    let id = k.next_cvar_id;
    k.next_cvar_id += 2;
    k.write_user_i32(id_ptr, id)?;
    k.cvars.push(Cvar::new(id));
    debug!("pid {} created cvar {}", caller, id);
    Ok(0)
}

pub fn sys_cvar_signal(k: &mut Kernel, caller: Pid) {
    let result = do_cvar_signal(k, caller, false);
    ret(k, caller, result);
}

pub fn sys_cvar_broadcast(k: &mut Kernel, caller: Pid) {
    let result = do_cvar_signal(k, caller, true);
    ret(k, caller, result);
}

/// Wake the oldest waiter, or every waiter in insertion order.
fn do_cvar_signal(k: &mut Kernel, caller: Pid, broadcast: bool) -> Result<i32, KernelError> {
    let cvar_id = k.pcb_ref(caller).uc.regs[0];
    if kind_of(cvar_id) != Some(ObjectKind::Cvar) {
        return Err(KernelError::NoSuchObject(cvar_id));
    }
    loop {
        let waiter = {
            let cvar = k
                .cvar_mut(cvar_id)
                .ok_or(KernelError::NoSuchObject(cvar_id))?;
            let waiter = cvar.waiting.tail();
            if let Some(w) = waiter {
                cvar.waiting.remove(w);
            }
            waiter
        };
        let Some(w) = waiter else { break };
        debug!("cvar {}: pid {} moves to ready", cvar_id, w);
        k.enqueue_ready(w);
        if !broadcast {
            break;
        }
    }
    Ok(0)
}

pub fn sys_cvar_wait(k: &mut Kernel, caller: Pid) {
    let (cvar_id, lock_id) = {
        let uc = &k.pcb_ref(caller).uc;
        (uc.regs[0], uc.regs[1])
    };
    if k.pcb_ref(caller).held_lock != Some(lock_id) {
        ret(k, caller, Err(KernelError::NotOwner(lock_id)));
        return;
    }
    if k.lock(lock_id).is_none() {
        ret(k, caller, Err(KernelError::NoSuchObject(lock_id)));
        return;
    }
    if k.cvar_mut(cvar_id).is_none() {
        ret(k, caller, Err(KernelError::NoSuchObject(cvar_id)));
        return;
    }

    // Release without waking lock waiters: the atomic half of wait.
    if let Some(lock) = k.lock_mut(lock_id) {
        lock.held = false;
    }
    k.pcb_mut(caller).held_lock = None;

    k.pcb_mut(caller).block_reason = Some(BlockReason::CvarWait { cvar_id, lock_id });
    if let Some(cvar) = k.cvar_mut(cvar_id) {
        cvar.waiting.push_head(caller);
    }
    debug!("pid {} waits on cvar {} (lock {})", caller, cvar_id, lock_id);
    k.dispatch();
}

/// Resumption half of cvar wait: take the lock back through the shared
/// acquire path, possibly sleeping on the lock in turn.
pub fn finish_cvar_wait(k: &mut Kernel, pid: Pid, lock_id: i32) -> bool {
    if acquire_or_block(k, pid, lock_id) {
        true
    } else {
        k.set_user_return(pid, 0);
        false
    }
}

// ---- reclaim -------------------------------------------------------------

pub fn sys_reclaim(k: &mut Kernel, caller: Pid) {
    let result = do_reclaim(k, caller);
    ret(k, caller, result);
}

/// Destroy an object, dispatching on the id's kind encoding. Objects with
/// anyone still depending on them are refused.
fn do_reclaim(k: &mut Kernel, caller: Pid) -> Result<i32, KernelError> {
    let id = k.pcb_ref(caller).uc.regs[0];
    match kind_of(id) {
        None => Err(KernelError::InvalidArgument("object id zero")),
        Some(ObjectKind::Pipe) => {
            let reader_blocked = k
                .procs
                .values()
                .any(|p| p.block_reason == Some(BlockReason::PipeRead { pipe_id: id }));
            if reader_blocked {
                return Err(KernelError::Busy(id));
            }
            let pos = k
                .pipes
                .iter()
                .position(|p| p.id == id)
                .ok_or(KernelError::NoSuchObject(id))?;
            k.pipes.remove(pos);
            debug!("pid {} reclaimed pipe {}", caller, id);
            Ok(0)
        }
        Some(ObjectKind::Lock) => {
            if k.pcb_ref(caller).held_lock != Some(id) {
                return Err(KernelError::NotOwner(id));
            }
            let pos = k
                .locks
                .iter()
                .position(|l| l.id == id)
                .ok_or(KernelError::NoSuchObject(id))?;
            if !k.locks[pos].waiting.is_empty() {
                return Err(KernelError::Busy(id));
            }
            k.locks.remove(pos);
            k.pcb_mut(caller).held_lock = None;
            debug!("pid {} reclaimed lock {}", caller, id);
            Ok(0)
        }
        Some(ObjectKind::Cvar) => {
            let pos = k
                .cvars
                .iter()
                .position(|c| c.id == id)
                .ok_or(KernelError::NoSuchObject(id))?;
            if !k.cvars[pos].waiting.is_empty() {
                return Err(KernelError::Busy(id));
            }
            k.cvars.remove(pos);
            debug!("pid {} reclaimed cvar {}", caller, id);
            Ok(0)
        }
    }
}
