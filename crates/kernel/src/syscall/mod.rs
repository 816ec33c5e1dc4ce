//! Syscall dispatch and the per-family implementations.

pub mod pipe;
pub mod process;
pub mod sync;
pub mod tty;

use hardware::syscall as codes;
use log::{debug, warn};

use crate::config::Config;
use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::pcb::Pid;

/// Dispatch on the syscall code saved in the caller's context. The caller
/// pid is captured up front; blocking syscalls switch away and `running`
/// names somebody else by the time they return.
pub fn dispatch(k: &mut Kernel) {
    let caller = k.running;
    let code = k.pcb_ref(caller).uc.code;
    debug!("pid {} syscall {}", caller, code);
    match code {
        codes::FORK => process::sys_fork(k, caller),
        codes::EXEC => process::sys_exec(k, caller),
        codes::EXIT => process::sys_exit(k, caller),
        codes::WAIT => process::sys_wait(k, caller),
        codes::GETPID => process::sys_getpid(k, caller),
        codes::BRK => process::sys_brk(k, caller),
        codes::DELAY => process::sys_delay(k, caller),
        codes::TTY_READ => tty::sys_tty_read(k, caller),
        codes::TTY_WRITE => tty::sys_tty_write(k, caller),
        codes::PIPE_INIT => pipe::sys_pipe_init(k, caller),
        codes::PIPE_READ => pipe::sys_pipe_read(k, caller),
        codes::PIPE_WRITE => pipe::sys_pipe_write(k, caller),
        codes::LOCK_INIT => sync::sys_lock_init(k, caller),
        codes::LOCK_ACQUIRE => sync::sys_lock_acquire(k, caller),
        codes::LOCK_RELEASE => sync::sys_lock_release(k, caller),
        codes::CVAR_INIT => sync::sys_cvar_init(k, caller),
        codes::CVAR_SIGNAL => sync::sys_cvar_signal(k, caller),
        codes::CVAR_BROADCAST => sync::sys_cvar_broadcast(k, caller),
        codes::CVAR_WAIT => sync::sys_cvar_wait(k, caller),
        codes::RECLAIM => sync::sys_reclaim(k, caller),
        other => {
            warn!("pid {}: unrecognized syscall code {}", caller, other);
            k.set_user_return(caller, Config::ERROR);
        }
    }
}

/// Fold a syscall result into the caller's return register.
pub(crate) fn ret(k: &mut Kernel, caller: Pid, result: Result<i32, KernelError>) {
    match result {
        Ok(value) => k.set_user_return(caller, value),
        Err(e) => {
            warn!("pid {}: syscall failed: {}", caller, e);
            k.set_user_return(caller, Config::ERROR);
        }
    }
}
