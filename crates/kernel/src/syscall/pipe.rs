//! Pipe syscalls over the fixed-size ring.

use log::debug;

use super::ret;
use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::objects::Pipe;
use crate::pcb::{BlockReason, Pid};

pub fn sys_pipe_init(k: &mut Kernel, caller: Pid) {
    let result = do_pipe_init(k, caller);
    ret(k, caller, result);
}

fn do_pipe_init(k: &mut Kernel, caller: Pid) -> Result<i32, KernelError> {
    let id_ptr = k.pcb_ref(caller).uc.regs[0] as u32;
    let id = k.next_pipe_id;
    k.next_pipe_id -= 1;
    k.write_user_i32(id_ptr, id)?;
    k.pipes.push(Pipe::new(id));
    debug!("pid {} created pipe {}", caller, id);
    Ok(0)
}

pub fn sys_pipe_read(k: &mut Kernel, caller: Pid) {
    let (id, len) = {
        let uc = &k.pcb_ref(caller).uc;
        (uc.regs[0], uc.regs[2])
    };
    if len < 0 {
        ret(k, caller, Err(KernelError::InvalidArgument("negative length")));
        return;
    }
    let readable = match k.pipe(id) {
        Some(pipe) => pipe.readable_len(),
        None => {
            ret(k, caller, Err(KernelError::NoSuchObject(id)));
            return;
        }
    };
    if readable == 0 {
        debug!("pid {} blocks reading empty pipe {}", caller, id);
        k.block_running(BlockReason::PipeRead { pipe_id: id });
        return;
    }
    let result = copy_out(k, caller, id);
    ret(k, caller, result);
}

/// Deliver up to `len` bytes into the caller's buffer, wrap-around and
/// all. Shared between the immediate path and resumption after a wake;
/// the readable length is re-examined here, so a reader that lost the
/// race to another consumer simply gets zero bytes.
fn copy_out(k: &mut Kernel, caller: Pid, id: i32) -> Result<i32, KernelError> {
    let (buf, len) = {
        let uc = &k.pcb_ref(caller).uc;
        (uc.regs[1] as u32, uc.regs[2] as usize)
    };
    let data = match k.pipe_mut(id) {
        Some(pipe) => pipe.read(len),
        None => return Err(KernelError::NoSuchObject(id)),
    };
    k.write_user(buf, &data)?;
    Ok(data.len() as i32)
}

pub fn finish_pipe_read(k: &mut Kernel, pid: Pid, pipe_id: i32) -> bool {
    let result = copy_out(k, pid, pipe_id);
    ret(k, pid, result);
    false
}

pub fn sys_pipe_write(k: &mut Kernel, caller: Pid) {
    let result = do_pipe_write(k, caller);
    ret(k, caller, result);
}

/// Write the whole buffer or nothing: a write that would fill the ring
/// fails outright. Blocked readers are woken by the clock handler once
/// the indices diverge.
fn do_pipe_write(k: &mut Kernel, caller: Pid) -> Result<i32, KernelError> {
    let (id, buf, len) = {
        let uc = &k.pcb_ref(caller).uc;
        (uc.regs[0], uc.regs[1] as u32, uc.regs[2])
    };
    if len < 0 {
        return Err(KernelError::InvalidArgument("negative length"));
    }
    let data = k.read_user(buf, len as usize)?;
    let pipe = k.pipe_mut(id).ok_or(KernelError::NoSuchObject(id))?;
    pipe.write(&data).map_err(|_| KernelError::PipeFull(id))?;
    debug!("pid {} wrote {} bytes to pipe {}", caller, len, id);
    Ok(len)
}
