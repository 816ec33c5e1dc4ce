//! Program loading: tears down whatever address space a PCB has and maps a
//! fresh one from a program image in the machine's store.
//!
//! Layout, in address order: text (read+execute) from the bottom of the
//! user region, data (read+write) right behind it, a hole, and the stack
//! at the top. The argument vector is packed as NUL-separated strings at
//! the very top of the stack with the stack pointer set just below.

use hardware::{PageTableRef, Prot, Pte, Region, NUM_REGS};
use log::debug;

use crate::config::Config;
use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::pcb::Pid;

/// Upper bound on the packed argv block so the stack pointer keeps room.
const ARG_BLOCK_MAX: usize = Config::PAGE_SIZE / 2;

pub fn load_program(
    k: &mut Kernel,
    pid: Pid,
    path: &str,
    args: &[String],
) -> Result<(), KernelError> {
    debug!("loading '{}' into pid {}", path, pid);
    let image = k
        .machine
        .program(path)
        .ok_or_else(|| KernelError::NoSuchProgram(path.to_string()))?;

    // The old address space goes away first; a load failure past this
    // point leaves the caller without one.
    k.free_user_pages(pid);

    let table = k.pcb_ref(pid).page_table.clone();
    let text_pages = image.text.len().div_ceil(Config::PAGE_SIZE).max(1);
    let data_pages = image.data.len().div_ceil(Config::PAGE_SIZE).max(1);

    map_segment(k, &table, 0, text_pages, &image.text, Prot::read_exec())?;
    map_segment(
        k,
        &table,
        text_pages,
        data_pages,
        &image.data,
        Prot::read_write(),
    )?;

    for j in 0..Config::USER_STACK_PAGES {
        let vpn = Config::MAX_PT_LEN - 1 - j;
        let frame = k.frames.alloc().ok_or(KernelError::OutOfMemory)?;
        k.machine.zero_frame(frame);
        table
            .borrow_mut()
            .set(vpn, Pte::mapped(frame, Prot::read_write()));
    }

    {
        let pcb = k.pcb_mut(pid);
        pcb.last_user_data_page = text_pages + data_pages - 1;
        pcb.brk = text_pages + data_pages;
        pcb.last_user_stack_page = Config::MAX_PT_LEN - Config::USER_STACK_PAGES;
    }

    // Pack argv at the top of the stack. Callers have this PCB's table
    // installed, so the write goes through region 1.
    let mut block: Vec<u8> = Vec::new();
    for arg in args {
        block.extend_from_slice(arg.as_bytes());
        block.push(0);
    }
    if block.is_empty() {
        block.push(0);
    }
    block.truncate(ARG_BLOCK_MAX);
    let argv_base = (Config::VMEM_1_LIMIT - block.len() as u32) & !7;
    k.write_user(argv_base, &block)?;

    {
        let pcb = k.pcb_mut(pid);
        pcb.uc.pc = Config::VMEM_1_BASE + image.entry;
        pcb.uc.sp = (argv_base - 8) & !7;
        pcb.uc.regs = [0; NUM_REGS];
        pcb.uc.regs[0] = args.len() as i32;
        pcb.uc.regs[1] = argv_base as i32;
    }
    k.machine.flush_tlb(Region::User);
    debug!(
        "pid {}: '{}' loaded ({} text + {} data pages)",
        pid, path, text_pages, data_pages
    );
    Ok(())
}

/// Map `pages` fresh frames at `first_vpn` and copy the segment bytes in.
fn map_segment(
    k: &mut Kernel,
    table: &PageTableRef,
    first_vpn: usize,
    pages: usize,
    bytes: &[u8],
    prot: Prot,
) -> Result<(), KernelError> {
    for i in 0..pages {
        let frame = k.frames.alloc().ok_or(KernelError::OutOfMemory)?;
        k.machine.zero_frame(frame);
        let start = i * Config::PAGE_SIZE;
        if start < bytes.len() {
            let end = (start + Config::PAGE_SIZE).min(bytes.len());
            k.machine.write_frame(frame, 0, &bytes[start..end]);
        }
        table.borrow_mut().set(first_vpn + i, Pte::mapped(frame, prot));
    }
    Ok(())
}
