//! Boot-state and kernel-break behavior.

mod common;

use common::Harness;
use hardware::{Region, PAGE_SIZE, VMEM_1_BASE, VMEM_1_LIMIT};
use kernel::{Config, KernelError};

#[test]
fn boot_leaves_init_running_and_idle_waiting() {
    let h = Harness::boot();
    assert_eq!(h.running(), h.kernel.init_pid());
    assert_ne!(h.kernel.init_pid(), h.kernel.idle_pid());
    assert!(h.kernel.ready_pids().is_empty());
    assert!(h.kernel.blocked_pids().is_empty());
    h.kernel.check_invariants();

    // Init enters user mode at the bottom of region 1 with a live stack.
    assert_eq!(h.uctxt.pc, VMEM_1_BASE);
    assert!(h.uctxt.sp > VMEM_1_BASE && h.uctxt.sp < VMEM_1_LIMIT);
}

#[test]
fn boot_processes_own_disjoint_kernel_stacks() {
    let h = Harness::boot();
    let init = h.kernel.pcb(h.kernel.init_pid()).unwrap();
    let idle = h.kernel.pcb(h.kernel.idle_pid()).unwrap();
    // Init adopted the fixed boot frames at the top of region 0.
    assert_eq!(
        init.kernel_stack_frames,
        [
            Config::KERNEL_STACK_BASE_PAGE,
            Config::KERNEL_STACK_BASE_PAGE + 1
        ]
    );
    for f in idle.kernel_stack_frames {
        assert!(!init.kernel_stack_frames.contains(&f));
    }
    // The cloned kernel context matches the machine's live one.
    assert_eq!(idle.kc, h.machine.current_kernel_context());
}

#[test]
fn program_image_lands_in_mapped_text_pages() {
    let h = Harness::boot();
    let init = h.kernel.pcb(h.kernel.init_pid()).unwrap();
    let pte = init.page_table.borrow().entry(0);
    assert!(pte.valid && pte.prot.exec && !pte.prot.write);
    let mut byte = [0u8];
    h.machine.read_frame(pte.pfn, 0, &mut byte);
    assert_eq!(byte[0], 0xAA);
    // Layout fields describe text+data followed by the break.
    assert_eq!(init.brk, init.last_user_data_page + 1);
    assert_eq!(
        init.last_user_stack_page,
        Config::MAX_PT_LEN - Config::USER_STACK_PAGES
    );
}

#[test]
fn kernel_break_grows_and_shrinks() {
    let mut h = Harness::boot();
    let orig = h.kernel.kernel_brk_page();
    let frames_before = h.kernel.frames_used();

    let grown = ((orig + 3) * PAGE_SIZE) as u32;
    h.kernel.set_kernel_brk(grown).expect("grow");
    assert_eq!(h.kernel.kernel_brk_page(), orig + 3);
    assert_eq!(h.kernel.frames_used(), frames_before + 3);
    h.kernel.check_invariants();

    let flushes = h.machine.tlb_flushes(Region::Kernel);
    h.kernel.set_kernel_brk((orig * PAGE_SIZE) as u32).expect("shrink");
    assert_eq!(h.kernel.kernel_brk_page(), orig);
    assert_eq!(h.kernel.frames_used(), frames_before);
    assert!(h.machine.tlb_flushes(Region::Kernel) > flushes);
    h.kernel.check_invariants();
}

#[test]
fn kernel_break_refuses_illegal_moves() {
    let mut h = Harness::boot();
    let orig = h.kernel.kernel_brk_page();

    // Below the boot break.
    assert_eq!(
        h.kernel.set_kernel_brk(((orig - 1) * PAGE_SIZE) as u32),
        Err(KernelError::BadBreak)
    );
    // Into the gap guarding the kernel stack.
    assert_eq!(
        h.kernel
            .set_kernel_brk(((Config::SCRATCH_BASE_PAGE + 1) * PAGE_SIZE) as u32),
        Err(KernelError::BadBreak)
    );
    h.kernel.check_invariants();
}

#[test]
fn frame_exhaustion_during_kernel_growth_idles_the_machine() {
    // Just enough frames for boot, nowhere near enough for a huge brk.
    let mut h = Harness::boot_with_memory(132 * PAGE_SIZE);
    let err = h
        .kernel
        .set_kernel_brk((Config::SCRATCH_BASE_PAGE * PAGE_SIZE) as u32)
        .expect_err("growth must exhaust memory");
    assert_eq!(err, KernelError::OutOfMemory);
    // The maintenance-failure policy: ready drained, idle on the CPU.
    assert_eq!(h.kernel.running(), h.kernel.idle_pid());
    assert!(h.kernel.ready_pids().is_empty());
    h.kernel.check_invariants();
}
