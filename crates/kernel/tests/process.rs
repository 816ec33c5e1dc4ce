//! Process lifecycle: fork, exec, exit, wait, delay, brk, getpid, and the
//! fatal-trap paths.

mod common;

use common::Harness;
use hardware::{syscall, TrapVector, PAGE_SIZE, VMEM_1_BASE};
use kernel::Config;

#[test]
fn getpid_names_the_running_process() {
    let mut h = Harness::boot();
    let rv = h.syscall(syscall::GETPID, &[]);
    assert_eq!(rv, h.kernel.init_pid());
}

#[test]
fn fork_returns_child_pid_to_parent_and_zero_to_child() {
    let mut h = Harness::boot();
    let init = h.kernel.init_pid();

    let child = h.syscall(syscall::FORK, &[]);
    assert!(child > 0);
    assert_eq!(h.running(), init, "parent keeps the CPU through fork");
    assert_eq!(h.kernel.ready_pids(), vec![child]);

    let child_pcb = h.kernel.pcb(child).expect("child exists");
    assert_eq!(child_pcb.parent, Some(init));
    assert_eq!(
        h.kernel.pcb(init).unwrap().children,
        vec![child],
        "parent records the child"
    );

    // Next tick rotates the child in; it observes 0.
    h.run_until_running(child);
    assert_eq!(h.uctxt.regs[0], 0);
}

#[test]
fn fork_duplicates_user_memory_into_fresh_frames() {
    let mut h = Harness::boot();
    let init = h.kernel.init_pid();

    let marker = h.user_scratch(16);
    h.write_user(marker, b"copy-on-fork-no");

    let child = h.syscall(syscall::FORK, &[]);
    let parent_table = h.kernel.pcb(init).unwrap().page_table.clone();
    let child_table = h.kernel.pcb(child).unwrap().page_table.clone();

    for vpn in 0..Config::MAX_PT_LEN {
        let p = parent_table.borrow().entry(vpn);
        let c = child_table.borrow().entry(vpn);
        assert_eq!(p.valid, c.valid, "page {} validity differs", vpn);
        if !p.valid {
            continue;
        }
        assert_eq!(p.prot, c.prot);
        assert_ne!(p.pfn, c.pfn, "page {} shares a frame", vpn);
        let mut pb = vec![0u8; PAGE_SIZE];
        let mut cb = vec![0u8; PAGE_SIZE];
        h.machine.read_frame(p.pfn, 0, &mut pb);
        h.machine.read_frame(c.pfn, 0, &mut cb);
        assert_eq!(pb, cb, "page {} content differs", vpn);
    }
}

#[test]
fn exec_reloads_the_caller_with_a_new_image() {
    let mut h = Harness::boot();
    let child = h.syscall(syscall::FORK, &[]);
    h.run_until_running(child);

    let path = h.user_scratch(32);
    h.write_user(path, b"test/echo\0");
    let rv = h.syscall(syscall::EXEC, &[path as i32, 0]);
    assert_eq!(rv, 0);

    // Fresh image: pc back at the region base, echo's text in page 0.
    assert_eq!(h.uctxt.pc, VMEM_1_BASE);
    let pcb = h.kernel.pcb(child).unwrap();
    assert_eq!(pcb.brk, 2, "one text page plus one data page");
    let pte = pcb.page_table.borrow().entry(0);
    let mut byte = [0u8];
    h.machine.read_frame(pte.pfn, 0, &mut byte);
    assert_eq!(byte[0], 0xDD);
}

#[test]
fn exec_of_a_missing_image_fails_without_killing_the_caller() {
    let mut h = Harness::boot();
    let path = h.user_scratch(32);
    h.write_user(path, b"test/absent\0");
    let rv = h.syscall(syscall::EXEC, &[path as i32, 0]);
    assert_eq!(rv, Config::ERROR);
    assert_eq!(h.running(), h.kernel.init_pid());
}

#[test]
fn wait_with_no_children_fails() {
    let mut h = Harness::boot();
    let status_ptr = h.user_scratch(4);
    assert_eq!(h.syscall(syscall::WAIT, &[status_ptr as i32]), Config::ERROR);
}

#[test]
fn wait_reaps_an_already_defunct_child() {
    let mut h = Harness::boot();
    let init = h.kernel.init_pid();
    let child = h.syscall(syscall::FORK, &[]);

    h.run_until_running(child);
    h.syscall(syscall::EXIT, &[42]);
    assert_eq!(h.kernel.defunct_pids(), vec![child]);

    h.run_until_running(init);
    let status_ptr = h.user_scratch(4);
    let rv = h.syscall(syscall::WAIT, &[status_ptr as i32]);
    assert_eq!(rv, child);
    assert_eq!(h.read_user_i32(status_ptr), 42);
    assert!(h.kernel.defunct_pids().is_empty());
    assert!(h.kernel.pcb(child).is_none(), "corpse freed after reaping");
    assert!(h.kernel.pcb(init).unwrap().children.is_empty());
}

#[test]
fn wait_blocks_until_a_child_exits() {
    let mut h = Harness::boot();
    let init = h.kernel.init_pid();
    let child = h.syscall(syscall::FORK, &[]);

    let status_ptr = h.user_scratch(4);
    h.syscall(syscall::WAIT, &[status_ptr as i32]);
    assert_ne!(h.running(), init, "waiter gave up the CPU");
    assert!(h.kernel.blocked_pids().contains(&init));

    h.run_until_running(child);
    h.syscall(syscall::EXIT, &[7]);

    // The clock handler notices the defunct child and revives the waiter.
    h.run_until_running(init);
    assert_eq!(h.uctxt.regs[0], child, "wait answers the child pid");
    assert_eq!(h.read_user_i32(status_ptr), 7);
}

#[test]
fn exit_of_an_orphan_frees_everything() {
    let mut h = Harness::boot();
    let init = h.kernel.init_pid();
    let child = h.syscall(syscall::FORK, &[]);
    let grandchild = {
        h.run_until_running(child);
        let g = h.syscall(syscall::FORK, &[]);
        assert!(g > 0);
        g
    };

    // Child dies first: grandchild is orphaned, child turns defunct.
    h.syscall(syscall::EXIT, &[0]);
    assert_eq!(h.kernel.pcb(grandchild).unwrap().parent, None);
    assert!(h.kernel.defunct_pids().contains(&child));

    // The orphan's exit destroys it outright.
    let frames_before = h.kernel.frames_used();
    h.run_until_running(grandchild);
    h.syscall(syscall::EXIT, &[0]);
    assert!(h.kernel.pcb(grandchild).is_none());
    assert!(!h.kernel.defunct_pids().contains(&grandchild));
    assert!(h.kernel.frames_used() < frames_before);
    // Init can still reap the defunct child.
    h.run_until_running(init);
    let status_ptr = h.user_scratch(4);
    assert_eq!(h.syscall(syscall::WAIT, &[status_ptr as i32]), child);
}

#[test]
fn init_exiting_halts_the_machine() {
    let mut h = Harness::boot();
    h.syscall(syscall::EXIT, &[0]);
    assert!(h.machine.is_halted());
}

#[test]
fn delay_counts_clock_traps() {
    let mut h = Harness::boot();
    let init = h.kernel.init_pid();

    assert_eq!(h.syscall(syscall::DELAY, &[-2]), Config::ERROR);
    assert_eq!(h.syscall(syscall::DELAY, &[0]), 0);
    assert_eq!(h.running(), init, "zero delay returns immediately");

    h.syscall(syscall::DELAY, &[3]);
    assert_eq!(h.running(), h.kernel.idle_pid());
    for _ in 0..2 {
        h.tick();
        assert_ne!(h.running(), init, "woke before the delay expired");
    }
    h.tick();
    assert_eq!(h.running(), init);
    assert_eq!(h.uctxt.regs[0], 0, "delay answers 0 on expiry");
}

#[test]
fn brk_grows_and_shrinks_the_user_heap() {
    let mut h = Harness::boot();
    let init = h.kernel.init_pid();
    let brk0 = h.kernel.pcb(init).unwrap().brk;
    let frames0 = h.kernel.frames_used();

    let grown = VMEM_1_BASE + ((brk0 + 2) * PAGE_SIZE) as u32;
    assert_eq!(h.syscall(syscall::BRK, &[grown as i32]), 0);
    assert_eq!(h.kernel.pcb(init).unwrap().brk, brk0 + 2);
    assert_eq!(h.kernel.frames_used(), frames0 + 2);

    // The new pages are writable user memory.
    let heap_addr = VMEM_1_BASE + (brk0 * PAGE_SIZE) as u32;
    h.write_user(heap_addr, b"heap bytes");
    assert_eq!(h.read_user(heap_addr, 10), b"heap bytes");

    let shrunk = VMEM_1_BASE + ((brk0 + 1) * PAGE_SIZE) as u32;
    assert_eq!(h.syscall(syscall::BRK, &[shrunk as i32]), 0);
    assert_eq!(h.kernel.frames_used(), frames0 + 1);
}

#[test]
fn brk_rejects_text_and_stack_collisions() {
    let mut h = Harness::boot();
    // Into the data pages.
    assert_eq!(
        h.syscall(syscall::BRK, &[(VMEM_1_BASE + 1) as i32]),
        Config::ERROR
    );
    // At the stack.
    let into_stack =
        VMEM_1_BASE + ((Config::MAX_PT_LEN - Config::USER_STACK_PAGES) * PAGE_SIZE) as u32;
    assert_eq!(h.syscall(syscall::BRK, &[into_stack as i32]), Config::ERROR);
    // Outside region 1 entirely.
    assert_eq!(h.syscall(syscall::BRK, &[16]), Config::ERROR);
}

#[test]
fn illegal_and_math_traps_kill_the_running_process() {
    let mut h = Harness::boot();
    let init = h.kernel.init_pid();

    let a = h.syscall(syscall::FORK, &[]);
    h.run_until_running(a);
    h.fault(TrapVector::Illegal);
    assert_ne!(h.running(), a);
    assert_eq!(h.kernel.pcb(a).unwrap().status, Config::ERROR);
    assert!(h.kernel.defunct_pids().contains(&a));

    h.run_until_running(init);
    let b = h.syscall(syscall::FORK, &[]);
    h.run_until_running(b);
    h.fault(TrapVector::Math);
    assert_eq!(h.kernel.pcb(b).unwrap().status, Config::ERROR);
}
