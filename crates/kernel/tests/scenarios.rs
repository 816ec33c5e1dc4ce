//! End-to-end multiprogramming scenarios.

mod common;

use common::Harness;
use hardware::{syscall, PAGE_SIZE, VMEM_1_BASE};
use kernel::Config;

/// init forks; the child execs another image and exits; the parent's wait
/// sees the pid and status.
#[test]
fn fork_exec_wait_exit_round_trip() {
    let mut h = Harness::boot();
    let init = h.kernel.init_pid();

    let child = h.syscall(syscall::FORK, &[]);
    assert!(child > 0);

    let status_ptr = h.user_scratch(4);
    h.syscall(syscall::WAIT, &[status_ptr as i32]);
    assert!(h.kernel.blocked_pids().contains(&init));

    // The child takes over, observes 0, and becomes test/echo.
    h.run_until_running(child);
    assert_eq!(h.uctxt.regs[0], 0);
    let path = h.user_scratch(32);
    h.write_user(path, b"test/echo\0");
    assert_eq!(h.syscall(syscall::EXEC, &[path as i32, 0]), 0);

    h.syscall(syscall::EXIT, &[7]);

    h.run_until_running(init);
    assert_eq!(h.uctxt.regs[0], child, "wait returns the child pid");
    assert_eq!(h.read_user_i32(status_ptr), 7, "wait reports the status");
    assert!(h.kernel.pcb(child).is_none());
}

/// Producer writes, consumer reads the same bytes through the kernel ring.
#[test]
fn pipe_hello_between_processes() {
    let mut h = Harness::boot();
    let init = h.kernel.init_pid();

    let id_ptr = h.user_scratch(4);
    h.syscall(syscall::PIPE_INIT, &[id_ptr as i32]);
    let pipe = h.read_user_i32(id_ptr);

    let consumer = h.syscall(syscall::FORK, &[]);

    // Producer side.
    let src = h.user_scratch(16);
    h.write_user(src, b"hello");
    assert_eq!(h.syscall(syscall::PIPE_WRITE, &[pipe, src as i32, 5]), 5);

    // Consumer side: a 10-byte read delivers exactly the 5 written.
    h.run_until_running(consumer);
    let dst = h.user_scratch(16);
    assert_eq!(h.syscall(syscall::PIPE_READ, &[pipe, dst as i32, 10]), 5);
    assert_eq!(h.read_user(dst, 5), b"hello");

    h.run_until_running(init);
}

/// Two sleepers and a spinner: both sleepers wake exactly ten traps after
/// their calls, give or take the dispatch tick.
#[test]
fn delay_fairness_with_a_spinning_third() {
    let mut h = Harness::boot();
    let init = h.kernel.init_pid();

    let a = h.syscall(syscall::FORK, &[]);
    let b = h.syscall(syscall::FORK, &[]);

    h.run_until_running(a);
    h.syscall(syscall::DELAY, &[10]);
    h.run_until_running(b);
    h.syscall(syscall::DELAY, &[10]);

    // init spins; neither sleeper may appear for nine ticks.
    let mut woke_a = None;
    let mut woke_b = None;
    for tick in 1..=12 {
        h.tick();
        if h.running() == a && woke_a.is_none() {
            woke_a = Some(tick);
        }
        if h.running() == b && woke_b.is_none() {
            woke_b = Some(tick);
        }
        if tick < 10 {
            assert_ne!(h.running(), a, "a woke early at tick {}", tick);
            assert_ne!(h.running(), b, "b woke early at tick {}", tick);
            assert_eq!(h.running(), init, "the spinner keeps the CPU");
        }
    }
    let woke_a = woke_a.expect("a never woke");
    let woke_b = woke_b.expect("b never woke");
    assert!((10..=11).contains(&woke_a), "a woke at tick {}", woke_a);
    assert!((10..=11).contains(&woke_b), "b woke at tick {}", woke_b);
}

/// Touching one page below the stack grows it; touching three pages below
/// kills the process.
#[test]
fn stack_growth_window() {
    let mut h = Harness::boot();
    let init = h.kernel.init_pid();

    let last_stack = h.kernel.pcb(init).unwrap().last_user_stack_page;
    let one_below = VMEM_1_BASE + ((last_stack - 1) * PAGE_SIZE) as u32 + 24;
    h.memory_fault(one_below);
    assert_eq!(h.running(), init, "growth faults resume the process");
    assert_eq!(
        h.kernel.pcb(init).unwrap().last_user_stack_page,
        last_stack - 1
    );
    // The fresh page is usable memory now.
    h.write_user(one_below, b"grown");
    assert_eq!(h.read_user(one_below, 5), b"grown");

    // A child that strays three pages below its stack dies.
    let child = h.syscall(syscall::FORK, &[]);
    h.run_until_running(child);
    let child_stack = h.kernel.pcb(child).unwrap().last_user_stack_page;
    let three_below = VMEM_1_BASE + ((child_stack - 3) * PAGE_SIZE) as u32;
    h.memory_fault(three_below);
    assert_ne!(h.running(), child);
    assert_eq!(h.kernel.pcb(child).unwrap().status, Config::ERROR);
    assert!(h.kernel.defunct_pids().contains(&child));
}

/// Faults outside region 1 are fatal, full stop.
#[test]
fn wild_pointer_faults_kill() {
    let mut h = Harness::boot();
    let child = h.syscall(syscall::FORK, &[]);
    h.run_until_running(child);
    h.memory_fault(0x1200);
    assert_ne!(h.running(), child);
    assert_eq!(h.kernel.pcb(child).unwrap().status, Config::ERROR);
}

/// A write of four hardware lines lands as four ordered transmits while
/// other processes keep running.
#[test]
fn chunked_write_interleaves_with_scheduling() {
    let mut h = Harness::boot();
    let init = h.kernel.init_pid();
    let spinner = h.syscall(syscall::FORK, &[]);
    let total = 4 * Config::TERMINAL_MAX_LINE;

    let pattern: Vec<u8> = (0..total).map(|i| b'a' + (i / Config::TERMINAL_MAX_LINE) as u8).collect();
    let buf = h.user_scratch(total + 8);
    h.write_user(buf, &pattern);
    h.syscall(syscall::TTY_WRITE, &[0, buf as i32, total as i32]);

    // The spinner owns the CPU whenever the writer sleeps.
    for _ in 0..16 {
        h.complete_transmit(0);
        h.tick();
        if h.machine.tty_transmitted(0).len() == 4 {
            break;
        }
    }
    let sent = h.machine.tty_transmitted(0);
    assert_eq!(sent.len(), 4);
    for (i, chunk) in sent.iter().enumerate() {
        assert!(chunk.iter().all(|&b| b == b'a' + i as u8));
    }

    h.run_until_running(init);
    assert_eq!(h.uctxt.regs[0], total as i32);
    h.run_until_running(spinner);
}
