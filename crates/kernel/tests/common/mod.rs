//! Shared harness: builds a machine with a standard program set, boots the
//! kernel, and plays the hardware side (traps, ticks, terminal events).

use std::rc::Rc;

use once_cell::sync::Lazy;

use hardware::{
    BootInfo, Machine, ProgramImage, TrapVector, UserContext, NUM_REGS, NUM_TERMINALS, PAGE_SIZE,
};
use kernel::{Kernel, Pid};

pub const MEMORY_SIZE: usize = 512 * PAGE_SIZE;

/// Program set every test boots with: name, text fill, text len, data len.
pub static PROGRAMS: Lazy<Vec<(&'static str, u8, usize, usize)>> = Lazy::new(|| {
    vec![
        ("test/init", 0xAA, PAGE_SIZE + PAGE_SIZE / 2, PAGE_SIZE / 2),
        ("test/idle", 0xCC, 128, 0),
        ("test/echo", 0xDD, 512, 64),
    ]
});

pub struct Harness {
    pub machine: Rc<Machine>,
    pub kernel: Kernel,
    pub uctxt: UserContext,
}

#[allow(dead_code)]
impl Harness {
    pub fn boot() -> Self {
        Self::boot_with_memory(MEMORY_SIZE)
    }

    pub fn boot_with_memory(memory: usize) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let machine = Rc::new(Machine::new(memory, NUM_TERMINALS));
        for &(name, fill, text, data) in PROGRAMS.iter() {
            machine.register_program(name, ProgramImage::new(vec![fill; text], vec![0; data]));
        }
        let mut uctxt = UserContext::default();
        let kernel = Kernel::start(
            Rc::clone(&machine),
            &[],
            BootInfo::with_memory(memory),
            &mut uctxt,
        )
        .expect("kernel boot failed");
        Self {
            machine,
            kernel,
            uctxt,
        }
    }

    pub fn running(&self) -> Pid {
        self.kernel.running()
    }

    /// Issue a syscall as the running process; returns register 0.
    pub fn syscall(&mut self, code: i32, args: &[i32]) -> i32 {
        self.uctxt.vector = TrapVector::Kernel;
        self.uctxt.code = code;
        self.uctxt.regs = [0; NUM_REGS];
        self.uctxt.regs[..args.len()].copy_from_slice(args);
        self.kernel.handle_trap(&mut self.uctxt);
        self.kernel.check_invariants();
        self.uctxt.regs[0]
    }

    pub fn tick(&mut self) {
        self.uctxt.vector = TrapVector::Clock;
        self.kernel.handle_trap(&mut self.uctxt);
        self.kernel.check_invariants();
    }

    /// Tick until `pid` holds the CPU.
    pub fn run_until_running(&mut self, pid: Pid) {
        for _ in 0..64 {
            if self.running() == pid {
                return;
            }
            self.tick();
        }
        panic!("pid {} never got dispatched", pid);
    }

    pub fn memory_fault(&mut self, addr: u32) {
        self.uctxt.vector = TrapVector::Memory;
        self.uctxt.addr = addr;
        self.kernel.handle_trap(&mut self.uctxt);
        self.kernel.check_invariants();
    }

    pub fn fault(&mut self, vector: TrapVector) {
        self.uctxt.vector = vector;
        self.kernel.handle_trap(&mut self.uctxt);
        self.kernel.check_invariants();
    }

    /// Type a line at a terminal and deliver the receive trap.
    pub fn type_line(&mut self, tty: usize, line: &[u8]) {
        self.machine.tty_push_input(tty, line);
        self.uctxt.vector = TrapVector::TtyReceive;
        self.uctxt.code = tty as i32;
        self.kernel.handle_trap(&mut self.uctxt);
        self.kernel.check_invariants();
    }

    /// Complete the in-flight transmit and deliver the transmit trap.
    pub fn complete_transmit(&mut self, tty: usize) -> bool {
        if !self.machine.tty_complete_transmit(tty) {
            return false;
        }
        self.uctxt.vector = TrapVector::TtyTransmit;
        self.uctxt.code = tty as i32;
        self.kernel.handle_trap(&mut self.uctxt);
        self.kernel.check_invariants();
        true
    }

    /// A user address of the running process safe to scribble on.
    pub fn user_scratch(&self, len: usize) -> u32 {
        (self.uctxt.sp - len as u32) & !7
    }

    pub fn write_user(&self, addr: u32, data: &[u8]) {
        self.machine.write_virtual(addr, data).expect("user write");
    }

    pub fn read_user(&self, addr: u32, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.machine.read_virtual(addr, &mut buf).expect("user read");
        buf
    }

    pub fn read_user_i32(&self, addr: u32) -> i32 {
        i32::from_le_bytes(self.read_user(addr, 4).try_into().unwrap())
    }
}
