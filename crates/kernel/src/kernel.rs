//! The kernel state machine: one struct owning every table and queue, the
//! boot path, and the trap entry point the machine drives.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use hardware::{
    new_table_ref, BootInfo, Machine, PageTableRef, Prot, Region, UserContext,
};
use log::{debug, info};

use crate::config::Config;
use crate::error::KernelError;
use crate::frames::FrameBitmap;
use crate::loader;
use crate::objects::{Cvar, Lock, Pipe};
use crate::pcb::{Pcb, Pid};
use crate::queue::PidQueue;
use crate::terminal::Terminal;
use crate::traps::{self, TrapTable};

pub struct Kernel {
    pub(crate) machine: Rc<Machine>,
    pub(crate) boot: BootInfo,
    pub(crate) frames: FrameBitmap,
    pub(crate) kernel_table: PageTableRef,
    pub(crate) kernel_brk_page: usize,
    pub(crate) orig_kernel_brk_page: usize,
    pub(crate) procs: HashMap<Pid, Pcb>,
    pub(crate) ready: PidQueue,
    pub(crate) blocked: PidQueue,
    pub(crate) defunct: PidQueue,
    pub(crate) pipes: Vec<Pipe>,
    pub(crate) locks: Vec<Lock>,
    pub(crate) cvars: Vec<Cvar>,
    pub(crate) next_pipe_id: i32,
    pub(crate) next_lock_id: i32,
    pub(crate) next_cvar_id: i32,
    pub(crate) terminals: Vec<Terminal>,
    pub(crate) trap_table: TrapTable,
    pub(crate) running: Pid,
    pub(crate) idle_pid: Pid,
    pub(crate) init_pid: Pid,
}

impl Kernel {
    /// Boot entry. Mirrors the machine's contract: it hands over the
    /// argument vector, the physical memory size (through `boot`), and the
    /// initial user context; on return it enters user mode at whatever
    /// context was written back into `uctxt`.
    pub fn start(
        machine: Rc<Machine>,
        cmd_args: &[String],
        boot: BootInfo,
        uctxt: &mut UserContext,
    ) -> Result<Kernel, KernelError> {
        info!("entering kernel start");

        let init_prog = match cmd_args.first() {
            Some(name) => name.clone(),
            None => Config::DEFAULT_INIT.to_string(),
        };
        let init_args = if cmd_args.is_empty() {
            vec![init_prog.clone()]
        } else {
            cmd_args.to_vec()
        };

        let mut k = Kernel {
            machine: Rc::clone(&machine),
            boot,
            frames: FrameBitmap::new(boot.num_frames()),
            kernel_table: new_table_ref(Config::MAX_PT_LEN),
            kernel_brk_page: boot.orig_brk_page,
            orig_kernel_brk_page: boot.orig_brk_page,
            procs: HashMap::new(),
            ready: PidQueue::new(),
            blocked: PidQueue::new(),
            defunct: PidQueue::new(),
            pipes: Vec::new(),
            locks: Vec::new(),
            cvars: Vec::new(),
            next_pipe_id: -1,
            next_lock_id: 2,
            next_cvar_id: 1,
            terminals: vec![Terminal::default(); machine.num_terminals()],
            trap_table: TrapTable::new(),
            running: -1,
            idle_pid: -1,
            init_pid: -1,
        };

        // Region-0 layout, identity-mapped before VM comes up: kernel text,
        // then data plus the initial heap, then the two stack pages on top.
        for vpn in boot.first_text_page..boot.first_data_page {
            k.add_kernel_page(vpn, Prot::read_exec())?;
        }
        for vpn in boot.first_data_page..boot.orig_brk_page {
            k.add_kernel_page(vpn, Prot::read_write())?;
        }
        for vpn in Config::KERNEL_STACK_BASE_PAGE..Config::MAX_PT_LEN {
            k.add_kernel_page(vpn, Prot::read_write())?;
        }

        machine.set_page_table(Region::Kernel, k.kernel_table.clone(), Config::MAX_PT_LEN);
        machine.enable_vm();
        machine.seed_kernel_context(0xb001);

        // Boot process. It adopts the fixed boot-time kernel stack frames,
        // so the two it was just handed go back.
        let init_table = new_table_ref(Config::MAX_PT_LEN);
        let mut init_pcb = k.initialize_pcb(uctxt.clone(), init_table.clone())?;
        for f in init_pcb.kernel_stack_frames {
            k.frames.free(f);
        }
        init_pcb.kernel_stack_frames =
            [Config::KERNEL_STACK_BASE_PAGE, Config::KERNEL_STACK_BASE_PAGE + 1];
        let init_pid = init_pcb.pid;
        k.procs.insert(init_pid, init_pcb);
        k.init_pid = init_pid;
        k.running = init_pid;

        machine.set_page_table(Region::User, init_table, Config::MAX_PT_LEN);
        machine.flush_tlb(Region::User);
        loader::load_program(&mut k, init_pid, &init_prog, &init_args)?;

        // Idle process: unique fallback when ready is empty, never queued.
        let idle_table = new_table_ref(Config::MAX_PT_LEN);
        let idle_pcb = k.initialize_pcb(uctxt.clone(), idle_table.clone())?;
        let idle_pid = idle_pcb.pid;
        k.procs.insert(idle_pid, idle_pcb);
        k.idle_pid = idle_pid;

        machine.set_page_table(Region::User, idle_table, Config::MAX_PT_LEN);
        machine.flush_tlb(Region::User);
        loader::load_program(
            &mut k,
            idle_pid,
            Config::IDLE_PROGRAM,
            &[Config::IDLE_PROGRAM.to_string()],
        )?;

        k.clone_kernel_stack(idle_pid);

        k.install_running_user_table();
        *uctxt = k.pcb_ref(k.running).uc.clone();
        info!("leaving kernel start; pid {} running", k.running);
        Ok(k)
    }

    /// Trap entry. Saves the hardware context into the running PCB, runs
    /// the vectored handler, and restores the (possibly different) running
    /// PCB's context on the way out.
    pub fn handle_trap(&mut self, uctxt: &mut UserContext) {
        if self.machine.is_halted() {
            return;
        }
        self.pcb_mut(self.running).uc = uctxt.clone();
        let vector = uctxt.vector;
        traps::dispatch(self, vector);
        if let Some(pcb) = self.procs.get(&self.running) {
            *uctxt = pcb.uc.clone();
        }
    }

    // ---- PCB plumbing ----------------------------------------------------

    /// Fresh PCB with a new PID and two kernel-stack frames.
    pub(crate) fn initialize_pcb(
        &mut self,
        uc: UserContext,
        page_table: PageTableRef,
    ) -> Result<Pcb, KernelError> {
        let pid = self.machine.new_pid();
        let first = match self.frames.alloc() {
            Some(f) => f,
            None => {
                self.machine.retire_pid(pid);
                return Err(KernelError::OutOfMemory);
            }
        };
        let second = match self.frames.alloc() {
            Some(f) => f,
            None => {
                self.frames.free(first);
                self.machine.retire_pid(pid);
                return Err(KernelError::OutOfMemory);
            }
        };
        Ok(Pcb::new(pid, uc, page_table, [first, second]))
    }

    pub fn pcb(&self, pid: Pid) -> Option<&Pcb> {
        self.procs.get(&pid)
    }

    pub(crate) fn pcb_ref(&self, pid: Pid) -> &Pcb {
        self.procs.get(&pid).expect("no PCB for pid")
    }

    pub(crate) fn pcb_mut(&mut self, pid: Pid) -> &mut Pcb {
        self.procs.get_mut(&pid).expect("no PCB for pid")
    }

    /// Write a syscall return value into a process's saved context.
    pub(crate) fn set_user_return(&mut self, pid: Pid, value: i32) {
        if let Some(pcb) = self.procs.get_mut(&pid) {
            pcb.uc.regs[0] = value;
        }
    }

    /// Drop a dead PCB and give back its kernel stack.
    pub(crate) fn destroy_pcb(&mut self, pid: Pid) {
        if let Some(pcb) = self.procs.remove(&pid) {
            for f in pcb.kernel_stack_frames {
                self.frames.free(f);
            }
        }
    }

    // ---- queues ----------------------------------------------------------

    /// Head-insert into ready. The idle PCB is never queued.
    pub(crate) fn enqueue_ready(&mut self, pid: Pid) {
        if pid != self.idle_pid {
            self.ready.push_head(pid);
        }
    }

    /// Move a PCB from blocked to ready, keeping its block reason so the
    /// dispatcher finishes the interrupted syscall.
    pub(crate) fn wake_from_blocked(&mut self, pid: Pid) {
        if self.blocked.remove(pid) {
            self.enqueue_ready(pid);
        }
    }

    // ---- machine access --------------------------------------------------

    pub(crate) fn install_running_user_table(&mut self) {
        let table = self.pcb_ref(self.running).page_table.clone();
        self.machine
            .set_page_table(Region::User, table, Config::MAX_PT_LEN);
        self.machine.flush_tlb(Region::User);
    }

    pub(crate) fn read_user(&self, va: u32, len: usize) -> Result<Vec<u8>, KernelError> {
        let mut buf = vec![0u8; len];
        self.machine.read_virtual(va, &mut buf)?;
        Ok(buf)
    }

    pub(crate) fn write_user(&self, va: u32, data: &[u8]) -> Result<(), KernelError> {
        self.machine.write_virtual(va, data)?;
        Ok(())
    }

    pub(crate) fn write_user_i32(&self, va: u32, value: i32) -> Result<(), KernelError> {
        self.machine.write_virtual_i32(va, value)?;
        Ok(())
    }

    pub(crate) fn read_user_cstring(&self, va: u32, max: usize) -> Result<String, KernelError> {
        Ok(self.machine.read_virtual_cstring(va, max)?)
    }

    // ---- object tables ---------------------------------------------------

    pub(crate) fn pipe(&self, id: i32) -> Option<&Pipe> {
        self.pipes.iter().find(|p| p.id == id)
    }

    pub(crate) fn pipe_mut(&mut self, id: i32) -> Option<&mut Pipe> {
        self.pipes.iter_mut().find(|p| p.id == id)
    }

    pub(crate) fn lock(&self, id: i32) -> Option<&Lock> {
        self.locks.iter().find(|l| l.id == id)
    }

    pub(crate) fn lock_mut(&mut self, id: i32) -> Option<&mut Lock> {
        self.locks.iter_mut().find(|l| l.id == id)
    }

    pub(crate) fn cvar_mut(&mut self, id: i32) -> Option<&mut Cvar> {
        self.cvars.iter_mut().find(|c| c.id == id)
    }

    // ---- introspection ---------------------------------------------------

    pub fn running(&self) -> Pid {
        self.running
    }

    pub fn idle_pid(&self) -> Pid {
        self.idle_pid
    }

    pub fn init_pid(&self) -> Pid {
        self.init_pid
    }

    pub fn ready_pids(&self) -> Vec<Pid> {
        self.ready.snapshot()
    }

    pub fn blocked_pids(&self) -> Vec<Pid> {
        self.blocked.snapshot()
    }

    pub fn defunct_pids(&self) -> Vec<Pid> {
        self.defunct.snapshot()
    }

    pub fn process_count(&self) -> usize {
        self.procs.len()
    }

    pub fn kernel_brk_page(&self) -> usize {
        self.kernel_brk_page
    }

    pub fn boot_info(&self) -> BootInfo {
        self.boot
    }

    pub fn frames_used(&self) -> usize {
        self.frames.used_count()
    }

    pub fn machine(&self) -> Rc<Machine> {
        Rc::clone(&self.machine)
    }

    pub fn log_queues(&self) {
        debug!(
            "queues: ready={:?} blocked={:?} defunct={:?} running={}",
            self.ready.snapshot(),
            self.blocked.snapshot(),
            self.defunct.snapshot(),
            self.running
        );
    }

    /// Assert the cross-cutting invariants. Called from tests after every
    /// syscall; panics with a description on the first violation.
    pub fn check_invariants(&self) {
        // A PCB sits in at most one queue or wait list, and the running
        // PCB sits in none.
        let mut seen: HashMap<Pid, String> = HashMap::new();
        let mut note = |pid: Pid, place: String| {
            if let Some(prev) = seen.insert(pid, place.clone()) {
                panic!("pid {} in both {} and {}", pid, prev, place);
            }
            assert_ne!(pid, self.running, "running pid {} found in {}", pid, place);
        };
        for pid in self.ready.snapshot() {
            note(pid, "ready".to_string());
        }
        for pid in self.blocked.snapshot() {
            note(pid, "blocked".to_string());
        }
        for pid in self.defunct.snapshot() {
            note(pid, "defunct".to_string());
        }
        for lock in &self.locks {
            for pid in lock.waiting.snapshot() {
                note(pid, format!("lock {} wait list", lock.id));
            }
        }
        for cvar in &self.cvars {
            for pid in cvar.waiting.snapshot() {
                note(pid, format!("cvar {} wait list", cvar.id));
            }
        }

        // A frame is used iff some live page-table entry references it or
        // it backs the kernel stack of a live PCB.
        let mut referenced: HashSet<usize> = HashSet::new();
        for (_, pte) in self.kernel_table.borrow().valid_entries() {
            referenced.insert(pte.pfn);
        }
        for pcb in self.procs.values() {
            for (_, pte) in pcb.page_table.borrow().valid_entries() {
                referenced.insert(pte.pfn);
            }
            for f in pcb.kernel_stack_frames {
                referenced.insert(f);
            }
        }
        for pfn in 0..self.frames.len() {
            assert_eq!(
                self.frames.is_used(pfn),
                referenced.contains(&pfn),
                "frame {} accounting mismatch",
                pfn
            );
        }

        // A lock is held iff exactly one live PCB records it.
        for lock in &self.locks {
            let holders = self
                .procs
                .values()
                .filter(|p| p.held_lock == Some(lock.id))
                .count();
            assert_eq!(
                lock.held,
                holders == 1,
                "lock {} held bit disagrees with {} holder(s)",
                lock.id,
                holders
            );
            if !lock.held {
                assert_eq!(holders, 0, "lock {} free but recorded as held", lock.id);
            }
        }

        // Pipe indices stay inside the ring.
        for pipe in &self.pipes {
            assert!(pipe.read_index < pipe.capacity());
            assert!(pipe.write_index < pipe.capacity());
            assert!(pipe.readable_len() < pipe.capacity());
        }

        // The region-1 register points at the running PCB's table.
        let installed = self
            .machine
            .page_table(Region::User)
            .expect("region-1 PTBR not installed");
        assert!(
            Rc::ptr_eq(&installed, &self.pcb_ref(self.running).page_table),
            "region-1 PTBR does not point at the running PCB's table"
        );
    }
}
