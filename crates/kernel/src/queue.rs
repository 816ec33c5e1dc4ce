//! PID queues. Insertion at the head, removal by identity; the scheduler
//! takes the tail, so head-insert/tail-remove together give FIFO order.
//! Queues hold ids into the process table, never PCBs themselves.

use crate::pcb::Pid;

#[derive(Clone, Debug, Default)]
pub struct PidQueue {
    pids: Vec<Pid>,
}

impl PidQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_head(&mut self, pid: Pid) {
        debug_assert!(!self.pids.contains(&pid), "pid {} queued twice", pid);
        self.pids.insert(0, pid);
    }

    /// Remove a specific PID. Returns whether it was present.
    pub fn remove(&mut self, pid: Pid) -> bool {
        match self.pids.iter().position(|&p| p == pid) {
            Some(i) => {
                self.pids.remove(i);
                true
            }
            None => false,
        }
    }

    /// Oldest entry (head-insertion puts the newest first).
    pub fn tail(&self) -> Option<Pid> {
        self.pids.last().copied()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.pids.contains(&pid)
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    /// Snapshot, newest first (the order the wake passes walk in).
    pub fn snapshot(&self) -> Vec<Pid> {
        self.pids.clone()
    }
}
