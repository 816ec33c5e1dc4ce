//! Kernel IPC and synchronization objects: pipes, locks, condition
//! variables.
//!
//! Object ids carry their kind: pipes are negative (decreasing), locks even
//! positive, cvars odd positive. `Reclaim` relies on this encoding.

use crate::config::Config;
use crate::queue::PidQueue;

/// Which kind of object an id names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Pipe,
    Lock,
    Cvar,
}

/// Classify an id by its range. Zero is never a valid id.
pub fn kind_of(id: i32) -> Option<ObjectKind> {
    if id == 0 {
        None
    } else if id < 0 {
        Some(ObjectKind::Pipe)
    } else if id % 2 == 0 {
        Some(ObjectKind::Lock)
    } else {
        Some(ObjectKind::Cvar)
    }
}

/// Fixed-capacity byte ring. Write never catches up to read from behind,
/// so one slot stays unused.
#[derive(Clone, Debug)]
pub struct Pipe {
    pub id: i32,
    buf: Vec<u8>,
    pub read_index: usize,
    pub write_index: usize,
}

impl Pipe {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            buf: vec![0u8; Config::PIPE_BUFFER_LEN],
            read_index: 0,
            write_index: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes available to read: `(write - read) mod capacity`.
    pub fn readable_len(&self) -> usize {
        (self.write_index + self.capacity() - self.read_index) % self.capacity()
    }

    /// Take up to `len` bytes, handling wrap-around.
    pub fn read(&mut self, len: usize) -> Vec<u8> {
        let n = len.min(self.readable_len());
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            out.push(self.buf[(self.read_index + i) % self.capacity()]);
        }
        self.read_index = (self.read_index + n) % self.capacity();
        out
    }

    /// Append `data`, or refuse outright if it would fill the ring.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, ()> {
        if self.readable_len() + data.len() >= self.capacity() {
            return Err(());
        }
        for (i, &b) in data.iter().enumerate() {
            let at = (self.write_index + i) % self.capacity();
            self.buf[at] = b;
        }
        self.write_index = (self.write_index + data.len()) % self.capacity();
        Ok(data.len())
    }
}

#[derive(Clone, Debug)]
pub struct Lock {
    pub id: i32,
    pub held: bool,
    pub waiting: PidQueue,
}

impl Lock {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            held: false,
            waiting: PidQueue::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Cvar {
    pub id: i32,
    pub waiting: PidQueue,
}

impl Cvar {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            waiting: PidQueue::new(),
        }
    }
}
