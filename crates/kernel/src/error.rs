//! Kernel error taxonomy. Recoverable failures propagate as `Result` up to
//! the syscall dispatcher, which folds them to the `ERROR` register value.

use hardware::MachineError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KernelError {
    /// No free physical frame.
    OutOfMemory,
    /// Address outside the caller's legal range.
    BadAddress(u32),
    /// Break request into user text, into the stack, or below the boot brk.
    BadBreak,
    /// Negative tick or length argument.
    InvalidArgument(&'static str),
    /// No pipe/lock/cvar with this id.
    NoSuchObject(i32),
    /// Caller does not hold the lock.
    NotOwner(i32),
    /// Object still in use (waiters or blocked readers).
    Busy(i32),
    /// Wait with nothing left to reap.
    NoChildren,
    /// Write would fill the ring.
    PipeFull(i32),
    /// Program image missing from the store.
    NoSuchProgram(String),
    /// Fault reported by the machine while touching user memory.
    Machine(MachineError),
}

impl std::fmt::Display for KernelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelError::OutOfMemory => write!(f, "no free physical frames"),
            KernelError::BadAddress(va) => write!(f, "bad address 0x{:08x}", va),
            KernelError::BadBreak => write!(f, "break request outside the legal window"),
            KernelError::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            KernelError::NoSuchObject(id) => write!(f, "no object with id {}", id),
            KernelError::NotOwner(id) => write!(f, "caller does not hold lock {}", id),
            KernelError::Busy(id) => write!(f, "object {} is still in use", id),
            KernelError::NoChildren => write!(f, "no children to wait for"),
            KernelError::PipeFull(id) => write!(f, "pipe {} is full", id),
            KernelError::NoSuchProgram(path) => write!(f, "no program image '{}'", path),
            KernelError::Machine(e) => write!(f, "machine fault: {}", e),
        }
    }
}

impl std::error::Error for KernelError {}

impl From<MachineError> for KernelError {
    fn from(e: MachineError) -> Self {
        KernelError::Machine(e)
    }
}
