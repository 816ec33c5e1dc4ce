//! The kernel core: multiprogramming with isolated per-process address
//! spaces over the simulated machine in the `hardware` crate.
//!
//! Everything the kernel knows lives in one [`Kernel`] value; the machine
//! drives it entirely through [`Kernel::start`] and [`Kernel::handle_trap`].

pub mod config;
pub mod error;
pub mod frames;
pub mod kernel;
pub mod loader;
pub mod objects;
pub mod pcb;
pub mod queue;
pub mod region0;
pub mod scheduler;
pub mod switch;
pub mod syscall;
pub mod terminal;
pub mod traps;

pub use config::Config;
pub use error::KernelError;
pub use kernel::Kernel;
pub use pcb::{BlockReason, Pcb, Pid};
