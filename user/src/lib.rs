//! User library and host platform for the exo kernel.
//!
//! The library half is what environments link against: syscall stubs,
//! the page fault upcall, copy-on-write [`fork`], IPC helpers and console
//! printing. The platform half, [`Machine`], runs the kernel on host
//! threads: one per CPU and one per environment.

#[macro_use]
extern crate log;

#[macro_use]
pub mod console;
mod env;
pub mod fork;
pub mod ipc;
pub mod machine;
pub mod map;
pub mod pgfault;
mod syscall;

pub use env::UserEnv;
pub use fork::fork;
pub use ipc::{ipc_recv, ipc_send, wait, Message};
pub use machine::{default_image, Machine, MachineConfig, Outcome, RunReport, UDATA, UDATA_SIZE};
pub use map::print_process_mappings;
pub use pgfault::{set_pgfault_handler, PgfaultHandler};
pub use syscall::SysResult;

/// A user program: runs on its environment's thread until it returns or exits.
pub type Program = Box<dyn FnOnce(&mut UserEnv) + Send>;
