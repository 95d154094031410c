//! exo, a small exokernel in the JOS tradition.
//!
//! The kernel multiplexes physical pages, CPUs and devices between user
//! environments and leaves everything else (fork, IPC protocols, file
//! systems) to user-level libraries. It runs against a simulated x86
//! machine: physical memory is a byte array holding real two-level page
//! tables, and the host drives it one trap at a time.
//!
//! - [`Kernel::new`]: boot
//! - [`Kernel::create_env`]: load a program into a new environment
//! - [`Kernel::start_cpu`] / [`Kernel::trap`]: enter the kernel and get back
//!   the [`Dispatch`] the CPU must carry out

#![no_std]

#[macro_use]
extern crate alloc;

#[cfg(test)]
extern crate std;

#[macro_use]
extern crate log;

#[macro_use]
pub mod console;

pub mod config;
pub mod cpu;
pub mod dev;
pub mod env;
pub mod error;
pub mod ipc;
pub mod kernel;
pub mod loader;
pub mod logging;
pub mod mm;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod trap;

pub use config::{KernelConfig, BOOT_CONFIG};
pub use cpu::CpuStatus;
pub use dev::Devices;
pub use env::{EnvId, EnvInfo, EnvStatus, IPC_NONE};
pub use error::{KResult, KernelError};
pub use kernel::{Dispatch, Kernel};
pub use loader::ProgramImage;
pub use trap::TrapFrame;
