//! Synchronization primitives.

mod bkl;
mod ringbuffer;

pub use bkl::{BigKernelLock, BklGuard};
pub use ringbuffer::RingBuffer;
