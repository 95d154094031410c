//! Per-CPU state.

use crate::mm::PhysAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuStatus {
    Unused,
    Started,
    /// idle until the next timer interrupt
    Halted,
}

pub struct Cpu {
    pub id: usize,
    pub status: CpuStatus,
    /// slot of the environment this CPU runs
    pub curenv: Option<usize>,
    /// slot run most recently; the scheduler scans from the one after it
    pub last_env: Option<usize>,
    /// page directory currently loaded
    pub cr3: PhysAddr,
}

impl Cpu {
    pub fn new(id: usize, kern_cr3: PhysAddr) -> Self {
        Self {
            id,
            status: CpuStatus::Unused,
            curenv: None,
            last_env: None,
            cr3: kern_cr3,
        }
    }
}
