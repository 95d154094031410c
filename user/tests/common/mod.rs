#![allow(dead_code)]

use exo_kernel::KernelConfig;
use exo_user::{Machine, MachineConfig, RunReport};
use std::sync::{Arc, Mutex};

pub fn machine_with(mem_bytes: usize, ncpu: usize, quantum: u32) -> Machine {
    Machine::new(MachineConfig {
        kernel: KernelConfig {
            mem_bytes,
            ncpu,
            ..KernelConfig::default()
        },
        quantum,
        max_traps: 500_000,
    })
}

pub fn machine(ncpu: usize, quantum: u32) -> Machine {
    machine_with(16 << 20, ncpu, quantum)
}

/// Host-side log user programs append to.
pub type Journal<T> = Arc<Mutex<Vec<T>>>;

pub fn journal<T>() -> Journal<T> {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries<T: Clone>(j: &Journal<T>) -> Vec<T> {
    j.lock().unwrap().clone()
}

/// Console lines printed by user code, without kernel bookkeeping.
pub fn user_lines(report: &RunReport) -> Vec<String> {
    report
        .output
        .lines()
        .filter(|l| !l.starts_with('[') && !l.starts_with('\u{1B}') && !l.is_empty())
        .filter(|l| !l.starts_with("No runnable") && !l.starts_with("Welcome"))
        .map(str::to_string)
        .collect()
}

pub fn assert_clean(report: &RunReport) {
    assert_eq!(report.outcome, exo_user::Outcome::Idle, "{}", report.output);
    assert!(report.user_panics.is_empty(), "{:?}", report.user_panics);
    assert_eq!(report.envs_left, 0);
}
