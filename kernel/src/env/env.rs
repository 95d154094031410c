use crate::config::{ENV_RECORD_SIZE, USTACKTOP};
use crate::mm::{MemorySet, VirtAddr};
use crate::trap::TrapFrame;

/// generation | index
pub type EnvId = u32;

/// 环境的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvStatus {
    Free,
    Dying,
    Runnable,
    Running,
    NotRunnable,
}

impl EnvStatus {
    /// value stored in the published record and passed to `env_set_status`
    pub fn code(self) -> u32 {
        match self {
            EnvStatus::Free => 0,
            EnvStatus::Dying => 1,
            EnvStatus::Runnable => 2,
            EnvStatus::Running => 3,
            EnvStatus::NotRunnable => 4,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(EnvStatus::Free),
            1 => Some(EnvStatus::Dying),
            2 => Some(EnvStatus::Runnable),
            3 => Some(EnvStatus::Running),
            4 => Some(EnvStatus::NotRunnable),
            _ => None,
        }
    }
}

/// Rendezvous state of a receiver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpcState {
    /// blocked in `ipc_recv`
    pub recving: bool,
    /// where the receiver wants a page, if it wants one
    pub dstva: Option<VirtAddr>,
    pub value: u32,
    pub from: EnvId,
    /// perm of the page received, 0 if none
    pub perm: u32,
}

/// 环境控制块
pub struct Env {
    pub env_id: EnvId,
    pub parent_id: EnvId,
    pub status: EnvStatus,
    /// saved registers while not running
    pub tf: TrapFrame,
    /// `None` exactly while the slot is free
    pub memory_set: Option<MemorySet>,
    pub pgfault_upcall: u32,
    pub ipc: IpcState,
    /// times dispatched
    pub runs: u32,
    /// CPU whose curenv this is
    pub cpu: Option<usize>,
    /// frame to return to when the virtual 8086 call finishes
    pub v86_saved: Option<TrapFrame>,
}

impl Env {
    pub fn empty() -> Self {
        Self {
            env_id: 0,
            parent_id: 0,
            status: EnvStatus::Free,
            tf: TrapFrame::default(),
            memory_set: None,
            pgfault_upcall: 0,
            ipc: IpcState::default(),
            runs: 0,
            cpu: None,
            v86_saved: None,
        }
    }

    /// Reset everything but the id for a fresh environment.
    pub fn reset(&mut self, env_id: EnvId, parent_id: EnvId, memory_set: MemorySet) {
        self.env_id = env_id;
        self.parent_id = parent_id;
        self.status = EnvStatus::NotRunnable;
        self.tf = TrapFrame::user_init(USTACKTOP as u32);
        self.memory_set = Some(memory_set);
        self.pgfault_upcall = 0;
        self.ipc = IpcState::default();
        self.runs = 0;
        self.cpu = None;
        self.v86_saved = None;
    }

    /// Record published at `UENVS`.
    pub fn record(&self) -> [u8; ENV_RECORD_SIZE] {
        let words = [
            self.env_id,
            self.parent_id,
            self.status.code(),
            self.runs,
            self.ipc.recving as u32,
            self.ipc.dstva.map_or(super::IPC_NONE, |va| va.0 as u32),
            self.ipc.value,
            self.ipc.from,
            self.ipc.perm,
            self.pgfault_upcall,
        ];
        let mut out = [0u8; ENV_RECORD_SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }
}
