//! Environment management implementation
//!
//! Everything about environments, like allocating, freeing and destroying
//! them and resolving ids, is implemented here.
//!
//! The table is a fixed arena of [`NENV`] slots. An [`EnvId`] carries the
//! slot index in its low bits and a generation above them, so an id kept
//! after its environment died never matches the slot's next occupant.

#[allow(clippy::module_inception)]
mod env;

use crate::config::{ENVGENSHIFT, ENV_RECORD_SIZE, NENV, UTOP};
use crate::error::{KResult, KernelError};
use crate::kernel::KernelCx;
use crate::mm::{MemorySet, PTEFlags, PhysAddr, PhysMemory, VirtAddr};
use crate::trap::TrapFrame;
use alloc::vec::Vec;
use core::ops::{Index, IndexMut};

pub use env::{Env, EnvId, EnvStatus, IpcState};

/// "no page" for `ipc_recv` / `ipc_try_send` addresses
pub const IPC_NONE: u32 = 0xFFFF_FFFF;

/// slot index of an id
pub fn envx(id: EnvId) -> usize {
    id as usize & (NENV - 1)
}

/// Environment table plus its free list.
pub struct EnvManager {
    envs: Vec<Env>,
    /// 空闲槽位栈，最近释放的槽位最先被重新使用
    free: Vec<usize>,
}

impl EnvManager {
    pub fn new() -> Self {
        Self {
            envs: (0..NENV).map(|_| Env::empty()).collect(),
            // 栈顶是 0 号槽位，第一个环境拿到 envs[0]
            free: (0..NENV).rev().collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Env> {
        self.envs.iter()
    }

    pub fn nfree(&self) -> usize {
        self.free.len()
    }

    fn take_slot(&mut self) -> Option<usize> {
        self.free.pop()
    }

    fn release_slot(&mut self, idx: usize) {
        self.free.push(idx);
    }

    /// Slot of a live environment with exactly this id.
    pub fn lookup(&self, id: EnvId) -> Option<usize> {
        let idx = envx(id);
        let env = &self.envs[idx];
        if env.status == EnvStatus::Free || env.env_id != id {
            None
        } else {
            Some(idx)
        }
    }

    /// Copy every record into the array user space sees at `UENVS`.
    pub fn publish(&self, mem: &mut PhysMemory, envs_pa: PhysAddr) {
        for (i, env) in self.envs.iter().enumerate() {
            mem.write(PhysAddr(envs_pa.0 + i * ENV_RECORD_SIZE), &env.record());
        }
    }
}

impl Default for EnvManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<usize> for EnvManager {
    type Output = Env;
    fn index(&self, idx: usize) -> &Env {
        &self.envs[idx]
    }
}

impl IndexMut<usize> for EnvManager {
    fn index_mut(&mut self, idx: usize) -> &mut Env {
        &mut self.envs[idx]
    }
}

/// Read-only snapshot of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvInfo {
    pub env_id: EnvId,
    pub parent_id: EnvId,
    pub status: EnvStatus,
    pub runs: u32,
    pub ipc: IpcState,
    pub pgfault_upcall: u32,
    pub tf: TrapFrame,
    pub cr3: PhysAddr,
}

impl From<&Env> for EnvInfo {
    fn from(env: &Env) -> Self {
        Self {
            env_id: env.env_id,
            parent_id: env.parent_id,
            status: env.status,
            runs: env.runs,
            ipc: env.ipc,
            pgfault_upcall: env.pgfault_upcall,
            tf: env.tf,
            cr3: env
                .memory_set
                .as_ref()
                .map_or(PhysAddr(0), |ms| ms.token()),
        }
    }
}

impl KernelCx<'_> {
    /// Allocate and initialize a new environment.
    ///
    /// On success the environment is NotRunnable with an empty user address
    /// space and the initial user trap frame.
    pub fn env_alloc(&mut self, parent_id: EnvId) -> KResult<usize> {
        let st = &mut *self.st;
        let mem = &mut *self.mem;
        let idx = st.envs.take_slot().ok_or(KernelError::NoFreeEnv)?;
        let memory_set = match MemorySet::new_user(mem, &st.kspace) {
            Ok(ms) => ms,
            Err(e) => {
                st.envs.release_slot(idx);
                return Err(e);
            }
        };

        // 生成新的 env_id，代数部分不能为 0 或负数
        let old = st.envs[idx].env_id as i32;
        let mut generation =
            old.wrapping_add(1 << ENVGENSHIFT) & !((NENV as i32) - 1);
        if generation <= 0 {
            generation = 1 << ENVGENSHIFT;
        }
        let env_id = generation as u32 | idx as u32;
        st.envs[idx].reset(env_id, parent_id, memory_set);

        println!("[{:08x}] new env {:08x}", self.curenv_id(), env_id);
        Ok(idx)
    }

    /// Tear down an environment's address space and return its slot.
    pub fn env_free(&mut self, idx: usize) {
        let cur_id = self.curenv_id();
        let st = &mut *self.st;
        let mem = &mut *self.mem;
        let kern_cr3 = st.kspace.page_table.token();
        let env = &mut st.envs[idx];
        let env_id = env.env_id;

        if let Some(memory_set) = env.memory_set.take() {
            let token = memory_set.token();
            // 正在使用这个页目录的 CPU 先切回 kern_pgdir
            for cpu in st.cpus.iter_mut() {
                if cpu.cr3 == token {
                    cpu.cr3 = kern_cr3;
                }
            }
            memory_set.recycle(mem);
        }
        for cpu in st.cpus.iter_mut() {
            if cpu.curenv == Some(idx) {
                cpu.curenv = None;
            }
        }
        env.status = EnvStatus::Free;
        env.cpu = None;
        env.ipc = IpcState::default();
        env.pgfault_upcall = 0;
        env.v86_saved = None;
        st.envs.release_slot(idx);

        println!("[{:08x}] free env {:08x}", cur_id, env_id);
    }

    /// Destroy an environment.
    ///
    /// An environment executing on another CPU is only marked Dying; that
    /// CPU frees it on its next trap. The caller's own environment is
    /// marked Dying too and freed on the way out of this trap.
    pub fn env_destroy(&mut self, idx: usize) {
        let env = &mut self.st.envs[idx];
        // 以 env.cpu 为准：状态可能已被改成 NotRunnable，但它仍在那个 CPU 上执行
        if env.cpu.is_some() && env.cpu != Some(self.cpu) {
            env.status = EnvStatus::Dying;
            return;
        }
        if self.curenv() == Some(idx) {
            self.st.envs[idx].status = EnvStatus::Dying;
            self.resched = true;
            return;
        }
        self.env_free(idx);
    }

    /// Convert an envid to a slot index.
    ///
    /// Id 0 means the current environment. With `checkperm` the target
    /// must be the current environment or one of its immediate children.
    pub fn envid2env(&self, id: EnvId, checkperm: bool) -> KResult<usize> {
        let cur = self.curenv();
        if id == 0 {
            return cur.ok_or(KernelError::BadEnv);
        }
        let idx = self.st.envs.lookup(id).ok_or(KernelError::BadEnv)?;
        if checkperm && Some(idx) != cur {
            let cur_id = self.curenv_id();
            if self.st.envs[idx].parent_id != cur_id || cur.is_none() {
                return Err(KernelError::BadEnv);
            }
        }
        Ok(idx)
    }

    /// Check that environment `idx` may access `[va, va+len)` with
    /// `perm | U`. On failure the environment is destroyed and
    /// [`KernelError::Fault`] comes back so callers can bail out with `?`.
    pub fn user_mem_assert(
        &mut self,
        idx: usize,
        va: VirtAddr,
        len: usize,
        perm: PTEFlags,
    ) -> KResult<()> {
        let env = &self.st.envs[idx];
        let checked = match env.memory_set.as_ref() {
            Some(ms) => ms.page_table().user_mem_check(&self.mem, va, len, perm),
            None => Err(va),
        };
        if let Err(bad) = checked {
            println!(
                "[{:08x}] user_mem_check assertion failure for va {:08x}",
                env.env_id, bad.0
            );
            self.env_destroy(idx);
            return Err(KernelError::Fault);
        }
        Ok(())
    }

    /// Refresh the read-only tables mapped at `UENVS` and `UPAGES`.
    pub fn publish(&mut self) {
        let st = &*self.st;
        let mem = &mut *self.mem;
        st.envs.publish(mem, st.kspace.envs_pa);
        st.kspace.publish_pages(mem);
    }

    /// Address space of a live environment.
    pub(crate) fn memory_set(&self, idx: usize) -> KResult<&MemorySet> {
        self.st.envs[idx]
            .memory_set
            .as_ref()
            .ok_or(KernelError::BadEnv)
    }
}

/// `va` is page aligned and below `UTOP`.
pub fn user_page_va(va: u32) -> KResult<VirtAddr> {
    let va = VirtAddr::from(va);
    if va.0 >= UTOP || !va.is_aligned() {
        return Err(KernelError::Inval);
    }
    Ok(va)
}

/// Syscall page permissions: must contain `U|P`, nothing outside
/// `PTE_SYSCALL`.
pub fn syscall_perm(perm: u32) -> KResult<PTEFlags> {
    let flags = PTEFlags::from_bits(perm).ok_or(KernelError::Inval)?;
    if !flags.contains(PTEFlags::U | PTEFlags::P) || !PTEFlags::SYSCALL.contains(flags) {
        return Err(KernelError::Inval);
    }
    Ok(flags)
}
