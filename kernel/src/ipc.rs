//! Rendezvous IPC.
//!
//! A receiver blocks in [`KernelCx::ipc_recv`]; a sender only ever tries
//! once with [`KernelCx::ipc_try_send`] and gets `IpcNotRecv` if nobody is
//! waiting. Besides a 32-bit value the sender may offer a page, which
//! moves only if the receiver asked for one.

use crate::env::{syscall_perm, user_page_va, EnvStatus, IPC_NONE};
use crate::error::{KResult, KernelError};
use crate::kernel::KernelCx;
use crate::mm::{PTEFlags, PhysPageNum, VirtAddr};

impl KernelCx<'_> {
    /// Block until a value is ready.
    ///
    /// `dstva` is where the receiver is willing to accept a page, or
    /// `IPC_NONE`. The caller sees 0 in `eax` once a sender completes the
    /// rendezvous.
    pub fn ipc_recv(&mut self, dstva: u32) -> KResult<()> {
        let dstva = match dstva {
            IPC_NONE => None,
            va => Some(user_page_va(va)?),
        };
        let cur = self.curenv().ok_or(KernelError::BadEnv)?;
        let env = &mut self.st.envs[cur];
        env.ipc.recving = true;
        env.ipc.dstva = dstva;
        env.status = EnvStatus::NotRunnable;
        self.resched = true;
        trace!("[{:08x}] ipc_recv dstva {:x?}", env.env_id, dstva);
        Ok(())
    }

    /// Try to send `value` to the target env `envid`.
    ///
    /// With `srcva` other than `IPC_NONE` the page mapped there is offered
    /// too, mapped in the receiver with `perm`. Nothing changes anywhere
    /// unless the whole send succeeds.
    pub fn ipc_try_send(&mut self, envid: u32, value: u32, srcva: u32, perm: u32) -> KResult<()> {
        let target = self.envid2env(envid, false)?;
        if !self.st.envs[target].ipc.recving {
            return Err(KernelError::IpcNotRecv);
        }
        let cur = self.curenv().ok_or(KernelError::BadEnv)?;
        let offer = self.ipc_offer(cur, srcva, perm)?;

        let mut moved = 0;
        if let (Some((frame, perm)), Some(dstva)) = (offer, self.st.envs[target].ipc.dstva) {
            let mut pgdir = *self.memory_set(target)?.page_table();
            pgdir.insert(&mut self.mem, frame, dstva, perm)?;
            moved = perm.bits();
        }

        let from = self.curenv_id();
        let env = &mut self.st.envs[target];
        env.ipc.recving = false;
        env.ipc.from = from;
        env.ipc.value = value;
        env.ipc.perm = moved;
        env.tf.regs.eax = 0;
        env.status = EnvStatus::Runnable;
        trace!("[{:08x}] ipc to {:08x} value {:#x} perm {:#x}", from, env.env_id, value, moved);
        Ok(())
    }

    /// Validate the page the sender offers, if any.
    fn ipc_offer(
        &self,
        cur: usize,
        srcva: u32,
        perm: u32,
    ) -> KResult<Option<(PhysPageNum, PTEFlags)>> {
        if srcva == IPC_NONE {
            return match perm {
                0 => Ok(None),
                _ => Err(KernelError::Inval),
            };
        }
        let srcva: VirtAddr = user_page_va(srcva)?;
        let perm = syscall_perm(perm)?;
        let (frame, pte) = self
            .memory_set(cur)?
            .page_table()
            .lookup(&self.mem, srcva)
            .ok_or(KernelError::Inval)?;
        if perm.contains(PTEFlags::W) && !pte.is_writable() {
            return Err(KernelError::Inval);
        }
        Ok(Some((frame, perm)))
    }
}
