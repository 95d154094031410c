//! User-level IPC on top of `sys_ipc_recv` and `sys_ipc_try_send`.

use crate::env::UserEnv;
use crate::syscall::SysResult;
use exo_kernel::config::{ENV_RECORD_SIZE, UENVS};
use exo_kernel::env::envx;
use exo_kernel::mm::PTEFlags;
use exo_kernel::{EnvId, EnvStatus, KernelError};

// UENVS 中每条记录里的字段偏移
const REC_ENV_ID: usize = 0;
const REC_STATUS: usize = 8;
const REC_VALUE: usize = 24;
const REC_FROM: usize = 28;
const REC_PERM: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub value: u32,
    pub from: EnvId,
    /// permissions of the page received, empty if none was
    pub perm: PTEFlags,
}

impl UserEnv {
    /// Address of field `offset` of `id`'s record in the `envs` array.
    pub(crate) fn env_record(&self, id: EnvId, offset: usize) -> usize {
        UENVS + envx(id) * ENV_RECORD_SIZE + offset
    }

    /// `envs[ENVX(id)].env_status`, as the published table shows it.
    pub fn env_status_of(&mut self, id: EnvId) -> Option<EnvStatus> {
        let at = self.env_record(id, REC_ENV_ID);
        if self.read_u32(at) != id {
            return None;
        }
        let at = self.env_record(id, REC_STATUS);
        EnvStatus::from_code(self.read_u32(at))
    }
}

/// Receive a value via IPC.
///
/// If `dstva` is some, the sender may map a page there. On error the
/// message fields are not touched and the error is returned.
pub fn ipc_recv(env: &mut UserEnv, dstva: Option<usize>) -> SysResult<Message> {
    env.sys_ipc_recv(dstva)?;
    let me = env.id();
    let value = env.read_u32(env.env_record(me, REC_VALUE));
    let from = env.read_u32(env.env_record(me, REC_FROM));
    let perm = env.read_u32(env.env_record(me, REC_PERM));
    Ok(Message {
        value,
        from,
        perm: PTEFlags::from_bits_truncate(perm),
    })
}

/// Send `value` (and the page at `srcva`, if any) to `to`, yielding
/// until the receiver is ready. Any error other than `IpcNotRecv` panics.
pub fn ipc_send(env: &mut UserEnv, to: EnvId, value: u32, srcva: Option<usize>, perm: PTEFlags) {
    loop {
        match env.sys_ipc_try_send(to, value, srcva, perm) {
            Ok(()) => return,
            Err(KernelError::IpcNotRecv) => env.sys_yield(),
            Err(e) => panic!("ipc_send to {:08x}: {}", to, e),
        }
    }
}

/// Yield until `id` has exited.
pub fn wait(env: &mut UserEnv, id: EnvId) {
    while matches!(env.env_status_of(id), Some(status) if status != EnvStatus::Free) {
        env.sys_yield();
    }
}
