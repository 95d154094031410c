//! System call dispatch.
//!
//! The number arrives in `eax` and up to five arguments in `edx`, `ecx`,
//! `ebx`, `edi`, `esi`. Handlers return `KResult<i32>`; errors reach user
//! space negated in `eax`.

mod io;
mod memory;
mod net;
mod process;
mod timer;

use crate::env::EnvId;
use crate::error::{KResult, KernelError};
use crate::kernel::KernelCx;

use io::*;
use memory::*;
use net::*;
use process::*;
use timer::*;

pub use process::V86_ENTRY;

// 系统调用号，与用户库保持一致
pub const SYS_CPUTS: u32 = 0;
pub const SYS_CGETC: u32 = 1;
pub const SYS_GETENVID: u32 = 2;
pub const SYS_ENV_DESTROY: u32 = 3;
pub const SYS_PAGE_ALLOC: u32 = 4;
pub const SYS_PAGE_MAP: u32 = 5;
pub const SYS_PAGE_UNMAP: u32 = 6;
pub const SYS_EXOFORK: u32 = 7;
pub const SYS_ENV_SET_STATUS: u32 = 8;
pub const SYS_ENV_SET_TRAPFRAME: u32 = 9;
pub const SYS_ENV_SET_PGFAULT_UPCALL: u32 = 10;
pub const SYS_YIELD: u32 = 11;
pub const SYS_IPC_TRY_SEND: u32 = 12;
pub const SYS_IPC_RECV: u32 = 13;
pub const SYS_TIME_MSEC: u32 = 14;
pub const SYS_TRANSMIT: u32 = 15;
pub const SYS_RECEIVE: u32 = 16;
pub const SYS_V86: u32 = 17;
pub const SYS_MAP_LFB: u32 = 18;
pub const SYS_GET_IO_EVENTS: u32 = 19;
pub const SYS_GET_IDE_IO_BASE: u32 = 20;
pub const SYS_GET_MODE_INFO: u32 = 21;
pub const NSYSCALLS: u32 = 22;

/// 对于系统调用而言，syscall 函数并不会实际处理系统调用，而只是根据 syscall 号分发到具体的处理函数
pub fn syscall(cx: &mut KernelCx, num: u32, args: [u32; 5]) -> i32 {
    let [a1, a2, a3, a4, a5] = args;
    let ret = match num {
        SYS_CPUTS => sys_cputs(cx, a1, a2),
        SYS_CGETC => sys_cgetc(cx),
        SYS_GETENVID => sys_getenvid(cx),
        SYS_ENV_DESTROY => sys_env_destroy(cx, a1),
        SYS_PAGE_ALLOC => sys_page_alloc(cx, a1, a2, a3),
        SYS_PAGE_MAP => sys_page_map(cx, a1, a2, a3, a4, a5),
        SYS_PAGE_UNMAP => sys_page_unmap(cx, a1, a2),
        SYS_EXOFORK => sys_exofork(cx),
        SYS_ENV_SET_STATUS => sys_env_set_status(cx, a1, a2),
        SYS_ENV_SET_TRAPFRAME => sys_env_set_trapframe(cx, a1, a2),
        SYS_ENV_SET_PGFAULT_UPCALL => sys_env_set_pgfault_upcall(cx, a1, a2),
        SYS_YIELD => sys_yield(cx),
        SYS_IPC_TRY_SEND => cx.ipc_try_send(a1, a2, a3, a4).map(|_| 0),
        SYS_IPC_RECV => cx.ipc_recv(a1).map(|_| 0),
        SYS_TIME_MSEC => sys_time_msec(cx),
        SYS_TRANSMIT => sys_transmit(cx, a1, a2),
        SYS_RECEIVE => sys_receive(cx, a1, a2),
        SYS_V86 => sys_v86(cx),
        SYS_MAP_LFB => sys_map_lfb(cx),
        SYS_GET_IO_EVENTS => sys_get_io_events(cx, a1, a2),
        SYS_GET_IDE_IO_BASE => sys_get_ide_io_base(cx),
        SYS_GET_MODE_INFO => sys_get_mode_info(cx),
        _ => {
            debug!("[{:08x}] unknown syscall {}", cx.curenv_id(), num);
            Err(KernelError::Inval)
        }
    };
    match ret {
        Ok(v) => v,
        Err(e) => {
            trace!("[{:08x}] syscall {} failed: {}", cx.curenv_id(), num, e);
            e.as_ret()
        }
    }
}

/// Slot of the calling environment.
fn current(cx: &KernelCx) -> KResult<usize> {
    cx.curenv().ok_or(KernelError::BadEnv)
}

fn env_id_of(cx: &KernelCx, idx: usize) -> EnvId {
    cx.st.envs[idx].env_id
}
