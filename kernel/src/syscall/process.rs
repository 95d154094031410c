use super::{current, env_id_of};
use crate::env::EnvStatus;
use crate::error::{KResult, KernelError};
use crate::kernel::KernelCx;
use crate::mm::{copy_from_user, PTEFlags, VirtAddr};
use crate::trap::{TrapFrame, FL_VM, TRAPFRAME_SIZE};

/// where the virtual 8086 BIOS trampoline starts
pub const V86_ENTRY: u32 = 0x8000;

pub fn sys_getenvid(cx: &mut KernelCx) -> KResult<i32> {
    current(cx)?;
    Ok(cx.curenv_id() as i32)
}

/// Destroy a given environment (possibly the currently running one).
pub fn sys_env_destroy(cx: &mut KernelCx, envid: u32) -> KResult<i32> {
    let idx = cx.envid2env(envid, true)?;
    let target = env_id_of(cx, idx);
    if Some(idx) == cx.curenv() {
        println!("[{:08x}] exiting gracefully", target);
    } else {
        println!("[{:08x}] destroying {:08x}", cx.curenv_id(), target);
    }
    cx.env_destroy(idx);
    Ok(0)
}

/// Deschedule current environment and pick a different one to run.
pub fn sys_yield(cx: &mut KernelCx) -> KResult<i32> {
    cx.resched = true;
    Ok(0)
}

/// Allocate a new environment.
///
/// The child starts NotRunnable with the parent's registers, except that
/// it sees 0 as the result of this call.
pub fn sys_exofork(cx: &mut KernelCx) -> KResult<i32> {
    let cur = current(cx)?;
    let parent_id = cx.curenv_id();
    let child = cx.env_alloc(parent_id)?;
    let mut tf = cx.st.envs[cur].tf;
    tf.regs.eax = 0;
    cx.st.envs[child].tf = tf;
    Ok(env_id_of(cx, child) as i32)
}

/// Set envid's status to Runnable (2) or NotRunnable (4).
pub fn sys_env_set_status(cx: &mut KernelCx, envid: u32, status: u32) -> KResult<i32> {
    let idx = cx.envid2env(envid, true)?;
    let status = match EnvStatus::from_code(status) {
        Some(s @ (EnvStatus::Runnable | EnvStatus::NotRunnable)) => s,
        _ => return Err(KernelError::Inval),
    };
    let env = &mut cx.st.envs[idx];
    match (env.status, status) {
        // 正在运行的环境本来就可运行；濒死的环境不能被复活
        (EnvStatus::Running, EnvStatus::Runnable) | (EnvStatus::Dying, _) => {}
        _ => env.status = status,
    }
    Ok(0)
}

/// Set envid's trap frame from the user copy at `tf_va`.
///
/// Whatever the caller put there, the environment comes back in user
/// mode with interrupts enabled and no I/O privilege.
pub fn sys_env_set_trapframe(cx: &mut KernelCx, envid: u32, tf_va: u32) -> KResult<i32> {
    let idx = cx.envid2env(envid, true)?;
    let cur = current(cx)?;
    let va = VirtAddr::from(tf_va);
    cx.user_mem_assert(cur, va, TRAPFRAME_SIZE, PTEFlags::empty())?;
    let mut bytes = [0u8; TRAPFRAME_SIZE];
    copy_from_user(&cx.mem, cx.memory_set(cur)?.page_table(), va, &mut bytes);
    let mut tf = TrapFrame::from_bytes(&bytes);
    tf.sanitize();
    cx.st.envs[idx].tf = tf;
    Ok(0)
}

/// Set the page fault upcall for envid.
pub fn sys_env_set_pgfault_upcall(cx: &mut KernelCx, envid: u32, func: u32) -> KResult<i32> {
    let idx = cx.envid2env(envid, true)?;
    cx.st.envs[idx].pgfault_upcall = func;
    Ok(0)
}

/// Enter virtual 8086 mode.
///
/// The caller's frame is kept aside; the breakpoint that ends the BIOS
/// call restores it with 0 in `eax`.
pub fn sys_v86(cx: &mut KernelCx) -> KResult<i32> {
    let cur = current(cx)?;
    let env = &mut cx.st.envs[cur];
    env.v86_saved = Some(env.tf);
    env.tf.eflags |= FL_VM;
    env.tf.eip = V86_ENTRY;
    Ok(0)
}
