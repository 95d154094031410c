use super::current;
use crate::error::{KResult, KernelError};
use crate::kernel::KernelCx;
use crate::mm::{copy_from_user, copy_to_user, PTEFlags, VirtAddr};

/// Queue `len` bytes at `buf` for transmission.
/// Returns `NetNotReady` when the adapter's transmit ring is full.
pub fn sys_transmit(cx: &mut KernelCx, buf: u32, len: u32) -> KResult<i32> {
    let cur = current(cx)?;
    let va = VirtAddr::from(buf);
    let len = len as usize;
    cx.user_mem_assert(cur, va, len, PTEFlags::empty())?;
    let mut packet = vec![0u8; len];
    copy_from_user(&cx.mem, cx.memory_set(cur)?.page_table(), va, &mut packet);
    let net = cx.st.devices.net.as_mut().ok_or(KernelError::Inval)?;
    net.transmit(&packet)?;
    Ok(0)
}

/// Receive one packet into `buf` (at most `cap` bytes); returns its length.
pub fn sys_receive(cx: &mut KernelCx, buf: u32, cap: u32) -> KResult<i32> {
    let cur = current(cx)?;
    let va = VirtAddr::from(buf);
    let cap = cap as usize;
    cx.user_mem_assert(cur, va, cap, PTEFlags::W)?;
    let mut packet = vec![0u8; cap];
    let net = cx.st.devices.net.as_mut().ok_or(KernelError::Inval)?;
    let n = net.receive(&mut packet)?;
    let st = &*cx.st;
    if let Some(ms) = st.envs[cur].memory_set.as_ref() {
        copy_to_user(&mut cx.mem, ms.page_table(), va, &packet[..n]);
    }
    Ok(n as i32)
}
