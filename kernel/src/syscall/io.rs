use super::current;
use crate::dev::IO_EVENT_SIZE;
use crate::error::{KResult, KernelError};
use crate::kernel::KernelCx;
use crate::mm::{copy_from_user, copy_to_user, PTEFlags, VirtAddr};
use alloc::string::String;
use alloc::vec::Vec;

impl KernelCx<'_> {
    /// Pull whatever the input devices have buffered, as the interrupt
    /// handlers would.
    fn poll_input(&mut self) {
        let st = &mut *self.st;
        st.devices.drain_serial(&mut st.input);
        st.devices.drain_keyboard_and_mouse(&mut st.input);
    }
}

/// Print a string to the system console.
/// The string is exactly `len` characters long.
/// Destroys the environment on memory errors.
pub fn sys_cputs(cx: &mut KernelCx, buf: u32, len: u32) -> KResult<i32> {
    let cur = current(cx)?;
    let va = VirtAddr::from(buf);
    let len = len as usize;
    cx.user_mem_assert(cur, va, len, PTEFlags::empty())?;
    let mut bytes = vec![0u8; len];
    copy_from_user(&cx.mem, cx.memory_set(cur)?.page_table(), va, &mut bytes);
    print!("{}", String::from_utf8_lossy(&bytes));
    Ok(0)
}

/// Read a character from the system console without blocking.
/// Returns the character, or 0 if there is no input waiting.
pub fn sys_cgetc(cx: &mut KernelCx) -> KResult<i32> {
    cx.poll_input();
    Ok(cx.st.input.console.pop().map_or(0, i32::from))
}

/// Copy up to `max` queued input events to `buf`; returns how many.
pub fn sys_get_io_events(cx: &mut KernelCx, buf: u32, max: u32) -> KResult<i32> {
    let cur = current(cx)?;
    let va = VirtAddr::from(buf);
    let max = max as usize;
    let len = max.checked_mul(IO_EVENT_SIZE).ok_or(KernelError::Inval)?;
    cx.user_mem_assert(cur, va, len, PTEFlags::W)?;
    cx.poll_input();

    let mut out = Vec::new();
    let mut count = 0;
    while count < max {
        match cx.st.input.events.pop() {
            Some(event) => out.extend_from_slice(&event.to_bytes()),
            None => break,
        }
        count += 1;
    }
    let st = &*cx.st;
    if let Some(ms) = st.envs[cur].memory_set.as_ref() {
        copy_to_user(&mut cx.mem, ms.page_table(), va, &out);
    }
    Ok(count as i32)
}

/// I/O port base of the attached disk.
pub fn sys_get_ide_io_base(cx: &mut KernelCx) -> KResult<i32> {
    current(cx)?;
    let disk = cx.st.devices.disk.as_ref().ok_or(KernelError::NoDisk)?;
    Ok(disk.io_base() as i32)
}

/// No display adapter is attached, so there is no framebuffer to map.
pub fn sys_map_lfb(cx: &mut KernelCx) -> KResult<i32> {
    current(cx)?;
    Err(KernelError::Inval)
}

pub fn sys_get_mode_info(cx: &mut KernelCx) -> KResult<i32> {
    current(cx)?;
    Err(KernelError::Inval)
}
