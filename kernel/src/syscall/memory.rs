//! Page allocation and mapping on behalf of user environments.

use crate::env::{syscall_perm, user_page_va};
use crate::error::{KResult, KernelError};
use crate::kernel::KernelCx;
use crate::mm::{AllocFlags, FrameAllocator, PTEFlags, PageTable};

impl KernelCx<'_> {
    /// Page directory of environment `idx`, by value.
    fn page_table_of(&self, idx: usize) -> KResult<PageTable> {
        Ok(*self.memory_set(idx)?.page_table())
    }
}

/// Allocate a zeroed page and map it at `va` in envid's address space.
///
/// If a page is already mapped at `va`, it is unmapped as a side effect.
pub fn sys_page_alloc(cx: &mut KernelCx, envid: u32, va: u32, perm: u32) -> KResult<i32> {
    let perm = syscall_perm(perm)?;
    let va = user_page_va(va)?;
    let idx = cx.envid2env(envid, true)?;
    let mut pgdir = cx.page_table_of(idx)?;
    let mem = &mut *cx.mem;
    let frame = mem.alloc(AllocFlags::ZERO).ok_or(KernelError::NoMem)?;
    if let Err(e) = pgdir.insert(mem, frame, va, perm) {
        // 插入失败，页面还没有任何引用
        mem.dealloc(frame);
        return Err(e);
    }
    Ok(0)
}

/// Map the page at `srcva` in srcenvid's address space at `dstva` in
/// dstenvid's address space with `perm`.
///
/// Read-only pages cannot be mapped writable.
pub fn sys_page_map(
    cx: &mut KernelCx,
    srcenvid: u32,
    srcva: u32,
    dstenvid: u32,
    dstva: u32,
    perm: u32,
) -> KResult<i32> {
    let src = cx.envid2env(srcenvid, true)?;
    let dst = cx.envid2env(dstenvid, true)?;
    let srcva = user_page_va(srcva)?;
    let dstva = user_page_va(dstva)?;
    let perm = syscall_perm(perm)?;

    let src_pgdir = cx.page_table_of(src)?;
    let mut dst_pgdir = cx.page_table_of(dst)?;
    let mem = &mut *cx.mem;
    let (frame, pte) = src_pgdir.lookup(mem, srcva).ok_or(KernelError::Inval)?;
    if perm.contains(PTEFlags::W) && !pte.is_writable() {
        return Err(KernelError::Inval);
    }
    dst_pgdir.insert(mem, frame, dstva, perm)?;
    Ok(0)
}

/// Unmap the page at `va`; succeeds silently when nothing is mapped.
pub fn sys_page_unmap(cx: &mut KernelCx, envid: u32, va: u32) -> KResult<i32> {
    let va = user_page_va(va)?;
    let idx = cx.envid2env(envid, true)?;
    let mut pgdir = cx.page_table_of(idx)?;
    pgdir.remove(&mut cx.mem, va);
    Ok(0)
}
