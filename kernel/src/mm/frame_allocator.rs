//! Implementation of [`FrameAllocator`] which
//! controls all the frames in the operating system.
//!
//! Frames are tracked by reference count: every page table entry naming a
//! frame holds one reference, and a frame goes back on the free list the
//! moment its last reference is dropped.

use super::phys_memory::PhysMemory;
use super::{PhysAddr, PhysPageNum};
use crate::config::{EXTPHYSMEM, IOPHYSMEM, MPENTRY_PADDR, PAGE_SIZE};
use crate::error::{KResult, KernelError};
use bitflags::*;

bitflags! {
    pub struct AllocFlags: u32 {
        /// fill the frame with zeroes before handing it out
        const ZERO = 1 << 0;
    }
}

/// 物理页帧管理器，以物理页号为单位进行物理页帧的分配和回收
pub trait FrameAllocator {
    fn alloc(&mut self, flags: AllocFlags) -> Option<PhysPageNum>;
    fn dealloc(&mut self, ppn: PhysPageNum);
    /// Take one more reference; fails with `NoMem` once the count is saturated.
    fn incref(&mut self, ppn: PhysPageNum) -> KResult<()>;
    /// Drop one reference, freeing the frame when none are left.
    fn decref(&mut self, ppn: PhysPageNum);
}

impl FrameAllocator for PhysMemory {
    /// 从空闲链表头部取出一个物理页帧；链表为空时返回 None
    fn alloc(&mut self, flags: AllocFlags) -> Option<PhysPageNum> {
        let ppn = self.free_list?;
        let info = &mut self.pages[ppn.0];
        self.free_list = info.pp_link.take();
        info.free = false;
        self.nfree -= 1;
        if flags.contains(AllocFlags::ZERO) {
            self.zero_frame(ppn);
        }
        Some(ppn)
    }

    fn dealloc(&mut self, ppn: PhysPageNum) {
        let info = &mut self.pages[ppn.0];
        // 回收页面合法的两个条件：没有任何引用，并且不在空闲链表上
        if info.pp_ref != 0 || info.free {
            panic!(
                "Frame {:?} freed while in use (ref={}, free={})",
                ppn, info.pp_ref, info.free
            );
        }
        info.pp_link = self.free_list;
        info.free = true;
        self.free_list = Some(ppn);
        self.nfree += 1;
    }

    fn incref(&mut self, ppn: PhysPageNum) -> KResult<()> {
        let info = &mut self.pages[ppn.0];
        info.pp_ref = info.pp_ref.checked_add(1).ok_or(KernelError::NoMem)?;
        Ok(())
    }

    fn decref(&mut self, ppn: PhysPageNum) {
        let info = &mut self.pages[ppn.0];
        assert!(info.pp_ref > 0, "decref of unreferenced frame {:?}", ppn);
        info.pp_ref -= 1;
        if info.pp_ref == 0 {
            self.dealloc(ppn);
        }
    }
}

/// Bump allocator used before the free list exists.
///
/// Hands out physical memory right after the kernel image; everything it
/// returns stays reserved forever.
pub struct BootAllocator {
    next: PhysAddr,
    limit: PhysAddr,
}

impl BootAllocator {
    pub fn new(kernel_end: PhysAddr, limit: PhysAddr) -> Self {
        Self {
            next: PhysAddr(kernel_end.ceil().0 * PAGE_SIZE),
            limit,
        }
    }

    /// Reserve `bytes` rounded up to whole pages.
    ///
    /// Running out here means the machine is too small to boot at all.
    pub fn alloc(&mut self, bytes: usize) -> PhysAddr {
        let start = self.next;
        let end = PhysAddr(start.0 + bytes).ceil();
        if PhysAddr::from(end) > self.limit {
            panic!("boot_alloc: out of memory allocating {:#x} bytes", bytes);
        }
        self.next = end.into();
        start
    }

    /// first byte not handed out yet
    pub fn end(&self) -> PhysAddr {
        self.next
    }
}

/// Build the free list from every frame the platform leaves usable.
///
/// Skipped frames:
///  - page 0 (real-mode IDT and BIOS data)
///  - the AP bootstrap page at `MPENTRY_PADDR`
///  - the IO hole `[IOPHYSMEM, EXTPHYSMEM)`
///  - `[EXTPHYSMEM, boot_end)`: kernel image plus boot allocations
pub fn page_init(mem: &mut PhysMemory, boot_end: PhysAddr) {
    let first_free_ext = boot_end.ceil().0;
    let reserved = |ppn: usize| {
        let pa = ppn * PAGE_SIZE;
        ppn == 0
            || pa == MPENTRY_PADDR
            || (IOPHYSMEM..EXTPHYSMEM).contains(&pa)
            || (pa >= EXTPHYSMEM && ppn < first_free_ext)
    };
    for ppn in 0..mem.npages() {
        if reserved(ppn) {
            // 保留页的引用计数置 1，保证它们永远不会被回收
            mem.pages[ppn].pp_ref = 1;
            continue;
        }
        mem.dealloc(PhysPageNum(ppn));
    }
    info!(
        "page_init: {} of {} frames free",
        mem.free_pages(),
        mem.npages()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn small_memory() -> PhysMemory {
        // 2MB：低 1MB + 1MB 扩展内存
        let mut mem = PhysMemory::new(2 << 20);
        let mut boot = BootAllocator::new(PhysAddr(EXTPHYSMEM + 0x8000), PhysAddr(2 << 20));
        boot.alloc(3 * PAGE_SIZE);
        page_init(&mut mem, boot.end());
        mem
    }

    #[test]
    fn reserved_regions_never_handed_out() {
        let mut mem = small_memory();
        let mut seen = Vec::new();
        while let Some(ppn) = mem.alloc(AllocFlags::empty()) {
            seen.push(ppn.0 * PAGE_SIZE);
        }
        assert!(!seen.contains(&0));
        assert!(!seen.contains(&MPENTRY_PADDR));
        assert!(seen.iter().all(|pa| !(IOPHYSMEM..EXTPHYSMEM).contains(pa)));
        assert!(seen
            .iter()
            .all(|pa| !(EXTPHYSMEM..EXTPHYSMEM + 0xB000).contains(pa)));
        assert!(seen.contains(&(EXTPHYSMEM + 0xB000)));
        assert_eq!(mem.free_pages(), 0);
    }

    #[test]
    fn freed_frame_is_reused_and_zeroed() {
        let mut mem = small_memory();
        let before = mem.free_pages();
        let ppn = mem.alloc(AllocFlags::empty()).unwrap();
        mem.incref(ppn).unwrap();
        mem.frame_mut(ppn)[0] = 0xAA;
        mem.decref(ppn);
        assert_eq!(mem.free_pages(), before);
        let again = mem.alloc(AllocFlags::ZERO).unwrap();
        assert_eq!(again, ppn);
        assert_eq!(mem.frame(again)[0], 0);
    }

    #[test]
    fn saturated_refcount_refuses_another_reference() {
        let mut mem = small_memory();
        let ppn = mem.alloc(AllocFlags::empty()).unwrap();
        mem.pages[ppn.0].pp_ref = u16::MAX - 1;
        assert_eq!(mem.incref(ppn), Ok(()));
        assert_eq!(mem.incref(ppn), Err(KernelError::NoMem));
        assert_eq!(mem.page_ref(ppn), u16::MAX);
    }

    #[test]
    #[should_panic]
    fn double_free_panics() {
        let mut mem = small_memory();
        let ppn = mem.alloc(AllocFlags::empty()).unwrap();
        mem.dealloc(ppn);
        mem.dealloc(ppn);
    }
}
