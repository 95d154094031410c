//! Two-level x86 page tables stored in simulated RAM.
//!
//! A [`PageTable`] is nothing but the frame number of its page directory;
//! every entry is read and written through [`PhysMemory`], so the same
//! tables are what the MMU walks and what user space sees through `UVPT`.

use super::frame_allocator::{AllocFlags, FrameAllocator};
use super::phys_memory::PhysMemory;
use super::{PhysAddr, PhysPageNum, VPNRange, VirtAddr, VirtPageNum};
use crate::config::{PAGE_SIZE, ULIM};
use crate::error::{KResult, KernelError};
use bitflags::*;

bitflags! {
    pub struct PTEFlags: u32 {
        /// Present
        const P = 0x001;
        /// Writeable
        const W = 0x002;
        /// User
        const U = 0x004;
        /// Write-Through
        const PWT = 0x008;
        /// Cache-Disable
        const PCD = 0x010;
        /// Accessed
        const A = 0x020;
        /// Dirty
        const D = 0x040;
        /// Page Size
        const PS = 0x080;
        /// Global
        const G = 0x100;
        /// Available for software use
        const AVAIL = 0xE00;
        /// 共享页：fork 时原样映射，不做写时复制
        const SHARE = 0x400;
        /// 写时复制标记
        const COW = 0x800;
        /// Flags in SYSCALL may be used in system calls.
        const SYSCALL = Self::AVAIL.bits | Self::P.bits | Self::W.bits | Self::U.bits;
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(C)]
/// Page table entry: frame number in the top 20 bits, flags in the low 12
pub struct PageTableEntry {
    pub bits: u32,
}

impl PageTableEntry {
    pub fn new(ppn: PhysPageNum, flags: PTEFlags) -> Self {
        PageTableEntry {
            bits: ((ppn.0 as u32) << 12) | flags.bits(),
        }
    }

    pub fn empty() -> Self {
        PageTableEntry { bits: 0 }
    }

    pub fn ppn(&self) -> PhysPageNum {
        PhysPageNum((self.bits >> 12) as usize)
    }

    pub fn flags(&self) -> PTEFlags {
        PTEFlags::from_bits_truncate(self.bits & 0xFFF)
    }

    pub fn is_valid(&self) -> bool {
        self.flags().contains(PTEFlags::P)
    }

    pub fn is_writable(&self) -> bool {
        self.flags().contains(PTEFlags::W)
    }

    pub fn is_user(&self) -> bool {
        self.flags().contains(PTEFlags::U)
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PTE({:?}, {:?})", self.ppn(), self.flags())
    }
}

/// 每个地址空间对应一个页目录，用页目录所在的物理页号 root_ppn 来区分
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTable {
    root_ppn: PhysPageNum,
}

impl PageTable {
    /// Allocate an empty page directory holding one reference on itself.
    pub fn new(mem: &mut PhysMemory) -> KResult<Self> {
        let frame = mem.alloc(AllocFlags::ZERO).ok_or(KernelError::NoMem)?;
        mem.incref(frame)?;
        Ok(Self { root_ppn: frame })
    }

    /// Wrap an existing directory (e.g. the one loaded in `cr3`) without
    /// taking ownership of anything.
    pub fn from_token(cr3: PhysAddr) -> Self {
        Self {
            root_ppn: cr3.floor(),
        }
    }

    /// value to load into `cr3`
    pub fn token(&self) -> PhysAddr {
        self.root_ppn.into()
    }

    pub fn root_ppn(&self) -> PhysPageNum {
        self.root_ppn
    }

    fn pde_addr(&self, pdx: usize) -> PhysAddr {
        PhysAddr(PhysAddr::from(self.root_ppn).0 + pdx * 4)
    }

    pub fn read_pde(&self, mem: &PhysMemory, pdx: usize) -> PageTableEntry {
        PageTableEntry {
            bits: mem.read_u32(self.pde_addr(pdx)),
        }
    }

    pub fn write_pde(&self, mem: &mut PhysMemory, pdx: usize, pde: PageTableEntry) {
        mem.write_u32(self.pde_addr(pdx), pde.bits);
    }

    /// Physical address of the PTE slot for `vpn`, if its page table exists.
    pub fn find_pte(&self, mem: &PhysMemory, vpn: VirtPageNum) -> Option<PhysAddr> {
        let [pdx, ptx] = vpn.indexes();
        let pde = self.read_pde(mem, pdx);
        if !pde.is_valid() {
            return None;
        }
        Some(PhysAddr(PhysAddr::from(pde.ppn()).0 + ptx * 4))
    }

    /// Like [`find_pte`](Self::find_pte) but allocates the page table when
    /// missing. `None` means no frame was left for it.
    pub fn find_pte_or_create(
        &mut self,
        mem: &mut PhysMemory,
        vpn: VirtPageNum,
    ) -> Option<PhysAddr> {
        let [pdx, ptx] = vpn.indexes();
        let mut pde = self.read_pde(mem, pdx);
        if !pde.is_valid() {
            let frame = mem.alloc(AllocFlags::ZERO)?;
            mem.incref(frame).ok()?;
            // 页目录项给足权限，真正的限制由页表项决定
            pde = PageTableEntry::new(frame, PTEFlags::P | PTEFlags::W | PTEFlags::U);
            self.write_pde(mem, pdx, pde);
        }
        Some(PhysAddr(PhysAddr::from(pde.ppn()).0 + ptx * 4))
    }

    pub fn translate(&self, mem: &PhysMemory, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.find_pte(mem, vpn).map(|slot| PageTableEntry {
            bits: mem.read_u32(slot),
        })
    }

    /// Frame and entry mapped at `va`, if any.
    pub fn lookup(&self, mem: &PhysMemory, va: VirtAddr) -> Option<(PhysPageNum, PageTableEntry)> {
        self.translate(mem, va.floor())
            .filter(|pte| pte.is_valid())
            .map(|pte| (pte.ppn(), pte))
    }

    /// Map `ppn` at `va` with `perm | P`.
    ///
    /// Whatever was mapped at `va` before is removed. The new reference is
    /// taken before the old one is dropped, so re-inserting the frame that
    /// is already there (to change permissions) keeps its count unchanged.
    pub fn insert(
        &mut self,
        mem: &mut PhysMemory,
        ppn: PhysPageNum,
        va: VirtAddr,
        perm: PTEFlags,
    ) -> KResult<()> {
        let slot = self
            .find_pte_or_create(mem, va.floor())
            .ok_or(KernelError::NoMem)?;
        let old = PageTableEntry {
            bits: mem.read_u32(slot),
        };
        // 同一页重新映射只改权限，不动引用计数
        if !(old.is_valid() && old.ppn() == ppn) {
            mem.incref(ppn)?;
            if old.is_valid() {
                self.remove(mem, va);
            }
        }
        mem.write_u32(slot, PageTableEntry::new(ppn, perm | PTEFlags::P).bits);
        Ok(())
    }

    /// Unmap `va`; a no-op when nothing is mapped there.
    pub fn remove(&mut self, mem: &mut PhysMemory, va: VirtAddr) {
        let slot = match self.find_pte(mem, va.floor()) {
            Some(slot) => slot,
            None => return,
        };
        let pte = PageTableEntry {
            bits: mem.read_u32(slot),
        };
        if !pte.is_valid() {
            return;
        }
        mem.write_u32(slot, 0);
        mem.decref(pte.ppn());
    }

    /// Map `[va, va+size)` to `[pa, pa+size)` without touching reference
    /// counts. Only for static kernel mappings set up at boot.
    pub fn boot_map_region(
        &mut self,
        mem: &mut PhysMemory,
        va: VirtAddr,
        size: usize,
        pa: PhysAddr,
        perm: PTEFlags,
    ) {
        assert!(va.is_aligned() && pa.is_aligned() && size % PAGE_SIZE == 0);
        for off in (0..size).step_by(PAGE_SIZE) {
            let vpn = VirtAddr(va.0 + off).floor();
            let slot = self
                .find_pte_or_create(mem, vpn)
                .unwrap_or_else(|| panic!("boot_map_region: out of memory at {:?}", vpn));
            let frame = PhysAddr(pa.0 + off).floor();
            mem.write_u32(slot, PageTableEntry::new(frame, perm | PTEFlags::P).bits);
        }
    }

    /// Check that user code may access `[va, va+len)` with `perm`.
    ///
    /// Every page must sit below `ULIM` and be mapped with `perm | U | P`.
    /// On failure returns the first offending address: `va` itself when the
    /// first page is bad, otherwise the start of the bad page.
    pub fn user_mem_check(
        &self,
        mem: &PhysMemory,
        va: VirtAddr,
        len: usize,
        perm: PTEFlags,
    ) -> Result<(), VirtAddr> {
        if len == 0 {
            return Ok(());
        }
        let need = perm | PTEFlags::U | PTEFlags::P;
        let end = va.0.saturating_add(len);
        let limit = end.min(ULIM);
        if va.0 < limit {
            for vpn in VPNRange::covering(va, limit - va.0) {
                let page_va = VirtAddr::from(vpn);
                let ok = self
                    .translate(mem, vpn)
                    .map_or(false, |pte| pte.flags().contains(need));
                if !ok {
                    return Err(VirtAddr(page_va.0.max(va.0)));
                }
            }
        }
        // 越过 ULIM 的部分一律拒绝，哪怕起始地址本身合法
        if end > ULIM {
            return Err(VirtAddr(va.0.max(ULIM)));
        }
        Ok(())
    }
}

/// Copy `data` into the address space at `va`.
///
/// The range must already have passed [`PageTable::user_mem_check`].
pub fn copy_to_user(mem: &mut PhysMemory, pgdir: &PageTable, va: VirtAddr, data: &[u8]) {
    let mut done = 0;
    while done < data.len() {
        let cur = VirtAddr(va.0 + done);
        let chunk = (PAGE_SIZE - cur.page_offset()).min(data.len() - done);
        let (ppn, _) = pgdir
            .lookup(mem, cur)
            .unwrap_or_else(|| panic!("copy_to_user: {:?} not mapped", cur));
        let pa = PhysAddr(PhysAddr::from(ppn).0 + cur.page_offset());
        mem.write(pa, &data[done..done + chunk]);
        done += chunk;
    }
}

/// Copy from the address space at `va` into `buf`; same contract as
/// [`copy_to_user`].
pub fn copy_from_user(mem: &PhysMemory, pgdir: &PageTable, va: VirtAddr, buf: &mut [u8]) {
    let mut done = 0;
    while done < buf.len() {
        let cur = VirtAddr(va.0 + done);
        let chunk = (PAGE_SIZE - cur.page_offset()).min(buf.len() - done);
        let (ppn, _) = pgdir
            .lookup(mem, cur)
            .unwrap_or_else(|| panic!("copy_from_user: {:?} not mapped", cur));
        let pa = PhysAddr(PhysAddr::from(ppn).0 + cur.page_offset());
        mem.read(pa, &mut buf[done..done + chunk]);
        done += chunk;
    }
}
