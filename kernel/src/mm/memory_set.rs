//! Kernel and environment address-space layout.
//!
//! [`KernelSpace`] builds `kern_pgdir` once at boot: the read-only windows
//! onto kernel bookkeeping (`UPAGES`, `UENVS`, `UVPT`), the per-CPU kernel
//! stacks and the `KERNBASE` remap of all physical memory. Every
//! [`MemorySet`] shares those mappings above `UTOP` and owns everything
//! below.

use super::frame_allocator::{page_init, AllocFlags, BootAllocator, FrameAllocator};
use super::page_table::copy_to_user;
use super::phys_memory::PhysMemory;
use super::{PTEFlags, PageTable, PageTableEntry};
use super::{PhysAddr, VPNRange, VirtAddr};
use crate::config::*;
use crate::error::{KResult, KernelError};
use alloc::vec::Vec;

fn round_up(bytes: usize) -> usize {
    (bytes + PAGE_SIZE - 1) / PAGE_SIZE * PAGE_SIZE
}

/// Static kernel mappings plus where the published tables live.
pub struct KernelSpace {
    /// kern_pgdir
    pub page_table: PageTable,
    /// physical home of the page descriptor records (mapped at `UPAGES`)
    pub pages_pa: PhysAddr,
    /// physical home of the environment records (mapped at `UENVS`)
    pub envs_pa: PhysAddr,
    /// physical bottom of every CPU's kernel stack
    pub kstacks: Vec<PhysAddr>,
}

impl KernelSpace {
    /// Carve the boot allocations out of memory, build the free list and
    /// set up `kern_pgdir`.
    pub fn new(mem: &mut PhysMemory, config: &KernelConfig) -> Self {
        let npages = mem.npages();
        let mut boot = BootAllocator::new(
            PhysAddr(EXTPHYSMEM + config.kernel_image_bytes),
            PhysAddr(npages * PAGE_SIZE),
        );

        // 这些内存紧跟在内核镜像之后，由 boot_alloc 一次性分配，永不回收
        let pgdir_pa = boot.alloc(PAGE_SIZE);
        let pages_pa = boot.alloc(npages * PAGE_RECORD_SIZE);
        let envs_pa = boot.alloc(NENV * ENV_RECORD_SIZE);
        let kstacks: Vec<PhysAddr> = (0..NCPU).map(|_| boot.alloc(KSTKSIZE)).collect();
        mem.fill(pgdir_pa, PAGE_SIZE, 0);

        page_init(mem, boot.end());

        let mut page_table = PageTable::from_token(pgdir_pa);

        // UVPT: 页目录把自己当作页表映射进来，用户态因此可以只读地查看页表
        page_table.write_pde(
            mem,
            VirtAddr(UVPT).pdx(),
            PageTableEntry::new(pgdir_pa.floor(), PTEFlags::U | PTEFlags::P),
        );
        page_table.boot_map_region(
            mem,
            VirtAddr(UPAGES),
            round_up(npages * PAGE_RECORD_SIZE),
            pages_pa,
            PTEFlags::U,
        );
        page_table.boot_map_region(
            mem,
            VirtAddr(UENVS),
            round_up(NENV * ENV_RECORD_SIZE),
            envs_pa,
            PTEFlags::U,
        );
        // 每个 CPU 的内核栈下方留出 KSTKGAP 不映射，作为 guard page
        for (cpu, kstack) in kstacks.iter().enumerate() {
            let (bottom, _) = kernel_stack_position(cpu);
            page_table.boot_map_region(mem, VirtAddr(bottom), KSTKSIZE, *kstack, PTEFlags::W);
        }
        page_table.boot_map_region(
            mem,
            VirtAddr(KERNBASE),
            npages * PAGE_SIZE,
            PhysAddr(0),
            PTEFlags::W,
        );
        debug!(
            "kern_pgdir at {:?}, pages at {:?}, envs at {:?}",
            pgdir_pa, pages_pa, envs_pa
        );

        Self {
            page_table,
            pages_pa,
            envs_pa,
            kstacks,
        }
    }

    /// Refresh the page descriptor records user space reads at `UPAGES`.
    pub fn publish_pages(&self, mem: &mut PhysMemory) {
        for ppn in 0..mem.npages() {
            let info = *mem.page_info(ppn.into());
            let link = info.pp_link.map_or(0, |next| next.0 as u32);
            let base = PhysAddr(self.pages_pa.0 + ppn * PAGE_RECORD_SIZE);
            mem.write_u32(base, link);
            mem.write_u32(PhysAddr(base.0 + 4), info.pp_ref as u32);
        }
    }
}

/// An environment's address space.
pub struct MemorySet {
    page_table: PageTable,
}

impl MemorySet {
    /// Fresh address space: kernel mappings above `UTOP`, nothing below,
    /// and `UVPT` pointing at its own directory.
    pub fn new_user(mem: &mut PhysMemory, kernel: &KernelSpace) -> KResult<Self> {
        let page_table = PageTable::new(mem)?;
        for pdx in VirtAddr(UTOP).pdx()..NPDENTRIES {
            let pde = kernel.page_table.read_pde(mem, pdx);
            page_table.write_pde(mem, pdx, pde);
        }
        page_table.write_pde(
            mem,
            VirtAddr(UVPT).pdx(),
            PageTableEntry::new(page_table.root_ppn(), PTEFlags::U | PTEFlags::P),
        );
        Ok(Self { page_table })
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn page_table_mut(&mut self) -> &mut PageTable {
        &mut self.page_table
    }

    pub fn token(&self) -> PhysAddr {
        self.page_table.token()
    }

    /// Back `[va, va+len)` with zeroed frames; pages already mapped are kept.
    pub fn region_alloc(
        &mut self,
        mem: &mut PhysMemory,
        va: VirtAddr,
        len: usize,
        perm: PTEFlags,
    ) -> KResult<()> {
        let end = va.0.checked_add(len).ok_or(KernelError::Inval)?;
        if end > UTOP {
            return Err(KernelError::Inval);
        }
        for vpn in VPNRange::covering(va, len) {
            let page_va = VirtAddr::from(vpn);
            if self.page_table.lookup(mem, page_va).is_some() {
                continue;
            }
            let frame = mem.alloc(AllocFlags::ZERO).ok_or(KernelError::NoMem)?;
            if let Err(e) = self.page_table.insert(mem, frame, page_va, perm) {
                mem.dealloc(frame);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Copy `data` to `va`; the pages must already be mapped.
    pub fn copy_data(&self, mem: &mut PhysMemory, va: VirtAddr, data: &[u8]) {
        copy_to_user(mem, &self.page_table, va, data);
    }

    /// Unmap every user page, then release the page tables and the
    /// directory itself.
    pub fn recycle(self, mem: &mut PhysMemory) {
        let mut page_table = self.page_table;
        for pdx in 0..VirtAddr(UTOP).pdx() {
            let pde = page_table.read_pde(mem, pdx);
            if !pde.is_valid() {
                continue;
            }
            for ptx in 0..NPTENTRIES {
                page_table.remove(mem, VirtAddr::from_indexes(pdx, ptx, 0));
            }
            page_table.write_pde(mem, pdx, PageTableEntry::empty());
            mem.decref(pde.ppn());
        }
        mem.decref(page_table.root_ppn());
    }

    /// Number of present user pages below `UTOP`.
    pub fn user_pages(&self, mem: &PhysMemory) -> usize {
        (0..VirtAddr(UTOP).pdx())
            .filter(|&pdx| self.page_table.read_pde(mem, pdx).is_valid())
            .map(|pdx| {
                (0..NPTENTRIES)
                    .filter(|&ptx| {
                        self.page_table
                            .lookup(mem, VirtAddr::from_indexes(pdx, ptx, 0))
                            .is_some()
                    })
                    .count()
            })
            .sum()
    }
}
