//! User-mode address translation as the paging hardware performs it.
//!
//! Every user load or store goes through [`user_load`] / [`user_store`];
//! a failed walk comes back as a [`PageFault`] carrying the faulting
//! address and the x86 error code, ready to be raised as `T_PGFLT`.

use super::page_table::PageTable;
use super::phys_memory::PhysMemory;
use super::{PTEFlags, PhysAddr, VPNRange, VirtAddr};
use crate::config::PAGE_SIZE;

/// Page fault error code: the fault was a protection violation
/// (clear means the page was not present).
pub const FEC_PR: u32 = 0x1;
/// the faulting access was a write
pub const FEC_WR: u32 = 0x2;
/// the fault happened in user mode
pub const FEC_U: u32 = 0x4;

/// What `cr2` and the error code would hold after the fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    pub va: VirtAddr,
    pub err: u32,
}

/// Walk the directory loaded in `cr3` for a user-mode access.
///
/// Both levels must be present and carry `U`; writes also need `W` at
/// both levels. No accessed/dirty bits are maintained.
pub fn translate(mem: &PhysMemory, cr3: PhysAddr, va: VirtAddr, write: bool) -> Result<PhysAddr, PageFault> {
    let mut err = FEC_U;
    if write {
        err |= FEC_WR;
    }
    let pgdir = PageTable::from_token(cr3);
    let pde = pgdir.read_pde(mem, va.pdx());
    if !pde.is_valid() {
        return Err(PageFault { va, err });
    }
    let pte = match pgdir.translate(mem, va.floor()) {
        Some(pte) if pte.is_valid() => pte,
        _ => return Err(PageFault { va, err }),
    };
    let mut need = PTEFlags::U | PTEFlags::P;
    if write {
        need |= PTEFlags::W;
    }
    if !pde.flags().contains(need) || !pte.flags().contains(need) {
        return Err(PageFault {
            va,
            err: err | FEC_PR,
        });
    }
    Ok(PhysAddr(PhysAddr::from(pte.ppn()).0 + va.page_offset()))
}

// 先把涉及的每一页都翻译一遍，全部成功才真正访问内存，保证出错时没有部分写入
fn check_range(
    mem: &PhysMemory,
    cr3: PhysAddr,
    va: VirtAddr,
    len: usize,
    write: bool,
) -> Result<(), PageFault> {
    for vpn in VPNRange::covering(va, len) {
        let page_va = VirtAddr::from(vpn);
        let probe = VirtAddr(page_va.0.max(va.0));
        translate(mem, cr3, probe, write)?;
    }
    Ok(())
}

/// Load `buf.len()` bytes from user address `va`.
pub fn user_load(mem: &PhysMemory, cr3: PhysAddr, va: VirtAddr, buf: &mut [u8]) -> Result<(), PageFault> {
    check_range(mem, cr3, va, buf.len(), false)?;
    let mut done = 0;
    while done < buf.len() {
        let cur = VirtAddr(va.0 + done);
        let chunk = (PAGE_SIZE - cur.page_offset()).min(buf.len() - done);
        let pa = translate(mem, cr3, cur, false)?;
        mem.read(pa, &mut buf[done..done + chunk]);
        done += chunk;
    }
    Ok(())
}

/// Store `data` at user address `va`; nothing is written if any page faults.
pub fn user_store(mem: &mut PhysMemory, cr3: PhysAddr, va: VirtAddr, data: &[u8]) -> Result<(), PageFault> {
    check_range(mem, cr3, va, data.len(), true)?;
    let mut done = 0;
    while done < data.len() {
        let cur = VirtAddr(va.0 + done);
        let chunk = (PAGE_SIZE - cur.page_offset()).min(data.len() - done);
        let pa = translate(mem, cr3, cur, true)?;
        mem.write(pa, &data[done..done + chunk]);
        done += chunk;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EXTPHYSMEM;
    use crate::mm::frame_allocator::{page_init, AllocFlags, BootAllocator, FrameAllocator};

    fn setup() -> (PhysMemory, PageTable) {
        let mut mem = PhysMemory::new(4 << 20);
        let boot = BootAllocator::new(PhysAddr(EXTPHYSMEM), PhysAddr(4 << 20));
        page_init(&mut mem, boot.end());
        let pgdir = PageTable::new(&mut mem).unwrap();
        (mem, pgdir)
    }

    #[test]
    fn missing_page_is_not_present_fault() {
        let (mem, pgdir) = setup();
        let fault = translate(&mem, pgdir.token(), VirtAddr(0x80_0000), true).unwrap_err();
        assert_eq!(fault.err, FEC_U | FEC_WR);
        assert_eq!(fault.va, VirtAddr(0x80_0000));
    }

    #[test]
    fn write_to_read_only_page_is_protection_fault() {
        let (mut mem, mut pgdir) = setup();
        let frame = mem.alloc(AllocFlags::ZERO).unwrap();
        pgdir.insert(&mut mem, frame, VirtAddr(0x80_0000), PTEFlags::U).unwrap();
        let cr3 = pgdir.token();
        assert!(translate(&mem, cr3, VirtAddr(0x80_0010), false).is_ok());
        let fault = user_store(&mut mem, cr3, VirtAddr(0x80_0010), b"x").unwrap_err();
        assert_eq!(fault.err, FEC_U | FEC_WR | FEC_PR);
    }

    #[test]
    fn supervisor_page_faults_from_user() {
        let (mut mem, mut pgdir) = setup();
        let frame = mem.alloc(AllocFlags::ZERO).unwrap();
        pgdir.insert(&mut mem, frame, VirtAddr(0x40_0000), PTEFlags::W).unwrap();
        let mut buf = [0u8; 4];
        let fault = user_load(&mem, pgdir.token(), VirtAddr(0x40_0000), &mut buf).unwrap_err();
        assert_eq!(fault.err, FEC_U | FEC_PR);
    }

    #[test]
    fn store_spanning_pages_is_all_or_nothing() {
        let (mut mem, mut pgdir) = setup();
        let frame = mem.alloc(AllocFlags::ZERO).unwrap();
        pgdir
            .insert(&mut mem, frame, VirtAddr(0x80_0000), PTEFlags::U | PTEFlags::W)
            .unwrap();
        let cr3 = pgdir.token();
        let fault = user_store(&mut mem, cr3, VirtAddr(0x80_0ffe), b"abcd").unwrap_err();
        assert_eq!(fault.va, VirtAddr(0x80_1000));
        let mut buf = [0u8; 2];
        user_load(&mem, cr3, VirtAddr(0x80_0ffe), &mut buf).unwrap();
        assert_eq!(buf, [0, 0]);
    }
}
