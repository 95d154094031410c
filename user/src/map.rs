//! Read-only views of the kernel's tables: `uvpd`, `uvpt` and `pages`.

use crate::env::UserEnv;
use exo_kernel::config::{NPTENTRIES, PAGE_RECORD_SIZE, PAGE_SIZE, PDX_SHIFT, UPAGES, UTOP, UVPT};
use exo_kernel::mm::{PTEFlags, PageTableEntry, VirtAddr};

/// `uvpd`: the page directory, seen through its own slot
const UVPD: usize = UVPT + (UVPT >> PDX_SHIFT) * PAGE_SIZE;
/// offset of `pp_ref` in a `UPAGES` record
const REC_REF: usize = 4;

impl UserEnv {
    /// `uvpd[pdx]`
    pub fn uvpd(&mut self, pdx: usize) -> PageTableEntry {
        PageTableEntry {
            bits: self.read_u32(UVPD + pdx * 4),
        }
    }

    /// `uvpt[pn]`; only meaningful when the directory entry is present.
    pub fn uvpt(&mut self, pn: usize) -> PageTableEntry {
        PageTableEntry {
            bits: self.read_u32(UVPT + pn * 4),
        }
    }

    /// Entry mapping `va`, if its page table exists.
    pub fn pte_of(&mut self, va: usize) -> Option<PageTableEntry> {
        let va = VirtAddr(va);
        if !self.uvpd(va.pdx()).flags().contains(PTEFlags::P) {
            return None;
        }
        Some(self.uvpt(va.0 / PAGE_SIZE))
    }

    /// Number of mappings of the frame behind `va`; 0 if `va` is unmapped.
    pub fn pageref(&mut self, va: usize) -> u32 {
        match self.pte_of(va) {
            Some(pte) if pte.is_valid() => {
                let at = UPAGES + pte.ppn().0 * PAGE_RECORD_SIZE + REC_REF;
                self.read_u32(at)
            }
            _ => 0,
        }
    }

    /// Every present user page below `UTOP` as `(va, pte)`, in address order.
    pub fn user_mappings(&mut self) -> Vec<(usize, PageTableEntry)> {
        let mut out = Vec::new();
        for pdx in 0..VirtAddr(UTOP).pdx() {
            if !self.uvpd(pdx).flags().contains(PTEFlags::P) {
                continue;
            }
            for ptx in 0..NPTENTRIES {
                let pn = pdx * NPTENTRIES + ptx;
                let pte = self.uvpt(pn);
                if pte.is_valid() {
                    out.push((pn * PAGE_SIZE, pte));
                }
            }
        }
        out
    }
}

/// Print the caller's user mappings: writable, copy-on-write or read-only.
pub fn print_process_mappings(env: &mut UserEnv) {
    let me = env.id();
    uprintln!(env, "--- map for process 0x{:x} ---", me);
    for (va, pte) in env.user_mappings() {
        let flags = pte.flags();
        let kind = if flags.contains(PTEFlags::W) {
            "rw"
        } else if flags.contains(PTEFlags::COW) {
            "rC"
        } else {
            "r-"
        };
        uprintln!(env, "0x{:08x} {}  -> pa 0x{:x}", va, kind, pte.ppn().0 * PAGE_SIZE);
    }
}
