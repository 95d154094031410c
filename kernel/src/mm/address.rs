//! Physical and virtual addresses and page numbers of the 32-bit machine.
//!
//! A linear address splits as
//!
//! ```text
//! +--------10------+-------10-------+---------12----------+
//! | Page Directory |   Page Table   | Offset within Page  |
//! |      Index     |      Index     |                     |
//! +----------------+----------------+---------------------+
//!  \--- PDX(la) --/ \--- PTX(la) --/ \---- PGOFF(la) ----/
//!  \---------- PGNUM(la) ----------/
//! ```

use crate::config::{NPTENTRIES, PAGE_SIZE, PAGE_SIZE_BITS, PDX_SHIFT};
use core::fmt::{self, Debug, Formatter};
use core::ops::Range;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Default)]
/// Physical address. (32 bits)
pub struct PhysAddr(pub usize);

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Default)]
/// Virtual (linear) address. (32 bits)
pub struct VirtAddr(pub usize);

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
/// Physical page number. (20 bits) 物理页帧
pub struct PhysPageNum(pub usize);

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
/// Virtual page number. (20 bits) 虚拟页面
pub struct VirtPageNum(pub usize);

impl Debug for VirtAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("VA:{:#010x}", self.0))
    }
}
impl Debug for VirtPageNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("VPN:{:#x}", self.0))
    }
}
impl Debug for PhysAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("PA:{:#010x}", self.0))
    }
}
impl Debug for PhysPageNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("PPN:{:#x}", self.0))
    }
}

impl From<usize> for PhysAddr {
    fn from(v: usize) -> Self {
        Self(v)
    }
}
impl From<usize> for PhysPageNum {
    fn from(v: usize) -> Self {
        Self(v)
    }
}
impl From<usize> for VirtAddr {
    fn from(v: usize) -> Self {
        Self(v)
    }
}
impl From<u32> for VirtAddr {
    fn from(v: u32) -> Self {
        Self(v as usize)
    }
}
impl From<usize> for VirtPageNum {
    fn from(v: usize) -> Self {
        Self(v)
    }
}
impl From<PhysAddr> for usize {
    fn from(v: PhysAddr) -> Self {
        v.0
    }
}
impl From<VirtAddr> for usize {
    fn from(v: VirtAddr) -> Self {
        v.0
    }
}

impl VirtAddr {
    pub fn floor(&self) -> VirtPageNum {
        VirtPageNum(self.0 / PAGE_SIZE)
    }
    pub fn ceil(&self) -> VirtPageNum {
        // 先减 1 再加 PAGE_SIZE，避免地址空间顶端溢出
        if self.0 == 0 {
            return VirtPageNum(0);
        }
        VirtPageNum((self.0 - 1 + PAGE_SIZE) / PAGE_SIZE)
    }
    pub fn page_offset(&self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
    pub fn is_aligned(&self) -> bool {
        self.page_offset() == 0
    }
    /// page directory index
    pub fn pdx(&self) -> usize {
        (self.0 >> PDX_SHIFT) & 0x3FF
    }
    /// page table index
    pub fn ptx(&self) -> usize {
        (self.0 >> PAGE_SIZE_BITS) & 0x3FF
    }
    /// Build an address from directory index, table index and offset.
    pub fn from_indexes(pdx: usize, ptx: usize, offset: usize) -> Self {
        Self((pdx << PDX_SHIFT) | (ptx << PAGE_SIZE_BITS) | offset)
    }
}
impl From<VirtAddr> for VirtPageNum {
    fn from(va: VirtAddr) -> Self {
        va.floor()
    }
}
impl From<VirtPageNum> for VirtAddr {
    fn from(vpn: VirtPageNum) -> Self {
        Self(vpn.0 << PAGE_SIZE_BITS)
    }
}

impl PhysAddr {
    pub fn floor(&self) -> PhysPageNum {
        PhysPageNum(self.0 / PAGE_SIZE)
    }
    pub fn ceil(&self) -> PhysPageNum {
        if self.0 == 0 {
            return PhysPageNum(0);
        }
        PhysPageNum((self.0 - 1 + PAGE_SIZE) / PAGE_SIZE)
    }
    pub fn page_offset(&self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
    pub fn is_aligned(&self) -> bool {
        self.page_offset() == 0
    }
}
impl From<PhysAddr> for PhysPageNum {
    fn from(pa: PhysAddr) -> Self {
        pa.floor()
    }
}
impl From<PhysPageNum> for PhysAddr {
    fn from(ppn: PhysPageNum) -> Self {
        Self(ppn.0 << PAGE_SIZE_BITS)
    }
}

impl VirtPageNum {
    /// [pdx, ptx] of the page
    pub fn indexes(&self) -> [usize; 2] {
        [self.0 / NPTENTRIES, self.0 % NPTENTRIES]
    }
}

impl PhysPageNum {
    pub fn addr(&self) -> PhysAddr {
        (*self).into()
    }
}

/// Virtual pages `[start, end)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VPNRange {
    start: VirtPageNum,
    end: VirtPageNum,
}

impl VPNRange {
    pub fn new(start: VirtPageNum, end: VirtPageNum) -> Self {
        assert!(start <= end, "bad page range {:?}..{:?}", start, end);
        Self { start, end }
    }

    /// Pages touched by the byte range `[va, va + len)`.
    pub fn covering(va: VirtAddr, len: usize) -> Self {
        let end = VirtAddr(va.0 + len);
        Self::new(va.floor(), end.ceil())
    }

    pub fn start(&self) -> VirtPageNum {
        self.start
    }

    pub fn end(&self) -> VirtPageNum {
        self.end
    }
}

impl IntoIterator for VPNRange {
    type Item = VirtPageNum;
    type IntoIter = core::iter::Map<Range<usize>, fn(usize) -> VirtPageNum>;
    fn into_iter(self) -> Self::IntoIter {
        (self.start.0..self.end.0).map(VirtPageNum as fn(usize) -> VirtPageNum)
    }
}
