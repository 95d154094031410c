//! Simulated physical memory.
//!
//! RAM is a flat byte array; page directories and page tables live inside it
//! as little-endian `u32` entries, exactly where a real MMU would look for
//! them. Next to the bytes sits one [`PageInfo`] per frame.

use super::{PhysAddr, PhysPageNum};
use crate::config::PAGE_SIZE;
use alloc::vec;
use alloc::vec::Vec;

/// Per-frame descriptor: reference count plus free-list link.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageInfo {
    /// number of page table entries naming this frame
    pub pp_ref: u16,
    /// next frame on the free list, valid only while free
    pub(super) pp_link: Option<PhysPageNum>,
    pub(super) free: bool,
}

pub struct PhysMemory {
    ram: Vec<u8>,
    pub(super) pages: Vec<PageInfo>,
    pub(super) free_list: Option<PhysPageNum>,
    pub(super) nfree: usize,
}

impl PhysMemory {
    /// `bytes` is rounded down to whole pages.
    pub fn new(bytes: usize) -> Self {
        let npages = bytes / PAGE_SIZE;
        Self {
            ram: vec![0u8; npages * PAGE_SIZE],
            pages: vec![PageInfo::default(); npages],
            free_list: None,
            nfree: 0,
        }
    }

    pub fn npages(&self) -> usize {
        self.pages.len()
    }

    pub fn free_pages(&self) -> usize {
        self.nfree
    }

    pub fn page_info(&self, ppn: PhysPageNum) -> &PageInfo {
        &self.pages[ppn.0]
    }

    pub fn page_ref(&self, ppn: PhysPageNum) -> u16 {
        self.pages[ppn.0].pp_ref
    }

    pub fn is_free(&self, ppn: PhysPageNum) -> bool {
        self.pages[ppn.0].free
    }

    pub fn read_u32(&self, pa: PhysAddr) -> u32 {
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.ram[pa.0..pa.0 + 4]);
        u32::from_le_bytes(word)
    }

    pub fn write_u32(&mut self, pa: PhysAddr, value: u32) {
        self.ram[pa.0..pa.0 + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn read(&self, pa: PhysAddr, buf: &mut [u8]) {
        buf.copy_from_slice(&self.ram[pa.0..pa.0 + buf.len()]);
    }

    pub fn write(&mut self, pa: PhysAddr, data: &[u8]) {
        self.ram[pa.0..pa.0 + data.len()].copy_from_slice(data);
    }

    pub fn fill(&mut self, pa: PhysAddr, len: usize, byte: u8) {
        self.ram[pa.0..pa.0 + len].fill(byte);
    }

    /// The 4K bytes of a frame.
    pub fn frame(&self, ppn: PhysPageNum) -> &[u8] {
        let base = PhysAddr::from(ppn).0;
        &self.ram[base..base + PAGE_SIZE]
    }

    pub fn frame_mut(&mut self, ppn: PhysPageNum) -> &mut [u8] {
        let base = PhysAddr::from(ppn).0;
        &mut self.ram[base..base + PAGE_SIZE]
    }

    pub fn zero_frame(&mut self, ppn: PhysPageNum) {
        self.frame_mut(ppn).fill(0);
    }

    pub fn copy_frame(&mut self, src: PhysPageNum, dst: PhysPageNum) {
        let src_base = PhysAddr::from(src).0;
        let dst_base = PhysAddr::from(dst).0;
        self.ram.copy_within(src_base..src_base + PAGE_SIZE, dst_base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_are_little_endian() {
        let mut mem = PhysMemory::new(4 * PAGE_SIZE);
        mem.write_u32(PhysAddr(0x1004), 0x1122_3344);
        assert_eq!(mem.frame(PhysPageNum(1))[4..8], [0x44, 0x33, 0x22, 0x11]);
        assert_eq!(mem.read_u32(PhysAddr(0x1004)), 0x1122_3344);
    }

    #[test]
    fn copy_frame_duplicates_contents() {
        let mut mem = PhysMemory::new(4 * PAGE_SIZE);
        mem.write(PhysAddr(0x2000), b"HELLO");
        mem.copy_frame(PhysPageNum(2), PhysPageNum(3));
        assert_eq!(&mem.frame(PhysPageNum(3))[..5], b"HELLO");
    }
}
