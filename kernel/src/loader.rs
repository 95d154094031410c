//! Loading program images into new environments.
//!
//! A [`ProgramImage`] is an already-parsed executable: an entry point and
//! a list of loadable segments, the way a `PT_LOAD` program header table
//! describes them. Whoever builds the image decides where the bytes came
//! from.

use crate::config::{PAGE_SIZE, USTACKTOP};
use crate::env::EnvStatus;
use crate::error::{KResult, KernelError};
use crate::kernel::KernelCx;
use crate::mm::{MemorySet, PTEFlags, PhysMemory, VirtAddr};
use alloc::vec::Vec;

/// 一个可加载段：文件中的字节放在 va 处，剩下的 mem_size - data.len() 字节清零
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub va: usize,
    pub data: Vec<u8>,
    pub mem_size: usize,
    pub writable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramImage {
    pub entry: usize,
    pub segments: Vec<Segment>,
}

impl ProgramImage {
    pub fn new(entry: usize) -> Self {
        Self {
            entry,
            segments: Vec::new(),
        }
    }

    /// Add a segment; `mem_size` is rounded up to cover `data`.
    pub fn segment(mut self, va: usize, data: &[u8], mem_size: usize, writable: bool) -> Self {
        self.segments.push(Segment {
            va,
            data: data.to_vec(),
            mem_size: mem_size.max(data.len()),
            writable,
        });
        self
    }

    /// Zero-filled segment, like `.bss`.
    pub fn bss(self, va: usize, mem_size: usize) -> Self {
        self.segment(va, &[], mem_size, true)
    }

    fn load(&self, ms: &mut MemorySet, mem: &mut PhysMemory) -> KResult<()> {
        for seg in self.segments.iter() {
            seg.va.checked_add(seg.mem_size).ok_or(KernelError::Inval)?;
            let mut perm = PTEFlags::U;
            if seg.writable {
                perm |= PTEFlags::W;
            }
            ms.region_alloc(mem, VirtAddr(seg.va), seg.mem_size, perm)?;
            ms.copy_data(mem, VirtAddr(seg.va), &seg.data);
        }
        // 为程序的初始栈映射一页
        ms.region_alloc(
            mem,
            VirtAddr(USTACKTOP - PAGE_SIZE),
            PAGE_SIZE,
            PTEFlags::U | PTEFlags::W,
        )
    }
}

impl KernelCx<'_> {
    /// Allocate a new env with `env_alloc`, load the image into it and
    /// mark it Runnable. The new env's parent id is 0.
    pub fn env_create(&mut self, image: &ProgramImage) -> KResult<usize> {
        let idx = self.env_alloc(0)?;
        if let Err(e) = self.load_icode(idx, image) {
            warn!("env_create: loading image failed: {}", e);
            self.env_free(idx);
            return Err(e);
        }
        let env = &mut self.st.envs[idx];
        env.tf.eip = image.entry as u32;
        env.status = EnvStatus::Runnable;
        Ok(idx)
    }

    fn load_icode(&mut self, idx: usize, image: &ProgramImage) -> KResult<()> {
        let st = &mut *self.st;
        let mem = &mut *self.mem;
        let ms = st.envs[idx]
            .memory_set
            .as_mut()
            .ok_or(KernelError::BadEnv)?;
        image.load(ms, mem)
    }
}
