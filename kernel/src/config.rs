//! Memory layout constants and boot-time configuration.
//!
//! The virtual layout follows the classic 32-bit two-level paging layout:
//!
//! ```text
//!  4 Gig -------->  +------------------------------+
//!                   |  Remapped physical memory    | RW/--
//!  KERNBASE ----->  +------------------------------+ 0xf0000000
//!                   |  CPU0's Kernel Stack + gap   | RW/--
//!                   |  ...                         |
//!  MMIOLIM ------>  +------------------------------+ 0xefc00000
//!                   |  Memory-mapped I/O           | RW/--
//!  ULIM, MMIOBASE > +------------------------------+ 0xef800000
//!                   |  Cur. Page Table (User R-)   | R-/R-
//!  UVPT  -------->  +------------------------------+ 0xef400000
//!                   |          RO PAGES            | R-/R-
//!  UPAGES ------->  +------------------------------+ 0xef000000
//!                   |           RO ENVS            | R-/R-
//!  UTOP,UENVS ----> +------------------------------+ 0xeec00000
//!  UXSTACKTOP -/    |     User Exception Stack     | RW/RW
//!                   +------------------------------+ 0xeebff000
//!                   |       Empty Memory (*)       | --/--
//!  USTACKTOP  --->  +------------------------------+ 0xeebfe000
//!                   |      Normal User Stack       | RW/RW
//!                   +------------------------------+ 0xeebfd000
//!                   ~           ......             ~
//!  UTEXT -------->  +------------------------------+ 0x00800000
//!  PFTEMP ------->  |       Empty Memory (*)       |
//!  UTEMP -------->  +------------------------------+ 0x00400000
//!                   |       Empty Memory (*)       |
//!  0 ------------>  +------------------------------+
//! ```

use lazy_static::*;

pub const PAGE_SIZE: usize = 1 << 12;
pub const PAGE_SIZE_BITS: usize = 0xc;

/// bytes mapped by a page directory entry
pub const PT_SIZE: usize = PAGE_SIZE * NPTENTRIES;
pub const PDX_SHIFT: usize = 22;

pub const NPDENTRIES: usize = 1024;
pub const NPTENTRIES: usize = 1024;

pub const KERNBASE: usize = 0xF000_0000;

// 每个 CPU 的内核栈之间留一个 guard gap，栈溢出时触发缺页而不是踩到别人的栈
pub const KSTACKTOP: usize = KERNBASE;
pub const KSTKSIZE: usize = 8 * PAGE_SIZE;
pub const KSTKGAP: usize = 8 * PAGE_SIZE;

pub const MMIOLIM: usize = KSTACKTOP - PT_SIZE;
pub const MMIOBASE: usize = MMIOLIM - PT_SIZE;

/// user-reachable ceiling used by the user memory checks
pub const ULIM: usize = MMIOBASE;

/// read-only window onto the current page table (self map)
pub const UVPT: usize = ULIM - PT_SIZE;
/// read-only copies of the page descriptor array
pub const UPAGES: usize = UVPT - PT_SIZE;
/// read-only copies of the environment table
pub const UENVS: usize = UPAGES - PT_SIZE;

/// nothing user-writable is ever mapped at or above UTOP
pub const UTOP: usize = UENVS;
pub const UXSTACKTOP: usize = UTOP;
pub const UXSTACKBASE: usize = UXSTACKTOP - PAGE_SIZE;
pub const USTACKTOP: usize = UTOP - 2 * PAGE_SIZE;

pub const UTEXT: usize = 2 * PT_SIZE;
pub const UTEMP: usize = PT_SIZE;
/// scratch page used by the copy-on-write fault handler
pub const PFTEMP: usize = UTEMP + PT_SIZE - PAGE_SIZE;

// 低 1MB 物理内存中的保留区域
pub const IOPHYSMEM: usize = 0x0A_0000;
pub const EXTPHYSMEM: usize = 0x10_0000;
/// physical page used to bootstrap application processors
pub const MPENTRY_PADDR: usize = 0x7000;

pub const LOG2NENV: usize = 10;
pub const NENV: usize = 1 << LOG2NENV;
pub const ENVGENSHIFT: usize = 12;

pub const NCPU: usize = 8;

/// bytes of each published environment record at `UENVS`
pub const ENV_RECORD_SIZE: usize = 64;
/// bytes of each published page descriptor at `UPAGES`
pub const PAGE_RECORD_SIZE: usize = 8;

/// capacity of the console input ring
pub const CONSBUFSIZE: usize = 512;
/// capacity of the io event queue
pub const IO_EVENT_QUEUE_SIZE: usize = 64;

pub const GRAPHICS_WIDTH: i32 = 800;
pub const GRAPHICS_HEIGHT: i32 = 600;

/// milliseconds per timer tick
pub const TICK_MS: u32 = 10;

/// Return (bottom, top) of a CPU's kernel stack in kernel space.
pub fn kernel_stack_position(cpu_id: usize) -> (usize, usize) {
    let top = KSTACKTOP - cpu_id * (KSTKSIZE + KSTKGAP);
    let bottom = top - KSTKSIZE;
    (bottom, top)
}

/// Machine description handed to the kernel at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// bytes of simulated physical memory
    pub mem_bytes: usize,
    /// number of CPUs brought up, at most [`NCPU`]
    pub ncpu: usize,
    /// bytes reserved for the kernel image at [`EXTPHYSMEM`]
    pub kernel_image_bytes: usize,
    /// keyboard input goes to the io event queue instead of the console ring
    pub graphics_console: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            mem_bytes: 32 << 20,
            ncpu: 1,
            kernel_image_bytes: 1 << 20,
            graphics_console: false,
        }
    }
}

impl KernelConfig {
    /// Read overrides baked in at build time: `EXO_MEM_MB`, `EXO_NCPU`, `EXO_GRAPHICS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(mb) = option_env!("EXO_MEM_MB").and_then(|s| s.parse::<usize>().ok()) {
            config.mem_bytes = mb << 20;
        }
        if let Some(n) = option_env!("EXO_NCPU").and_then(|s| s.parse::<usize>().ok()) {
            config.ncpu = n.clamp(1, NCPU);
        }
        if let Some(s) = option_env!("EXO_GRAPHICS") {
            config.graphics_console = matches!(s, "1" | "true" | "on");
        }
        config
    }

    pub fn npages(&self) -> usize {
        self.mem_bytes / PAGE_SIZE
    }
}

lazy_static! {
    /// configuration selected when the kernel was built
    pub static ref BOOT_CONFIG: KernelConfig = KernelConfig::from_env();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_classic_addresses() {
        assert_eq!(ULIM, 0xEF80_0000);
        assert_eq!(UVPT, 0xEF40_0000);
        assert_eq!(UPAGES, 0xEF00_0000);
        assert_eq!(UTOP, 0xEEC0_0000);
        assert_eq!(USTACKTOP, 0xEEBF_E000);
        assert_eq!(PFTEMP, 0x007F_F000);
        assert_eq!(UTEXT, 0x0080_0000);
    }

    #[test]
    fn kernel_stacks_leave_a_gap() {
        let (b0, t0) = kernel_stack_position(0);
        let (_, t1) = kernel_stack_position(1);
        assert_eq!(t0, KSTACKTOP);
        assert_eq!(t0 - b0, KSTKSIZE);
        assert_eq!(b0 - t1, KSTKGAP);
    }
}
