//! The kernel object and its locked context.
//!
//! [`Kernel`] owns all machine state. Host CPUs enter it through
//! [`Kernel::start_cpu`] and [`Kernel::trap`]; each call takes the big
//! kernel lock, runs to completion and hands back a [`Dispatch`] telling
//! the CPU which context to load next.

use crate::config::{KernelConfig, NCPU};
use crate::cpu::{Cpu, CpuStatus};
use crate::dev::{Devices, InputState};
use crate::env::{EnvId, EnvInfo, EnvManager, EnvStatus};
use crate::error::KResult;
use crate::loader::ProgramImage;
use crate::mm::{self, KernelSpace, PTEFlags, PageFault, PhysAddr, PhysMemory, PhysPageNum, VirtAddr};
use crate::sync::{BigKernelLock, BklGuard};
use crate::trap::TrapFrame;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use spin::{Mutex, MutexGuard};

/// 32-bit linear addresses leave room for at most this much RAM above KERNBASE.
pub const MAX_MEM_BYTES: usize = 256 << 20;

/// What a CPU does after leaving the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// load `cr3` and return to user mode with `tf`
    Run {
        env: EnvId,
        tf: TrapFrame,
        cr3: PhysAddr,
    },
    /// `hlt` until the next timer interrupt
    Halt,
    /// nothing left to run; drop into the monitor
    Monitor,
    /// the kernel panicked; stop this CPU
    Panic,
}

/// Everything protected by the big kernel lock.
pub struct KernelState {
    pub envs: EnvManager,
    pub cpus: Vec<Cpu>,
    pub kspace: KernelSpace,
    pub devices: Devices,
    pub input: InputState,
    /// timer interrupts seen by CPU 0
    pub ticks: u32,
}

pub struct Kernel {
    config: KernelConfig,
    bkl: BigKernelLock<KernelState>,
    memory: Mutex<PhysMemory>,
    /// per-CPU page fault linear address register
    cr2: [AtomicU32; NCPU],
    panicked: AtomicBool,
}

/// Kernel state borrowed by one CPU for the duration of a trap.
///
/// Holds the big kernel lock and the memory lock, always taken in that
/// order.
pub struct KernelCx<'a> {
    pub cpu: usize,
    pub st: BklGuard<'a, KernelState>,
    pub mem: MutexGuard<'a, PhysMemory>,
    kernel: &'a Kernel,
    /// leave through the scheduler instead of resuming curenv
    pub resched: bool,
}

impl Kernel {
    /// Boot: lay out physical memory, build `kern_pgdir`, set up the
    /// environment table and the CPU descriptors.
    pub fn new(config: KernelConfig, devices: Devices) -> Self {
        let mut config = config;
        config.mem_bytes = config.mem_bytes.min(MAX_MEM_BYTES);
        config.ncpu = config.ncpu.clamp(1, NCPU);

        let mut mem = PhysMemory::new(config.mem_bytes);
        let kspace = KernelSpace::new(&mut mem, &config);
        let kern_cr3 = kspace.page_table.token();
        let cpus = (0..config.ncpu).map(|id| Cpu::new(id, kern_cr3)).collect();
        info!(
            "Physical memory: {}K available, {} CPU(s)",
            config.mem_bytes / 1024,
            config.ncpu
        );

        Self {
            config,
            bkl: BigKernelLock::new(KernelState {
                envs: EnvManager::new(),
                cpus,
                kspace,
                devices,
                input: InputState::new(config.graphics_console),
                ticks: 0,
            }),
            memory: Mutex::new(mem),
            cr2: Default::default(),
            panicked: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// lock_kernel()
    fn enter(&self, cpu: usize) -> KernelCx<'_> {
        assert!(cpu < self.config.ncpu, "no such cpu {}", cpu);
        let st = self.bkl.lock(cpu);
        debug_assert_eq!(self.bkl.holder(), Some(cpu));
        let mem = self.memory.lock();
        KernelCx {
            cpu,
            st,
            mem,
            kernel: self,
            resched: false,
        }
    }

    /// Create a runnable environment from a program image, parented by
    /// nobody.
    pub fn create_env(&self, image: &ProgramImage) -> KResult<EnvId> {
        let mut cx = self.enter(0);
        let idx = cx.env_create(image)?;
        let id = cx.st.envs[idx].env_id;
        cx.publish();
        Ok(id)
    }

    /// Bring a CPU up and pick its first environment.
    pub fn start_cpu(&self, cpu: usize) -> Dispatch {
        if self.panicked() {
            return Dispatch::Panic;
        }
        let mut cx = self.enter(cpu);
        cx.st.cpus[cpu].status = CpuStatus::Started;
        info!("SMP: CPU {} starting", cpu);
        cx.sched_yield()
    }

    /// Trap entry: the CPU trapped with `tf` and `cr2` already latched.
    pub fn trap(&self, cpu: usize, tf: TrapFrame) -> Dispatch {
        if self.panicked() {
            return Dispatch::Panic;
        }
        let mut cx = self.enter(cpu);
        cx.trap(tf)
    }

    pub fn write_cr2(&self, cpu: usize, va: u32) {
        self.cr2[cpu].store(va, Ordering::Release);
    }

    pub fn read_cr2(&self, cpu: usize) -> u32 {
        self.cr2[cpu].load(Ordering::Acquire)
    }

    pub fn panicked(&self) -> bool {
        self.panicked.load(Ordering::Acquire)
    }

    /// User-mode load through the page tables rooted at `cr3`.
    pub fn user_load(&self, cr3: PhysAddr, va: VirtAddr, buf: &mut [u8]) -> Result<(), PageFault> {
        mm::user_load(&self.memory.lock(), cr3, va, buf)
    }

    /// User-mode store through the page tables rooted at `cr3`.
    pub fn user_store(&self, cr3: PhysAddr, va: VirtAddr, data: &[u8]) -> Result<(), PageFault> {
        mm::user_store(&mut self.memory.lock(), cr3, va, data)
    }

    // ---- inspection ----

    pub fn env_info(&self, id: EnvId) -> Option<EnvInfo> {
        let st = self.bkl.lock(0);
        st.envs.lookup(id).map(|idx| EnvInfo::from(&st.envs[idx]))
    }

    pub fn env_status(&self, id: EnvId) -> Option<EnvStatus> {
        self.env_info(id).map(|info| info.status)
    }

    /// Live (non-free) environments.
    pub fn env_count(&self) -> usize {
        let st = self.bkl.lock(0);
        st.envs.iter().filter(|e| e.status != EnvStatus::Free).count()
    }

    /// Frame and flags mapped at `va` in environment `id`.
    pub fn lookup(&self, id: EnvId, va: VirtAddr) -> Option<(PhysPageNum, PTEFlags)> {
        let st = self.bkl.lock(0);
        let mem = self.memory.lock();
        let idx = st.envs.lookup(id)?;
        let ms = st.envs[idx].memory_set.as_ref()?;
        ms.page_table()
            .lookup(&mem, va)
            .map(|(ppn, pte)| (ppn, pte.flags()))
    }

    pub fn page_ref(&self, ppn: PhysPageNum) -> u16 {
        self.memory.lock().page_ref(ppn)
    }

    pub fn free_pages(&self) -> usize {
        self.memory.lock().free_pages()
    }

    pub fn cpu_status(&self, cpu: usize) -> CpuStatus {
        self.bkl.lock(cpu).cpus[cpu].status
    }

    /// Environment currently owned by `cpu`.
    pub fn curenv(&self, cpu: usize) -> Option<EnvId> {
        let st = self.bkl.lock(cpu);
        st.cpus[cpu].curenv.map(|idx| st.envs[idx].env_id)
    }

    pub fn ticks(&self) -> u32 {
        self.bkl.lock(0).ticks
    }
}

impl KernelCx<'_> {
    /// Slot of this CPU's current environment.
    pub fn curenv(&self) -> Option<usize> {
        self.st.cpus[self.cpu].curenv
    }

    /// Id of this CPU's current environment, 0 if none.
    pub fn curenv_id(&self) -> EnvId {
        self.curenv().map_or(0, |idx| self.st.envs[idx].env_id)
    }

    pub fn this_cpu(&mut self) -> &mut Cpu {
        let cpu = self.cpu;
        &mut self.st.cpus[cpu]
    }

    /// Latched page fault address of this CPU.
    pub fn rcr2(&self) -> u32 {
        self.kernel.read_cr2(self.cpu)
    }

    /// Stop the whole machine: every later trap on any CPU gets
    /// [`Dispatch::Panic`].
    pub fn kernel_panic(&mut self, args: fmt::Arguments) {
        error!("kernel panic on CPU {}: {}", self.cpu, args);
        self.kernel.panicked.store(true, Ordering::Release);
    }

    pub fn panicked(&self) -> bool {
        self.kernel.panicked()
    }
}
