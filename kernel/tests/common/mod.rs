//! A bare CPU driver for the kernel: no user library, no threads.
//!
//! Each [`Cpu`] remembers the last [`Dispatch`] the kernel gave it and
//! feeds hand-built trap frames back in.

#![allow(dead_code)]

use exo_kernel::config::{PAGE_SIZE, UTEXT};
use exo_kernel::console::{init_console, Console};
use exo_kernel::mm::{PageFault, PhysAddr, VirtAddr, FEC_PR, FEC_U, FEC_WR};
use exo_kernel::trap::{GD_KD, GD_KT, IRQ_OFFSET, IRQ_TIMER, T_BRKPT, T_PGFLT, T_SYSCALL};
use exo_kernel::{Devices, Dispatch, EnvId, Kernel, KernelConfig, ProgramImage, TrapFrame};

pub use exo_kernel::syscall::*;

struct Stdout;

impl Console for Stdout {
    fn put_char(&self, c: u8) {
        print!("{}", c as char);
    }

    fn put_str(&self, s: &str) {
        print!("{}", s);
    }
}

static STDOUT: Stdout = Stdout;

pub const PTE_P: u32 = 0x1;
pub const PTE_W: u32 = 0x2;
pub const PTE_U: u32 = 0x4;
pub const PTE_COW: u32 = 0x800;
pub const PTE_UW: u32 = PTE_U | PTE_P | PTE_W;
pub const PTE_UR: u32 = PTE_U | PTE_P;

pub fn boot_with(config: KernelConfig) -> Kernel {
    init_console(&STDOUT);
    exo_kernel::logging::init();
    Kernel::new(config, Devices::default())
}

pub fn boot(ncpu: usize) -> Kernel {
    boot_with(KernelConfig {
        mem_bytes: 16 << 20,
        ncpu,
        ..KernelConfig::default()
    })
}

/// One read-only text page and one data page.
pub fn image() -> ProgramImage {
    ProgramImage::new(UTEXT + 0x20)
        .segment(UTEXT, &[0x90; 64], PAGE_SIZE, false)
        .bss(UTEXT + PAGE_SIZE, PAGE_SIZE)
}

pub fn spawn(kernel: &Kernel) -> EnvId {
    kernel.create_env(&image()).expect("create_env")
}

pub struct Cpu<'a> {
    pub kernel: &'a Kernel,
    pub id: usize,
    pub dispatch: Dispatch,
}

impl<'a> Cpu<'a> {
    pub fn start(kernel: &'a Kernel, id: usize) -> Self {
        let dispatch = kernel.start_cpu(id);
        Self {
            kernel,
            id,
            dispatch,
        }
    }

    /// Environment this CPU was told to run.
    pub fn running(&self) -> Option<EnvId> {
        match self.dispatch {
            Dispatch::Run { env, .. } => Some(env),
            _ => None,
        }
    }

    fn user_frame(&self) -> (EnvId, TrapFrame, PhysAddr) {
        match self.dispatch {
            Dispatch::Run { env, tf, cr3 } => (env, tf, cr3),
            other => panic!("CPU {} is not running user code: {:?}", self.id, other),
        }
    }

    pub fn cr3(&self) -> PhysAddr {
        self.user_frame().2
    }

    /// Trap with `tf` and remember where the kernel sends us.
    pub fn trap(&mut self, tf: TrapFrame) -> Dispatch {
        self.dispatch = self.kernel.trap(self.id, tf);
        self.dispatch
    }

    /// `int $T_SYSCALL` from the running environment; returns what it sees
    /// in `eax` (0 if it no longer exists).
    pub fn syscall(&mut self, num: u32, args: &[u32]) -> i32 {
        let (env, mut tf, _) = self.user_frame();
        let mut a = [0u32; 5];
        a[..args.len()].copy_from_slice(args);
        tf.trapno = T_SYSCALL;
        tf.regs.eax = num;
        tf.regs.edx = a[0];
        tf.regs.ecx = a[1];
        tf.regs.ebx = a[2];
        tf.regs.edi = a[3];
        tf.regs.esi = a[4];
        self.trap(tf);
        self.kernel
            .env_info(env)
            .map_or(0, |info| info.tf.regs.eax as i32)
    }

    pub fn timer(&mut self) -> Dispatch {
        let mut tf = match self.dispatch {
            Dispatch::Run { tf, .. } => tf,
            _ => kernel_frame(),
        };
        tf.trapno = IRQ_OFFSET + IRQ_TIMER;
        self.trap(tf)
    }

    pub fn breakpoint(&mut self) -> Dispatch {
        let (_, mut tf, _) = self.user_frame();
        tf.trapno = T_BRKPT;
        self.trap(tf)
    }

    /// User-mode page fault at `va`.
    pub fn page_fault(&mut self, va: u32, write: bool, present: bool) -> Dispatch {
        let (_, mut tf, _) = self.user_frame();
        tf.trapno = T_PGFLT;
        tf.err = FEC_U;
        if write {
            tf.err |= FEC_WR;
        }
        if present {
            tf.err |= FEC_PR;
        }
        self.kernel.write_cr2(self.id, va);
        self.trap(tf)
    }

    pub fn load(&self, va: usize, buf: &mut [u8]) -> Result<(), PageFault> {
        self.kernel.user_load(self.cr3(), VirtAddr(va), buf)
    }

    pub fn store(&self, va: usize, data: &[u8]) -> Result<(), PageFault> {
        self.kernel.user_store(self.cr3(), VirtAddr(va), data)
    }

    /// Run until `env` is dispatched here, ticking the timer.
    pub fn run_until(&mut self, env: EnvId) {
        for _ in 0..64 {
            if self.running() == Some(env) {
                return;
            }
            self.timer();
        }
        panic!("env {:08x} never scheduled on CPU {}", env, self.id);
    }
}

/// Frame of a CPU idling in the kernel.
pub fn kernel_frame() -> TrapFrame {
    TrapFrame {
        cs: GD_KT,
        ds: GD_KD,
        es: GD_KD,
        ss: GD_KD,
        ..TrapFrame::default()
    }
}
