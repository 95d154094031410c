//! A user environment as its host thread sees it.
//!
//! User code never touches host memory directly: every load and store goes
//! through the kernel's page tables, and every way into the kernel is a
//! trap frame handed to the CPU the environment is running on. Between
//! traps the thread owns that CPU; inside a trap it blocks until some CPU
//! dispatches it again.

use crate::machine::Shared;
use crate::pgfault::{PgfaultHandler, PFENTRY};
use exo_kernel::mm::{PageFault, PhysAddr, VirtAddr};
use exo_kernel::syscall::SYS_ENV_DESTROY;
use exo_kernel::trap::{UTrapframe, IRQ_OFFSET, IRQ_TIMER, T_BRKPT, T_PGFLT, T_SYSCALL};
use exo_kernel::{EnvId, TrapFrame};
use std::panic;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

/// Message from a CPU to the thread of the environment it dispatched.
pub(crate) enum Resume {
    Run {
        cpu: usize,
        tf: TrapFrame,
        cr3: PhysAddr,
        /// where the next trap goes
        link: Sender<TrapFrame>,
    },
    /// the environment is gone; unwind the thread
    Kill,
}

/// Unwind payload of a thread whose environment no longer exists.
pub(crate) struct Killed;

pub struct UserEnv {
    id: EnvId,
    shared: Arc<Shared>,
    resume: Receiver<Resume>,
    link: Option<Sender<TrapFrame>>,
    cpu: usize,
    tf: TrapFrame,
    cr3: PhysAddr,
    /// user operations since the last trap
    ops: u32,
    pub(crate) pgfault_handler: Option<PgfaultHandler>,
}

impl UserEnv {
    pub(crate) fn new(
        id: EnvId,
        shared: Arc<Shared>,
        resume: Receiver<Resume>,
        pgfault_handler: Option<PgfaultHandler>,
    ) -> Self {
        Self {
            id,
            shared,
            resume,
            link: None,
            cpu: 0,
            tf: TrapFrame::default(),
            cr3: PhysAddr(0),
            ops: 0,
            pgfault_handler,
        }
    }

    /// thisenv->env_id
    pub fn id(&self) -> EnvId {
        self.id
    }

    /// CPU this environment was last dispatched on.
    pub fn cpu(&self) -> usize {
        self.cpu
    }

    pub fn registers(&self) -> &TrapFrame {
        &self.tf
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Block until a CPU runs this environment.
    pub(crate) fn wait_dispatch(&mut self) {
        match self.resume.recv() {
            Ok(Resume::Run { cpu, tf, cr3, link }) => {
                self.cpu = cpu;
                self.tf = tf;
                self.cr3 = cr3;
                self.link = Some(link);
                self.ops = 0;
            }
            Ok(Resume::Kill) | Err(_) => panic::resume_unwind(Box::new(Killed)),
        }
    }

    /// Trap with `tf` and wait to be dispatched again.
    fn enter_kernel(&mut self, tf: TrapFrame) {
        let link = match self.link.take() {
            Some(link) => link,
            None => panic::resume_unwind(Box::new(Killed)),
        };
        if link.send(tf).is_err() {
            panic::resume_unwind(Box::new(Killed));
        }
        self.wait_dispatch();
    }

    /// `int $T_SYSCALL`: number in `eax`, arguments in `edx, ecx, ebx, edi, esi`.
    pub(crate) fn syscall(&mut self, num: u32, args: [u32; 5]) -> i32 {
        let mut tf = self.tf;
        tf.trapno = T_SYSCALL;
        tf.regs.eax = num;
        tf.regs.edx = args[0];
        tf.regs.ecx = args[1];
        tf.regs.ebx = args[2];
        tf.regs.edi = args[3];
        tf.regs.esi = args[4];
        self.enter_kernel(tf);
        self.tf.regs.eax as i32
    }

    /// Count one user operation; the clock interrupts every `quantum` of them.
    fn tick(&mut self) {
        let quantum = self.shared.quantum;
        if quantum == 0 {
            return;
        }
        self.ops += 1;
        if self.ops >= quantum {
            let mut tf = self.tf;
            tf.trapno = IRQ_OFFSET + IRQ_TIMER;
            self.enter_kernel(tf);
        }
    }

    /// Busy work: `ops` user operations that touch no memory.
    pub fn compute(&mut self, ops: u32) {
        for _ in 0..ops {
            self.tick();
        }
    }

    fn page_fault(&mut self, fault: PageFault) {
        trace!("[{:08x}] fault at {:?} err {:#x}", self.id, fault.va, fault.err);
        let mut tf = self.tf;
        tf.trapno = T_PGFLT;
        tf.err = fault.err;
        self.shared.kernel.write_cr2(self.cpu, fault.va.0 as u32);
        self.enter_kernel(tf);
        // 内核把控制转交给了用户态的缺页处理入口
        if self.tf.eip == PFENTRY {
            self.pgfault_upcall();
        }
    }

    /// Load `buf.len()` bytes at `va`, faulting as often as it takes.
    pub fn read(&mut self, va: usize, buf: &mut [u8]) {
        self.tick();
        loop {
            match self.shared.kernel.user_load(self.cr3, VirtAddr(va), buf) {
                Ok(()) => return,
                Err(fault) => self.page_fault(fault),
            }
        }
    }

    pub fn write(&mut self, va: usize, data: &[u8]) {
        self.tick();
        loop {
            match self.shared.kernel.user_store(self.cr3, VirtAddr(va), data) {
                Ok(()) => return,
                Err(fault) => self.page_fault(fault),
            }
        }
    }

    pub fn read_u32(&mut self, va: usize) -> u32 {
        let mut word = [0u8; 4];
        self.read(va, &mut word);
        u32::from_le_bytes(word)
    }

    pub fn write_u32(&mut self, va: usize, value: u32) {
        self.write(va, &value.to_le_bytes());
    }

    /// NUL-terminated string at `va`, at most `max` bytes.
    pub fn read_cstr(&mut self, va: usize, max: usize) -> String {
        let mut bytes = vec![0u8; max];
        self.read(va, &mut bytes);
        let len = bytes.iter().position(|&b| b == 0).unwrap_or(max);
        String::from_utf8_lossy(&bytes[..len]).into_owned()
    }

    /// strcpy
    pub fn write_cstr(&mut self, va: usize, s: &str) {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.write(va, &bytes);
    }

    /// Return from the page-fault upcall to the interrupted context, the
    /// way the entry stub pops the `UTrapframe`.
    pub(crate) fn restore(&mut self, utf: &UTrapframe) {
        self.tf.regs = utf.regs;
        self.tf.eip = utf.eip;
        self.tf.eflags = utf.eflags;
        self.tf.esp = utf.esp;
    }

    /// `int3`: drop into the kernel monitor, or leave virtual-8086 mode.
    pub fn breakpoint(&mut self) {
        let mut tf = self.tf;
        tf.trapno = T_BRKPT;
        self.enter_kernel(tf);
    }

    /// Destroy this environment. Never returns.
    pub fn exit(&mut self) -> ! {
        let _ = self.sys_env_destroy(0);
        panic::resume_unwind(Box::new(Killed))
    }

    /// Hand the CPU back with a self-destroy from a thread that is
    /// unwinding; nothing waits for the answer.
    pub(crate) fn abort(&mut self) {
        if let Some(link) = self.link.take() {
            let mut tf = self.tf;
            tf.trapno = T_SYSCALL;
            tf.regs.eax = SYS_ENV_DESTROY;
            tf.regs.edx = 0;
            let _ = link.send(tf);
        }
    }
}
