//! Trap handling functionality
//!
//! Every way into the kernel from a CPU, syscalls, faults and device
//! interrupts alike, arrives at [`Kernel::trap`](crate::Kernel::trap) with
//! a [`TrapFrame`]. [`KernelCx::trap`] saves the frame into the current
//! environment, dispatches on the trap number and picks what runs next.

mod context;
mod page_fault;

use crate::cpu::CpuStatus;
use crate::dev::MonitorAction;
use crate::env::EnvStatus;
use crate::kernel::{Dispatch, KernelCx};
use crate::syscall::syscall;

pub use context::{
    trapname, PushRegs, TrapFrame, UTrapframe, FL_IF, FL_IOPL_MASK, FL_VM, GD_KD, GD_KT,
    GD_TSS0, GD_UD, GD_UT, TRAPFRAME_SIZE, UTRAPFRAME_SIZE,
};

// 处理器定义的异常向量
pub const T_DIVIDE: u32 = 0;
pub const T_DEBUG: u32 = 1;
pub const T_NMI: u32 = 2;
pub const T_BRKPT: u32 = 3;
pub const T_OFLOW: u32 = 4;
pub const T_BOUND: u32 = 5;
pub const T_ILLOP: u32 = 6;
pub const T_DEVICE: u32 = 7;
pub const T_DBLFLT: u32 = 8;
pub const T_TSS: u32 = 10;
pub const T_SEGNP: u32 = 11;
pub const T_STACK: u32 = 12;
pub const T_GPFLT: u32 = 13;
pub const T_PGFLT: u32 = 14;
pub const T_FPERR: u32 = 16;
pub const T_ALIGN: u32 = 17;
pub const T_MCHK: u32 = 18;
pub const T_SIMDERR: u32 = 19;

/// system call vector
pub const T_SYSCALL: u32 = 48;

/// IRQ 0 corresponds to int IRQ_OFFSET
pub const IRQ_OFFSET: u32 = 32;

pub const IRQ_TIMER: u32 = 0;
pub const IRQ_KBD: u32 = 1;
pub const IRQ_SERIAL: u32 = 4;
pub const IRQ_SPURIOUS: u32 = 7;
pub const IRQ_MOUSE: u32 = 12;
pub const IRQ_IDE: u32 = 14;
pub const IRQ_ERROR: u32 = 19;

/// Decoded trap cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    PageFault,
    Breakpoint,
    Syscall,
    Irq(u32),
    /// any other exception vector
    Exception(u32),
}

impl Trap {
    pub fn decode(trapno: u32) -> Self {
        match trapno {
            T_PGFLT => Trap::PageFault,
            T_BRKPT => Trap::Breakpoint,
            T_SYSCALL => Trap::Syscall,
            n if (IRQ_OFFSET..IRQ_OFFSET + 16).contains(&n) => Trap::Irq(n - IRQ_OFFSET),
            n => Trap::Exception(n),
        }
    }
}

impl KernelCx<'_> {
    /// Handle one trap and decide what this CPU runs next.
    pub fn trap(&mut self, tf: TrapFrame) -> Dispatch {
        if tf.from_user() {
            // Trapped from user mode.
            let cur = match self.curenv() {
                Some(cur) => cur,
                None => {
                    self.kernel_panic(format_args!("trap from user mode with no current env"));
                    return Dispatch::Panic;
                }
            };
            if self.st.envs[cur].status == EnvStatus::Dying {
                // 其他 CPU 在它运行时销毁了它，现在由本 CPU 回收
                self.env_free(cur);
                return self.sched_yield();
            }
            // 保存 trap frame，之后从这里恢复运行
            self.st.envs[cur].tf = tf;
        } else if self.this_cpu().status == CpuStatus::Halted {
            self.this_cpu().status = CpuStatus::Started;
        }

        self.trap_dispatch(&tf);
        if self.panicked() {
            return Dispatch::Panic;
        }
        self.trap_exit()
    }

    fn trap_dispatch(&mut self, tf: &TrapFrame) {
        match Trap::decode(tf.trapno) {
            Trap::PageFault => self.page_fault_handler(tf),
            Trap::Syscall if tf.from_user() => {
                let r = &tf.regs;
                let ret = syscall(self, r.eax, [r.edx, r.ecx, r.ebx, r.edi, r.esi]);
                // 返回值放进 eax；调用者若已不在运行（销毁、阻塞）则无所谓
                if let Some(cur) = self.curenv() {
                    self.st.envs[cur].tf.regs.eax = ret as u32;
                }
            }
            Trap::Breakpoint => self.breakpoint_handler(tf),
            Trap::Irq(IRQ_TIMER) => {
                // 只有 CPU 0 维护全局时钟
                if self.cpu == 0 {
                    self.st.ticks = self.st.ticks.wrapping_add(1);
                }
                self.resched = true;
            }
            Trap::Irq(IRQ_KBD) | Trap::Irq(IRQ_MOUSE) => {
                let st = &mut *self.st;
                st.devices.drain_keyboard_and_mouse(&mut st.input);
            }
            Trap::Irq(IRQ_SERIAL) => {
                let st = &mut *self.st;
                st.devices.drain_serial(&mut st.input);
            }
            Trap::Irq(IRQ_SPURIOUS) => {
                println!("spurious interrupt on irq 7");
                print!("{}", tf);
            }
            _ => {
                // Unexpected trap: The user process or the kernel has a bug.
                println!("TRAP frame on CPU {}", self.cpu);
                print!("{}", tf);
                if !tf.from_user() {
                    self.kernel_panic(format_args!("unhandled trap in kernel"));
                } else if let Some(cur) = self.curenv() {
                    self.env_destroy(cur);
                }
            }
        }
    }

    fn breakpoint_handler(&mut self, tf: &TrapFrame) {
        if let Some(cur) = self.curenv() {
            let env = &mut self.st.envs[cur];
            if tf.eflags & FL_VM != 0 {
                if let Some(mut saved) = env.v86_saved.take() {
                    // 虚拟 8086 调用结束，回到 sys_v86 之后，返回 0
                    saved.regs.eax = 0;
                    env.tf = saved;
                    return;
                }
            }
        }
        match self.st.devices.monitor.enter(Some(tf)) {
            MonitorAction::Continue => {}
            MonitorAction::Kill => match self.curenv() {
                Some(cur) if tf.from_user() => self.env_destroy(cur),
                _ => self.kernel_panic(format_args!("monitor killed the kernel")),
            },
        }
    }

    /// Leave the kernel: free a dying curenv, resume a running one, or
    /// let the scheduler choose.
    fn trap_exit(&mut self) -> Dispatch {
        match self.curenv() {
            Some(cur) if self.st.envs[cur].status == EnvStatus::Dying => {
                self.env_free(cur);
                self.sched_yield()
            }
            Some(cur) if self.st.envs[cur].status == EnvStatus::Running && !self.resched => {
                self.env_run(cur)
            }
            _ => self.sched_yield(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_irqs_and_exceptions() {
        assert_eq!(Trap::decode(IRQ_OFFSET + IRQ_TIMER), Trap::Irq(IRQ_TIMER));
        assert_eq!(Trap::decode(IRQ_OFFSET + IRQ_MOUSE), Trap::Irq(12));
        assert_eq!(Trap::decode(T_SYSCALL), Trap::Syscall);
        assert_eq!(Trap::decode(T_GPFLT), Trap::Exception(13));
        assert_eq!(trapname(T_SYSCALL), "System call");
        assert_eq!(trapname(IRQ_OFFSET + 1), "Hardware Interrupt");
    }
}
