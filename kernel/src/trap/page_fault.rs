//! Page fault delivery to user-level handlers.

use super::{TrapFrame, UTrapframe, UTRAPFRAME_SIZE};
use crate::config::{UXSTACKBASE, UXSTACKTOP};
use crate::kernel::KernelCx;
use crate::mm::{copy_to_user, PTEFlags, VirtAddr};

impl KernelCx<'_> {
    /// Handle a page fault.
    ///
    /// Kernel-mode faults are fatal. A user environment with a registered
    /// upcall gets a [`UTrapframe`] pushed on its exception stack and
    /// resumes in the upcall; without one it is destroyed.
    pub fn page_fault_handler(&mut self, tf: &TrapFrame) {
        let fault_va = self.rcr2();

        if !tf.from_user() {
            print!("{}", tf);
            self.kernel_panic(format_args!("kernel page fault va {:08x}", fault_va));
            return;
        }
        let cur = match self.curenv() {
            Some(cur) => cur,
            None => return,
        };

        let upcall = self.st.envs[cur].pgfault_upcall;
        if upcall == 0 {
            // Destroy the environment that caused the fault.
            println!(
                "[{:08x}] user fault va {:08x} ip {:08x}",
                self.st.envs[cur].env_id, fault_va, tf.eip
            );
            print!("{}", tf);
            self.env_destroy(cur);
            return;
        }

        // 已经在异常栈上（处理函数自身缺页），在当前 esp 下面先空出一个字再压入
        let esp = tf.esp as usize;
        let utf_va = if (UXSTACKBASE..UXSTACKTOP).contains(&esp) {
            esp - 4 - UTRAPFRAME_SIZE
        } else {
            UXSTACKTOP - UTRAPFRAME_SIZE
        };
        // 异常栈没映射、不可写或者溢出，都会在这里销毁环境
        if self
            .user_mem_assert(cur, VirtAddr(utf_va), UTRAPFRAME_SIZE, PTEFlags::W)
            .is_err()
        {
            return;
        }

        let utf = UTrapframe {
            fault_va,
            err: tf.err,
            regs: tf.regs,
            eip: tf.eip,
            eflags: tf.eflags,
            esp: tf.esp,
        };
        let st = &mut *self.st;
        let env = &mut st.envs[cur];
        if let Some(ms) = env.memory_set.as_ref() {
            copy_to_user(&mut self.mem, ms.page_table(), VirtAddr(utf_va), &utf.to_bytes());
        }
        env.tf.eip = upcall;
        env.tf.esp = utf_va as u32;
        trace!(
            "[{:08x}] page fault va {:08x} delivered to upcall {:08x}",
            env.env_id,
            fault_va,
            upcall
        );
    }
}
