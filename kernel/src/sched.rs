//! Round-robin scheduler.

use crate::config::NENV;
use crate::cpu::CpuStatus;
use crate::env::EnvStatus;
use crate::kernel::{Dispatch, KernelCx};

impl KernelCx<'_> {
    /// Choose a user environment and run it.
    ///
    /// Search circularly starting just after the slot this CPU ran last,
    /// and take the first Runnable environment. If none is found but the
    /// current environment is still Running, keep it. Otherwise halt.
    pub fn sched_yield(&mut self) -> Dispatch {
        let start = self.st.cpus[self.cpu].last_env.map_or(0, |last| last + 1);
        let next = (0..NENV).map(|i| (start + i) % NENV).find(|&idx| {
            let env = &self.st.envs[idx];
            // 绝不选择正在其他 CPU 上运行的环境
            env.status == EnvStatus::Runnable && env.cpu.map_or(true, |c| c == self.cpu)
        });
        let next = next.or_else(|| {
            self.curenv()
                .filter(|&cur| self.st.envs[cur].status == EnvStatus::Running)
        });
        match next {
            Some(idx) => self.env_run(idx),
            None => self.sched_halt(),
        }
    }

    /// Context switch to environment `idx`.
    pub fn env_run(&mut self, idx: usize) -> Dispatch {
        let cpu = self.cpu;
        if let Some(prev) = self.curenv() {
            if prev != idx {
                let prev_env = &mut self.st.envs[prev];
                if prev_env.status == EnvStatus::Running {
                    prev_env.status = EnvStatus::Runnable;
                }
                prev_env.cpu = None;
            }
        }

        let env = &mut self.st.envs[idx];
        env.status = EnvStatus::Running;
        env.runs += 1;
        env.cpu = Some(cpu);
        let env_id = env.env_id;
        let tf = env.tf;
        let cr3 = match env.memory_set.as_ref() {
            Some(ms) => ms.token(),
            None => {
                self.kernel_panic(format_args!("env_run: env {:08x} has no page directory", env_id));
                return Dispatch::Panic;
            }
        };

        let this = self.this_cpu();
        this.curenv = Some(idx);
        this.last_env = Some(idx);
        this.cr3 = cr3;
        self.publish();
        trace!("CPU {} runs env {:08x} eip {:#x}", cpu, env_id, tf.eip);
        Dispatch::Run {
            env: env_id,
            tf,
            cr3,
        }
    }

    /// Nothing to run on this CPU.
    ///
    /// If no environment in the whole system can run again, drop into the
    /// monitor; otherwise idle until a timer interrupt.
    pub fn sched_halt(&mut self) -> Dispatch {
        let alive = self.st.envs.iter().any(|env| {
            matches!(
                env.status,
                EnvStatus::Runnable | EnvStatus::Running | EnvStatus::Dying
            )
        });
        if !alive {
            println!("No runnable environments in the system!");
            self.st.devices.monitor.enter(None);
            return Dispatch::Monitor;
        }

        if let Some(cur) = self.curenv() {
            self.st.envs[cur].cpu = None;
        }
        let kern_cr3 = self.st.kspace.page_table.token();
        let this = self.this_cpu();
        this.curenv = None;
        this.cr3 = kern_cr3;
        this.status = CpuStatus::Halted;
        Dispatch::Halt
    }
}
