mod common;

use common::*;
use exo_kernel::{CpuStatus, Dispatch, EnvStatus, KernelError};

#[test]
fn round_robin_on_timer() {
    let kernel = boot(1);
    let envs = [spawn(&kernel), spawn(&kernel), spawn(&kernel)];
    let mut cpu = Cpu::start(&kernel, 0);
    let mut order = vec![cpu.running().unwrap()];
    for _ in 0..5 {
        cpu.timer();
        order.push(cpu.running().unwrap());
    }
    assert_eq!(
        order,
        vec![envs[0], envs[1], envs[2], envs[0], envs[1], envs[2]]
    );
    assert_eq!(kernel.env_info(envs[0]).unwrap().runs, 2);
    assert_eq!(kernel.ticks(), 5);
    assert_eq!(cpu.syscall(SYS_TIME_MSEC, &[]), 50);
}

#[test]
fn lone_env_keeps_running_after_yield() {
    let kernel = boot(1);
    let env = spawn(&kernel);
    let mut cpu = Cpu::start(&kernel, 0);
    assert_eq!(cpu.syscall(SYS_YIELD, &[]), 0);
    assert_eq!(cpu.running(), Some(env));
    assert_eq!(kernel.env_status(env), Some(EnvStatus::Running));
}

#[test]
fn never_runs_an_env_owned_by_another_cpu() {
    let kernel = boot(2);
    let a = spawn(&kernel);
    let b = spawn(&kernel);
    let mut cpu0 = Cpu::start(&kernel, 0);
    let mut cpu1 = Cpu::start(&kernel, 1);
    assert_eq!(cpu0.running(), Some(a));
    assert_eq!(cpu1.running(), Some(b));

    for _ in 0..4 {
        cpu0.timer();
        assert_eq!(cpu0.running(), Some(a));
        cpu1.syscall(SYS_YIELD, &[]);
        assert_eq!(cpu1.running(), Some(b));
    }
    // 只有 CPU 0 推进时钟
    assert_eq!(kernel.ticks(), 4);
    assert_eq!(kernel.curenv(0), Some(a));
    assert_eq!(kernel.curenv(1), Some(b));
}

#[test]
fn idle_cpu_halts_and_wakes() {
    let kernel = boot(2);
    let parent = spawn(&kernel);
    let mut cpu0 = Cpu::start(&kernel, 0);
    let mut cpu1 = Cpu::start(&kernel, 1);
    assert_eq!(cpu1.dispatch, Dispatch::Halt);
    assert_eq!(kernel.cpu_status(1), CpuStatus::Halted);

    let child = cpu0.syscall(SYS_EXOFORK, &[]) as u32;
    assert_eq!(kernel.env_info(child).unwrap().parent_id, parent);
    assert_eq!(cpu1.timer(), Dispatch::Halt);
    assert_eq!(cpu0.syscall(SYS_ENV_SET_STATUS, &[child, 2]), 0);
    cpu1.timer();
    assert_eq!(cpu1.running(), Some(child));
    assert_eq!(kernel.cpu_status(1), CpuStatus::Started);
}

#[test]
fn destroy_while_running_elsewhere() {
    let kernel = boot(2);
    let parent = spawn(&kernel);
    let mut cpu0 = Cpu::start(&kernel, 0);
    let mut cpu1 = Cpu::start(&kernel, 1);
    let child = cpu0.syscall(SYS_EXOFORK, &[]) as u32;
    assert_eq!(cpu0.syscall(SYS_ENV_SET_STATUS, &[child, 2]), 0);
    cpu1.timer();
    assert_eq!(cpu1.running(), Some(child));

    assert_eq!(cpu0.syscall(SYS_ENV_DESTROY, &[child]), 0);
    assert_eq!(kernel.env_status(child), Some(EnvStatus::Dying));
    // 濒死的环境不会被复活
    assert_eq!(cpu0.syscall(SYS_ENV_SET_STATUS, &[child, 2]), 0);
    assert_eq!(kernel.env_status(child), Some(EnvStatus::Dying));

    // CPU 1 下一次陷入内核时回收它
    assert_eq!(cpu1.syscall(SYS_GETENVID, &[]), 0);
    assert!(kernel.env_info(child).is_none());
    assert_eq!(cpu1.dispatch, Dispatch::Halt);
    assert_eq!(cpu0.running(), Some(parent));
}

#[test]
fn destroy_parked_env_still_executing_elsewhere() {
    let kernel = boot(2);
    let parent = spawn(&kernel);
    let mut cpu0 = Cpu::start(&kernel, 0);
    let mut cpu1 = Cpu::start(&kernel, 1);
    let child = cpu0.syscall(SYS_EXOFORK, &[]) as u32;
    assert_eq!(cpu0.syscall(SYS_ENV_SET_STATUS, &[child, 2]), 0);
    cpu1.timer();
    assert_eq!(cpu1.running(), Some(child));

    // 父进程把它停下，但它仍在 CPU 1 上执行
    assert_eq!(cpu0.syscall(SYS_ENV_SET_STATUS, &[child, 4]), 0);
    assert_eq!(kernel.env_status(child), Some(EnvStatus::NotRunnable));
    assert_eq!(cpu0.syscall(SYS_ENV_DESTROY, &[child]), 0);
    assert_eq!(kernel.env_status(child), Some(EnvStatus::Dying));
    assert_eq!(kernel.curenv(1), Some(child));

    assert_eq!(cpu1.timer(), Dispatch::Halt);
    assert!(kernel.env_info(child).is_none());
    assert_eq!(cpu0.running(), Some(parent));
    assert_eq!(cpu0.syscall(SYS_YIELD, &[]), 0);
    assert_eq!(cpu0.running(), Some(parent));
}

#[test]
fn last_exit_enters_monitor() {
    let kernel = boot(1);
    let env = spawn(&kernel);
    let mut cpu = Cpu::start(&kernel, 0);
    assert_eq!(cpu.syscall(SYS_GETENVID, &[]) as u32, env);
    assert_eq!(cpu.syscall(SYS_ENV_DESTROY, &[0]), 0);
    assert_eq!(cpu.dispatch, Dispatch::Monitor);
    assert_eq!(kernel.env_count(), 0);
}

#[test]
fn stale_and_foreign_ids_are_rejected() {
    let kernel = boot(1);
    let a = spawn(&kernel);
    let b = spawn(&kernel);
    let mut cpu = Cpu::start(&kernel, 0);
    assert_eq!(cpu.running(), Some(a));
    let bad_env = KernelError::BadEnv.as_ret();

    // b 不是 a 的子环境
    assert_eq!(cpu.syscall(SYS_ENV_DESTROY, &[b]), bad_env);
    assert_eq!(cpu.syscall(SYS_PAGE_ALLOC, &[b, 0x4000_0000, PTE_UW]), bad_env);

    let child = cpu.syscall(SYS_EXOFORK, &[]) as u32;
    assert_eq!(cpu.syscall(SYS_ENV_DESTROY, &[child]), 0);
    assert!(kernel.env_info(child).is_none());
    assert_eq!(cpu.syscall(SYS_ENV_SET_STATUS, &[child, 2]), bad_env);

    // 同一个槽位再分配出去，旧的 id 仍然无效
    let again = cpu.syscall(SYS_EXOFORK, &[]) as u32;
    assert_ne!(again, child);
    assert_eq!(again & 0x3ff, child & 0x3ff);
    assert_eq!(cpu.syscall(SYS_ENV_SET_PGFAULT_UPCALL, &[child, 0x80_0000]), bad_env);
    assert_eq!(cpu.syscall(SYS_ENV_SET_STATUS, &[again, 9]), KernelError::Inval.as_ret());
}

#[test]
fn env_table_exhaustion() {
    let kernel = boot(1);
    spawn(&kernel);
    let mut cpu = Cpu::start(&kernel, 0);
    let mut children = 0;
    let ret = loop {
        let ret = cpu.syscall(SYS_EXOFORK, &[]);
        if ret < 0 {
            break ret;
        }
        children += 1;
    };
    assert_eq!(ret, KernelError::NoFreeEnv.as_ret());
    assert_eq!(children, exo_kernel::config::NENV - 1);
}

#[test]
fn unknown_syscall_is_invalid() {
    let kernel = boot(1);
    spawn(&kernel);
    let mut cpu = Cpu::start(&kernel, 0);
    assert_eq!(cpu.syscall(NSYSCALLS, &[]), KernelError::Inval.as_ret());
    assert_eq!(cpu.syscall(SYS_MAP_LFB, &[]), KernelError::Inval.as_ret());
    assert_eq!(cpu.syscall(SYS_GET_IDE_IO_BASE, &[]), KernelError::NoDisk.as_ret());
    assert_eq!(cpu.syscall(SYS_CGETC, &[]), 0);
}
