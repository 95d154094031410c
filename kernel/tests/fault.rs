mod common;

use common::*;
use exo_kernel::config::{PAGE_SIZE, UTEXT, UXSTACKBASE, UXSTACKTOP};
use exo_kernel::mm::{FEC_U, FEC_WR};
use exo_kernel::trap::{
    UTrapframe, FL_IOPL_MASK, FL_VM, GD_KT, GD_UT, T_GPFLT, T_ILLOP, TRAPFRAME_SIZE,
    UTRAPFRAME_SIZE,
};
use exo_kernel::{Dispatch, EnvStatus, TrapFrame};

const UPCALL: u32 = UTEXT as u32 + 0x40;
const FAULT_VA: u32 = 0x4000_0123;

fn read_utf(cpu: &Cpu, at: usize) -> UTrapframe {
    let mut bytes = [0u8; UTRAPFRAME_SIZE];
    cpu.load(at, &mut bytes).unwrap();
    UTrapframe::from_bytes(&bytes)
}

fn install_upcall(cpu: &mut Cpu) {
    assert_eq!(
        cpu.syscall(SYS_PAGE_ALLOC, &[0, UXSTACKBASE as u32, PTE_UW]),
        0
    );
    assert_eq!(cpu.syscall(SYS_ENV_SET_PGFAULT_UPCALL, &[0, UPCALL]), 0);
}

#[test]
fn fault_is_delivered_to_upcall() {
    let kernel = boot(1);
    let env = spawn(&kernel);
    let mut cpu = Cpu::start(&kernel, 0);
    install_upcall(&mut cpu);
    let before = match cpu.dispatch {
        Dispatch::Run { tf, .. } => tf,
        _ => unreachable!(),
    };

    match cpu.page_fault(FAULT_VA, true, true) {
        Dispatch::Run { env: e, tf, .. } => {
            assert_eq!(e, env);
            assert_eq!(tf.eip, UPCALL);
            assert_eq!(tf.esp as usize, UXSTACKTOP - UTRAPFRAME_SIZE);
        }
        other => panic!("unexpected {:?}", other),
    }
    let utf = read_utf(&cpu, UXSTACKTOP - UTRAPFRAME_SIZE);
    assert_eq!(utf.fault_va, FAULT_VA);
    assert_ne!(utf.err & FEC_WR, 0);
    assert_ne!(utf.err & FEC_U, 0);
    assert_eq!(utf.eip, before.eip);
    assert_eq!(utf.esp, before.esp);
}

#[test]
fn recursive_fault_leaves_a_gap_word() {
    let kernel = boot(1);
    spawn(&kernel);
    let mut cpu = Cpu::start(&kernel, 0);
    install_upcall(&mut cpu);

    cpu.page_fault(FAULT_VA, true, false);
    let first = UXSTACKTOP - UTRAPFRAME_SIZE;
    // 处理函数自己又缺页
    match cpu.page_fault(0x5000_0000, false, false) {
        Dispatch::Run { tf, .. } => {
            assert_eq!(tf.esp as usize, first - 4 - UTRAPFRAME_SIZE);
        }
        other => panic!("unexpected {:?}", other),
    }
    let utf = read_utf(&cpu, first - 4 - UTRAPFRAME_SIZE);
    assert_eq!(utf.fault_va, 0x5000_0000);
    assert_eq!(utf.esp as usize, first);
}

#[test]
fn exception_stack_overflow_destroys_env() {
    let kernel = boot(1);
    let env = spawn(&kernel);
    let mut cpu = Cpu::start(&kernel, 0);
    install_upcall(&mut cpu);
    let mut overflowed = false;
    for _ in 0..(PAGE_SIZE / UTRAPFRAME_SIZE + 1) {
        if cpu.page_fault(FAULT_VA, true, false) == Dispatch::Monitor {
            overflowed = true;
            break;
        }
    }
    assert!(overflowed);
    assert!(kernel.env_info(env).is_none());
}

#[test]
fn fault_without_upcall_or_stack_destroys() {
    let kernel = boot(1);
    let a = spawn(&kernel);
    let b = spawn(&kernel);
    let mut cpu = Cpu::start(&kernel, 0);

    // 没有注册处理函数
    cpu.page_fault(FAULT_VA, false, false);
    assert!(kernel.env_info(a).is_none());
    assert_eq!(cpu.running(), Some(b));

    // 注册了处理函数但是没有异常栈
    assert_eq!(cpu.syscall(SYS_ENV_SET_PGFAULT_UPCALL, &[0, UPCALL]), 0);
    assert_eq!(cpu.page_fault(FAULT_VA, true, false), Dispatch::Monitor);
    assert!(kernel.env_info(b).is_none());
}

#[test]
fn unexpected_user_trap_destroys_env() {
    let kernel = boot(1);
    let env = spawn(&kernel);
    let mut cpu = Cpu::start(&kernel, 0);
    let mut tf = match cpu.dispatch {
        Dispatch::Run { tf, .. } => tf,
        _ => unreachable!(),
    };
    tf.trapno = T_ILLOP;
    assert_eq!(cpu.trap(tf), Dispatch::Monitor);
    assert!(kernel.env_info(env).is_none());
}

#[test]
fn kernel_panic_stops_every_cpu() {
    let kernel = boot(2);
    spawn(&kernel);
    let mut cpu0 = Cpu::start(&kernel, 0);
    let mut cpu1 = Cpu::start(&kernel, 1);
    assert_eq!(cpu1.dispatch, Dispatch::Halt);

    let mut tf = kernel_frame();
    tf.trapno = T_GPFLT;
    assert_eq!(cpu1.trap(tf), Dispatch::Panic);
    assert!(kernel.panicked());
    assert_eq!(cpu0.timer(), Dispatch::Panic);
    assert_eq!(kernel.start_cpu(1), Dispatch::Panic);
}

#[test]
fn kernel_page_fault_panics() {
    let kernel = boot(1);
    spawn(&kernel);
    let mut cpu = Cpu::start(&kernel, 0);
    let mut tf = kernel_frame();
    tf.trapno = exo_kernel::trap::T_PGFLT;
    kernel.write_cr2(0, 0xdead_b000);
    assert_eq!(cpu.trap(tf), Dispatch::Panic);
    assert!(kernel.panicked());
}

#[test]
fn breakpoint_returns_from_v86() {
    let kernel = boot(1);
    let env = spawn(&kernel);
    let mut cpu = Cpu::start(&kernel, 0);
    let before = match cpu.dispatch {
        Dispatch::Run { tf, .. } => tf,
        _ => unreachable!(),
    };
    cpu.syscall(SYS_V86, &[]);
    match cpu.dispatch {
        Dispatch::Run { tf, .. } => {
            assert_ne!(tf.eflags & FL_VM, 0);
            assert_eq!(tf.eip, V86_ENTRY);
        }
        other => panic!("unexpected {:?}", other),
    }
    match cpu.breakpoint() {
        Dispatch::Run { env: e, tf, .. } => {
            assert_eq!(e, env);
            assert_eq!(tf.eflags & FL_VM, 0);
            assert_eq!(tf.eip, before.eip);
            assert_eq!(tf.regs.eax, 0);
        }
        other => panic!("unexpected {:?}", other),
    }
    // 普通断点进入监视器后继续运行
    match cpu.breakpoint() {
        Dispatch::Run { env: e, tf, .. } => {
            assert_eq!(e, env);
            assert_eq!(tf.eip, before.eip);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn set_trapframe_is_sanitized() {
    let kernel = boot(1);
    spawn(&kernel);
    let mut cpu = Cpu::start(&kernel, 0);
    let child = cpu.syscall(SYS_EXOFORK, &[]) as u32;
    assert_eq!(kernel.env_status(child), Some(EnvStatus::NotRunnable));
    assert_eq!(kernel.env_info(child).unwrap().tf.regs.eax, 0);

    let forged = TrapFrame {
        cs: GD_KT,
        eflags: FL_IOPL_MASK,
        eip: 0x1234,
        ..TrapFrame::default()
    };
    let at = UTEXT + PAGE_SIZE;
    cpu.store(at, &forged.to_bytes()).unwrap();
    assert_eq!(cpu.syscall(SYS_ENV_SET_TRAPFRAME, &[child, at as u32]), 0);
    let tf = kernel.env_info(child).unwrap().tf;
    assert_eq!(tf.cs, GD_UT | 3);
    assert_eq!(tf.eflags & FL_IOPL_MASK, 0);
    assert_eq!(tf.eip, 0x1234);
    assert_eq!(TRAPFRAME_SIZE, 68);
}
