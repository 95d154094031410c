mod common;

use common::*;
use exo_kernel::mm::VirtAddr;
use exo_kernel::{EnvStatus, KernelError, IPC_NONE};

const SHARE_VA: u32 = 0x4000_1000;

#[test]
fn value_only_rendezvous() {
    let kernel = boot(1);
    let e1 = spawn(&kernel);
    let e2 = spawn(&kernel);
    let mut cpu = Cpu::start(&kernel, 0);
    assert_eq!(cpu.running(), Some(e1));

    assert_eq!(cpu.syscall(SYS_IPC_RECV, &[IPC_NONE]), 0);
    assert_eq!(kernel.env_status(e1), Some(EnvStatus::NotRunnable));
    assert_eq!(cpu.running(), Some(e2));

    assert_eq!(cpu.syscall(SYS_IPC_TRY_SEND, &[e1, 42, IPC_NONE, 0]), 0);
    let info = kernel.env_info(e1).unwrap();
    assert_eq!(info.status, EnvStatus::Runnable);
    assert!(!info.ipc.recving);
    assert_eq!(info.ipc.value, 42);
    assert_eq!(info.ipc.from, e2);
    assert_eq!(info.ipc.perm, 0);

    cpu.syscall(SYS_YIELD, &[]);
    assert_eq!(cpu.running(), Some(e1));
    match cpu.dispatch {
        exo_kernel::Dispatch::Run { tf, .. } => assert_eq!(tf.regs.eax, 0),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn page_transfer_shares_the_frame() {
    let kernel = boot(1);
    let e1 = spawn(&kernel);
    let e2 = spawn(&kernel);
    let mut cpu = Cpu::start(&kernel, 0);

    // E1 让出 CPU，E2 先进入接收状态
    cpu.syscall(SYS_YIELD, &[]);
    assert_eq!(cpu.running(), Some(e2));
    assert_eq!(cpu.syscall(SYS_IPC_RECV, &[SHARE_VA]), 0);
    assert_eq!(cpu.running(), Some(e1));

    assert_eq!(cpu.syscall(SYS_PAGE_ALLOC, &[0, SHARE_VA, PTE_UW]), 0);
    cpu.store(SHARE_VA as usize, b"HELLO").unwrap();
    assert_eq!(cpu.syscall(SYS_IPC_TRY_SEND, &[e2, 7, SHARE_VA, PTE_UW]), 0);

    let va = VirtAddr(SHARE_VA as usize);
    let (f1, _) = kernel.lookup(e1, va).unwrap();
    let (f2, _) = kernel.lookup(e2, va).unwrap();
    assert_eq!(f1, f2);
    assert_eq!(kernel.page_ref(f1), 2);
    let info = kernel.env_info(e2).unwrap();
    assert_eq!(info.ipc.value, 7);
    assert_eq!(info.ipc.perm, PTE_UW);

    cpu.syscall(SYS_YIELD, &[]);
    assert_eq!(cpu.running(), Some(e2));
    let mut buf = [0u8; 5];
    cpu.load(SHARE_VA as usize, &mut buf).unwrap();
    assert_eq!(&buf, b"HELLO");
    cpu.store(SHARE_VA as usize, b"WORLD").unwrap();

    cpu.syscall(SYS_YIELD, &[]);
    assert_eq!(cpu.running(), Some(e1));
    cpu.load(SHARE_VA as usize, &mut buf).unwrap();
    assert_eq!(&buf, b"WORLD");
}

#[test]
fn send_to_idle_env_mutates_nothing() {
    let kernel = boot(1);
    let e1 = spawn(&kernel);
    let e2 = spawn(&kernel);
    let mut cpu = Cpu::start(&kernel, 0);
    assert_eq!(cpu.syscall(SYS_PAGE_ALLOC, &[0, SHARE_VA, PTE_UW]), 0);
    let (frame, _) = kernel.lookup(e1, VirtAddr(SHARE_VA as usize)).unwrap();
    let before = kernel.env_info(e2).unwrap();

    assert_eq!(
        cpu.syscall(SYS_IPC_TRY_SEND, &[e2, 1, SHARE_VA, PTE_UW]),
        KernelError::IpcNotRecv.as_ret()
    );
    // 参数本身不合法也一样，先检查接收方
    assert_eq!(
        cpu.syscall(SYS_IPC_TRY_SEND, &[e2, 1, SHARE_VA + 3, 0]),
        KernelError::IpcNotRecv.as_ret()
    );
    let after = kernel.env_info(e2).unwrap();
    assert_eq!(after.ipc, before.ipc);
    assert_eq!(after.status, EnvStatus::Runnable);
    assert_eq!(kernel.page_ref(frame), 1);
    assert!(kernel.lookup(e2, VirtAddr(SHARE_VA as usize)).is_none());

    assert_eq!(
        cpu.syscall(SYS_IPC_TRY_SEND, &[0x7777_7001, 1, IPC_NONE, 0]),
        KernelError::BadEnv.as_ret()
    );
}

#[test]
fn both_sides_must_agree_on_a_page() {
    let kernel = boot(1);
    let e1 = spawn(&kernel);
    let e2 = spawn(&kernel);
    let mut cpu = Cpu::start(&kernel, 0);
    assert_eq!(cpu.syscall(SYS_PAGE_ALLOC, &[0, SHARE_VA, PTE_UW]), 0);
    let (frame, _) = kernel.lookup(e1, VirtAddr(SHARE_VA as usize)).unwrap();

    // 接收方不要页面：只传值，perm 为 0
    cpu.syscall(SYS_YIELD, &[]);
    assert_eq!(cpu.syscall(SYS_IPC_RECV, &[IPC_NONE]), 0);
    assert_eq!(cpu.syscall(SYS_IPC_TRY_SEND, &[e2, 5, SHARE_VA, PTE_UR]), 0);
    let info = kernel.env_info(e2).unwrap();
    assert_eq!((info.ipc.value, info.ipc.perm), (5, 0));
    assert_eq!(kernel.page_ref(frame), 1);

    // 接收方要页面，发送方不给：perm 必须为 0
    cpu.syscall(SYS_YIELD, &[]);
    assert_eq!(cpu.running(), Some(e2));
    assert_eq!(cpu.syscall(SYS_IPC_RECV, &[SHARE_VA]), 0);
    assert_eq!(
        cpu.syscall(SYS_IPC_TRY_SEND, &[e2, 6, IPC_NONE, PTE_UR]),
        KernelError::Inval.as_ret()
    );
    assert!(kernel.env_info(e2).unwrap().ipc.recving);

    // 不能把只读页面以可写方式发出去
    assert_eq!(cpu.syscall(SYS_PAGE_MAP, &[0, SHARE_VA, 0, SHARE_VA, PTE_UR]), 0);
    assert_eq!(
        cpu.syscall(SYS_IPC_TRY_SEND, &[e2, 6, SHARE_VA, PTE_UW]),
        KernelError::Inval.as_ret()
    );
    assert!(kernel.env_info(e2).unwrap().ipc.recving);

    assert_eq!(cpu.syscall(SYS_IPC_TRY_SEND, &[e2, 6, IPC_NONE, 0]), 0);
    let info = kernel.env_info(e2).unwrap();
    assert_eq!((info.ipc.value, info.ipc.perm), (6, 0));
    assert!(kernel.lookup(e2, VirtAddr(SHARE_VA as usize)).is_none());
}

#[test]
fn recv_rejects_bad_dstva() {
    let kernel = boot(1);
    let e1 = spawn(&kernel);
    let mut cpu = Cpu::start(&kernel, 0);
    assert_eq!(
        cpu.syscall(SYS_IPC_RECV, &[SHARE_VA + 1]),
        KernelError::Inval.as_ret()
    );
    assert_eq!(
        cpu.syscall(SYS_IPC_RECV, &[exo_kernel::config::UTOP as u32]),
        KernelError::Inval.as_ret()
    );
    assert_eq!(kernel.env_status(e1), Some(EnvStatus::Running));
    assert!(!kernel.env_info(e1).unwrap().ipc.recving);
}
