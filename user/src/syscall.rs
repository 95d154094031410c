//! System call stubs.
//!
//! Every stub loads its arguments into registers through
//! [`UserEnv::syscall`] and decodes a negative `eax` back into a
//! [`KernelError`].

use crate::env::UserEnv;
use exo_kernel::mm::PTEFlags;
use exo_kernel::syscall::*;
use exo_kernel::{EnvId, EnvStatus, KernelError, IPC_NONE};

pub type SysResult<T> = Result<T, KernelError>;

/// 负数返回值是错误码
fn check(ret: i32) -> SysResult<u32> {
    if ret < 0 {
        Err(KernelError::from_errno(-ret))
    } else {
        Ok(ret as u32)
    }
}

/// Page address for a syscall that takes an optional page, `IPC_NONE` when absent.
fn page_arg(va: Option<usize>) -> u32 {
    va.map_or(IPC_NONE, |va| va as u32)
}

impl UserEnv {
    /// 功能：把用户缓冲区中的字符串打印到控制台。
    /// 参数：`va` 是缓冲区的起始地址，`len` 是长度。
    /// syscall ID：0
    pub fn sys_cputs(&mut self, va: usize, len: usize) -> SysResult<()> {
        check(self.syscall(SYS_CPUTS, [va as u32, len as u32, 0, 0, 0])).map(|_| ())
    }

    /// 功能：读取一个控制台输入字符。
    /// 返回值：没有输入时返回 0。
    /// syscall ID：1
    pub fn sys_cgetc(&mut self) -> u8 {
        self.syscall(SYS_CGETC, [0; 5]) as u8
    }

    pub fn sys_getenvid(&mut self) -> EnvId {
        self.syscall(SYS_GETENVID, [0; 5]) as EnvId
    }

    /// 功能：销毁一个环境，0 表示自己。
    /// syscall ID：3
    pub fn sys_env_destroy(&mut self, envid: EnvId) -> SysResult<()> {
        check(self.syscall(SYS_ENV_DESTROY, [envid, 0, 0, 0, 0])).map(|_| ())
    }

    pub fn sys_page_alloc(&mut self, envid: EnvId, va: usize, perm: PTEFlags) -> SysResult<()> {
        let args = [envid, va as u32, perm.bits(), 0, 0];
        check(self.syscall(SYS_PAGE_ALLOC, args)).map(|_| ())
    }

    /// 功能：把 `srcenvid` 在 `srcva` 处的页面映射到 `dstenvid` 的 `dstva`。
    /// 参数：`perm` 的要求和 `sys_page_alloc` 一样，另外不能把只读页映射为可写。
    /// syscall ID：5
    pub fn sys_page_map(
        &mut self,
        srcenvid: EnvId,
        srcva: usize,
        dstenvid: EnvId,
        dstva: usize,
        perm: PTEFlags,
    ) -> SysResult<()> {
        let args = [
            srcenvid,
            srcva as u32,
            dstenvid,
            dstva as u32,
            perm.bits(),
        ];
        check(self.syscall(SYS_PAGE_MAP, args)).map(|_| ())
    }

    pub fn sys_page_unmap(&mut self, envid: EnvId, va: usize) -> SysResult<()> {
        check(self.syscall(SYS_PAGE_UNMAP, [envid, va as u32, 0, 0, 0])).map(|_| ())
    }

    /// 功能：创建一个空白的子环境，寄存器从父环境复制。
    /// 返回值：父环境得到子环境的 id；子环境永远不会从这里返回，
    /// 它的线程从注册的程序开始运行。
    /// syscall ID：7
    pub fn sys_exofork(&mut self) -> SysResult<EnvId> {
        check(self.syscall(SYS_EXOFORK, [0; 5]))
    }

    pub fn sys_env_set_status(&mut self, envid: EnvId, status: EnvStatus) -> SysResult<()> {
        let args = [envid, status.code(), 0, 0, 0];
        check(self.syscall(SYS_ENV_SET_STATUS, args)).map(|_| ())
    }

    /// `va` holds a full trap frame in this environment's memory.
    pub fn sys_env_set_trapframe(&mut self, envid: EnvId, va: usize) -> SysResult<()> {
        let args = [envid, va as u32, 0, 0, 0];
        check(self.syscall(SYS_ENV_SET_TRAPFRAME, args)).map(|_| ())
    }

    pub fn sys_env_set_pgfault_upcall(&mut self, envid: EnvId, func: u32) -> SysResult<()> {
        let args = [envid, func, 0, 0, 0];
        check(self.syscall(SYS_ENV_SET_PGFAULT_UPCALL, args)).map(|_| ())
    }

    pub fn sys_yield(&mut self) {
        self.syscall(SYS_YIELD, [0; 5]);
    }

    /// 功能：尝试向 `envid` 发送 `value`，可选地附带 `srcva` 处的页面。
    /// 返回值：对方没有在接收时返回 `IpcNotRecv`。
    /// syscall ID：12
    pub fn sys_ipc_try_send(
        &mut self,
        envid: EnvId,
        value: u32,
        srcva: Option<usize>,
        perm: PTEFlags,
    ) -> SysResult<()> {
        let args = [envid, value, page_arg(srcva), perm.bits(), 0];
        check(self.syscall(SYS_IPC_TRY_SEND, args)).map(|_| ())
    }

    /// Block until a message arrives; a page is accepted at `dstva` if given.
    pub fn sys_ipc_recv(&mut self, dstva: Option<usize>) -> SysResult<()> {
        check(self.syscall(SYS_IPC_RECV, [page_arg(dstva), 0, 0, 0, 0])).map(|_| ())
    }

    pub fn sys_time_msec(&mut self) -> u32 {
        self.syscall(SYS_TIME_MSEC, [0; 5]) as u32
    }

    pub fn sys_transmit(&mut self, va: usize, len: usize) -> SysResult<()> {
        check(self.syscall(SYS_TRANSMIT, [va as u32, len as u32, 0, 0, 0])).map(|_| ())
    }

    /// 返回值：收到的包的长度。
    pub fn sys_receive(&mut self, va: usize, cap: usize) -> SysResult<usize> {
        check(self.syscall(SYS_RECEIVE, [va as u32, cap as u32, 0, 0, 0])).map(|n| n as usize)
    }

    /// Copy at most `max` pending io events to `va`; returns how many.
    pub fn sys_get_io_events(&mut self, va: usize, max: usize) -> SysResult<usize> {
        let args = [va as u32, max as u32, 0, 0, 0];
        check(self.syscall(SYS_GET_IO_EVENTS, args)).map(|n| n as usize)
    }

    pub fn sys_get_ide_io_base(&mut self) -> SysResult<u32> {
        check(self.syscall(SYS_GET_IDE_IO_BASE, [0; 5]))
    }

    pub fn sys_v86(&mut self) -> SysResult<()> {
        check(self.syscall(SYS_V86, [0; 5])).map(|_| ())
    }
}
