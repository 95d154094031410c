//! User-level page fault handler support.
//!
//! The kernel is told to upcall [`PFENTRY`]; when an environment resumes
//! there, the entry stub reads the [`UTrapframe`] off the exception stack,
//! calls the installed handler and then resumes the faulting context.

use crate::env::UserEnv;
use crate::syscall::SysResult;
use exo_kernel::config::{UTEXT, UXSTACKBASE};
use exo_kernel::mm::PTEFlags;
use exo_kernel::trap::{UTrapframe, UTRAPFRAME_SIZE};

/// `_pgfault_upcall`: where the kernel resumes a faulting environment
pub const PFENTRY: u32 = UTEXT as u32 + 0x10;

pub type PgfaultHandler = fn(&mut UserEnv, &UTrapframe);

/// Set the page fault handler function.
///
/// The first time through, the exception stack is allocated and the
/// kernel is told to upcall [`PFENTRY`].
pub fn set_pgfault_handler(env: &mut UserEnv, handler: PgfaultHandler) -> SysResult<()> {
    if env.pgfault_handler.is_none() {
        env.sys_page_alloc(0, UXSTACKBASE, PTEFlags::U | PTEFlags::P | PTEFlags::W)?;
        env.sys_env_set_pgfault_upcall(0, PFENTRY)?;
    }
    env.pgfault_handler = Some(handler);
    Ok(())
}

impl UserEnv {
    /// `_pgfault_upcall`
    pub(crate) fn pgfault_upcall(&mut self) {
        let at = self.registers().esp as usize;
        let mut bytes = [0u8; UTRAPFRAME_SIZE];
        self.read(at, &mut bytes);
        let utf = UTrapframe::from_bytes(&bytes);
        match self.pgfault_handler {
            Some(handler) => handler(self, &utf),
            None => panic!(
                "[{:08x}] page fault upcall at va {:08x} with no handler",
                self.id(),
                utf.fault_va
            ),
        }
        self.restore(&utf);
    }
}
