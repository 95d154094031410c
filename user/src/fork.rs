//! Copy-on-write `fork`.
//!
//! The parent walks its own page tables through `uvpd`/`uvpt` and maps
//! every writable page into the child copy-on-write, remapping its own
//! copy the same way. The first write on either side faults into
//! [`pgfault`], which gives the writer a private copy.

use crate::env::UserEnv;
use crate::pgfault::{set_pgfault_handler, PFENTRY};
use crate::syscall::SysResult;
use exo_kernel::config::{NPTENTRIES, PAGE_SIZE, PFTEMP, UTOP, UXSTACKBASE};
use exo_kernel::mm::{PTEFlags, PageTableEntry, VirtAddr, FEC_WR};
use exo_kernel::trap::UTrapframe;
use exo_kernel::{EnvId, EnvStatus};

/// Custom page fault handler: if the faulting page is copy-on-write, map
/// in our own private writable copy.
pub fn pgfault(env: &mut UserEnv, utf: &UTrapframe) {
    let addr = utf.fault_va as usize;
    // 只处理写 COW 页引起的缺页
    if utf.err & FEC_WR == 0 {
        panic!(
            "pgfault: not a write at va {:08x}, ip {:08x}, err {:x}",
            addr, utf.eip, utf.err
        );
    }
    let is_cow = env
        .pte_of(addr)
        .map_or(false, |pte| pte.is_valid() && pte.flags().contains(PTEFlags::COW));
    if !is_cow {
        panic!("pgfault: va {:08x} is not copy-on-write, ip {:08x}", addr, utf.eip);
    }

    let page = addr & !(PAGE_SIZE - 1);
    let uw = PTEFlags::U | PTEFlags::P | PTEFlags::W;
    if let Err(e) = env.sys_page_alloc(0, PFTEMP, uw) {
        panic!("pgfault: sys_page_alloc: {}", e);
    }
    let mut copy = vec![0u8; PAGE_SIZE];
    env.read(page, &mut copy);
    env.write(PFTEMP, &copy);
    if let Err(e) = env.sys_page_map(0, PFTEMP, 0, page, uw) {
        panic!("pgfault: sys_page_map: {}", e);
    }
    if let Err(e) = env.sys_page_unmap(0, PFTEMP) {
        panic!("pgfault: sys_page_unmap: {}", e);
    }
}

/// Map page `pn` into `child` at the same address.
///
/// Writable or copy-on-write pages become copy-on-write in both; shared
/// pages keep their permissions; everything else is mapped read-only.
fn duppage(env: &mut UserEnv, child: EnvId, pn: usize, pte: PageTableEntry) -> SysResult<()> {
    let va = pn * PAGE_SIZE;
    let flags = pte.flags();
    if flags.contains(PTEFlags::SHARE) {
        return env.sys_page_map(0, va, child, va, flags & PTEFlags::SYSCALL);
    }
    if flags.intersects(PTEFlags::W | PTEFlags::COW) {
        let cow = PTEFlags::U | PTEFlags::P | PTEFlags::COW;
        // 先映射子进程，再把自己改成 COW
        env.sys_page_map(0, va, child, va, cow)?;
        return env.sys_page_map(0, va, 0, va, cow);
    }
    env.sys_page_map(0, va, child, va, PTEFlags::U | PTEFlags::P)
}

/// User-level fork with copy-on-write.
///
/// Returns the child's id to the parent. The child's thread runs `child`
/// instead of returning; it starts with the parent's page fault handler.
pub fn fork<F>(env: &mut UserEnv, child: F) -> SysResult<EnvId>
where
    F: FnOnce(&mut UserEnv) + Send + 'static,
{
    set_pgfault_handler(env, pgfault)?;
    let id = env.sys_exofork()?;
    let handler = env.pgfault_handler;
    env.shared().register(id, Box::new(child), handler);

    for pdx in 0..VirtAddr(UTOP).pdx() {
        if !env.uvpd(pdx).is_valid() {
            continue;
        }
        for ptx in 0..NPTENTRIES {
            let pn = pdx * NPTENTRIES + ptx;
            // 异常栈不能是 COW：缺页处理本身就运行在上面
            if pn * PAGE_SIZE == UXSTACKBASE {
                continue;
            }
            let pte = env.uvpt(pn);
            if pte.is_valid() && pte.is_user() {
                duppage(env, id, pn, pte)?;
            }
        }
    }

    let uw = PTEFlags::U | PTEFlags::P | PTEFlags::W;
    env.sys_page_alloc(id, UXSTACKBASE, uw)?;
    env.sys_env_set_pgfault_upcall(id, PFENTRY)?;
    env.sys_env_set_status(id, EnvStatus::Runnable)?;
    Ok(id)
}
