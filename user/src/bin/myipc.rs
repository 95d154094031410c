//! Parent sends a page holding a string to its child over IPC.

use exo_user::{default_image, fork, ipc_recv, ipc_send, uprintln, Machine, MachineConfig, Outcome, UserEnv};
use exo_kernel::mm::PTEFlags;
use exo_kernel::EnvId;

const PAGE: usize = 0x4000_1000;

fn child(env: &mut UserEnv) {
    let msg = ipc_recv(env, Some(PAGE)).expect("ipc_recv");
    let text = env.read_cstr(PAGE, 64);
    assert_eq!(text, "HELLO, WORLD");
    assert_eq!(msg.value, 0xdead_beef);
    uprintln!(env, "child got {:#x} and \"{}\"", msg.value, text);
}

fn parent(env: &mut UserEnv, cpid: EnvId) {
    let perm = PTEFlags::P | PTEFlags::U | PTEFlags::W;
    env.sys_page_alloc(0, PAGE, perm).expect("sys_page_alloc");
    env.write_cstr(PAGE, "HELLO, WORLD");
    ipc_send(env, cpid, 0xdead_beef, Some(PAGE), perm);
}

fn umain(env: &mut UserEnv) {
    let cpid = fork(env, child).expect("fork");
    parent(env, cpid);
}

fn main() {
    let machine = Machine::new(MachineConfig::default());
    if let Err(e) = machine.spawn(&default_image(), umain) {
        eprintln!("myipc: spawn: {}", e);
        std::process::exit(1);
    }
    let report = machine.run();
    if report.outcome != Outcome::Idle || !report.user_panics.is_empty() {
        eprintln!("myipc: {:?} {:?}", report.outcome, report.user_panics);
        std::process::exit(1);
    }
}
