//! Parent forks A, then B; each child says who it is and exits.

use exo_user::{default_image, fork, uprintln, Machine, MachineConfig, Outcome, UserEnv};

fn a(env: &mut UserEnv) {
    fork(env, |child| {
        uprintln!(child, "I am A");
        child.exit();
    })
    .expect("fork A");
}

fn b(env: &mut UserEnv) {
    fork(env, |child| {
        uprintln!(child, "I am B");
        child.exit();
    })
    .expect("fork B");
}

fn umain(env: &mut UserEnv) {
    uprintln!(env, "I am the parent before A");
    a(env);
    uprintln!(env, "I am the parent after A");
    b(env);
    uprintln!(env, "I am the parent after B");
}

fn main() {
    let machine = Machine::new(MachineConfig::default());
    if let Err(e) = machine.spawn(&default_image(), umain) {
        eprintln!("myfork: spawn: {}", e);
        std::process::exit(1);
    }
    let report = machine.run();
    if report.outcome != Outcome::Idle {
        eprintln!("myfork: {:?}", report.outcome);
        std::process::exit(1);
    }
}
