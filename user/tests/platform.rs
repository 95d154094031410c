mod common;

use common::*;
use exo_kernel::config::PAGE_SIZE;
use exo_kernel::mm::PTEFlags;
use exo_kernel::KernelError;
use exo_user::{default_image, fork, wait, Outcome, UserEnv};

fn worker(log: Journal<(char, u32)>, name: char) -> impl FnOnce(&mut UserEnv) + Send + 'static {
    move |env| {
        for i in 0..4 {
            log.lock().unwrap().push((name, i));
            env.compute(12);
        }
    }
}

#[test]
fn timer_preempts_busy_envs() {
    let m = machine(1, 5);
    let log = journal();
    m.spawn(&default_image(), worker(log.clone(), 'A')).unwrap();
    m.spawn(&default_image(), worker(log.clone(), 'B')).unwrap();
    let report = m.run();
    assert_clean(&report);

    let order = entries(&log);
    assert_eq!(order.len(), 8);
    let first_b = order.iter().position(|&(n, _)| n == 'B').unwrap();
    let last_a = order.iter().rposition(|&(n, _)| n == 'A').unwrap();
    assert!(first_b < last_a, "no interleaving: {:?}", order);
    assert!(report.ticks > 0);
}

#[test]
fn quantum_zero_runs_to_completion() {
    let m = machine(1, 0);
    let log = journal();
    m.spawn(&default_image(), worker(log.clone(), 'A')).unwrap();
    m.spawn(&default_image(), worker(log.clone(), 'B')).unwrap();
    let report = m.run();
    assert_clean(&report);
    let names: String = entries(&log).iter().map(|&(n, _)| n).collect();
    assert_eq!(names, "AAAABBBB");
    assert_eq!(report.ticks, 0);
}

#[test]
fn exhaustion_from_user_code() {
    let m = machine_with(4 << 20, 1, 0);
    let result = journal::<(usize, KernelError, bool)>();
    let log = result.clone();
    m.spawn(&default_image(), move |env| {
        let uw = PTEFlags::U | PTEFlags::P | PTEFlags::W;
        let base = 0x1000_0000;
        let mut n = 0;
        let err = loop {
            match env.sys_page_alloc(0, base + n * PAGE_SIZE, uw) {
                Ok(()) => n += 1,
                Err(e) => break e,
            }
        };
        // 释放一页之后又能分配了
        let last = base + (n - 1) * PAGE_SIZE;
        env.sys_page_unmap(0, last).unwrap();
        let again = env.sys_page_alloc(0, last, uw).is_ok();
        log.lock().unwrap().push((n, err, again));
    })
    .unwrap();
    let report = m.run();
    assert_clean(&report);
    let got = entries(&result);
    assert_eq!(got.len(), 1);
    let (n, err, again) = got[0];
    assert!(n > 100, "only {} pages", n);
    assert_eq!(err, KernelError::NoMem);
    assert!(again);
}

#[test]
fn user_panic_destroys_only_that_env() {
    let m = machine(1, 0);
    let done = journal::<&'static str>();
    let log = done.clone();
    m.spawn(&default_image(), |_env| panic!("boom")).unwrap();
    m.spawn(&default_image(), move |env| {
        env.sys_yield();
        log.lock().unwrap().push("survivor");
    })
    .unwrap();
    let report = m.run();
    assert_eq!(report.outcome, Outcome::Idle);
    assert_eq!(report.user_panics.len(), 1);
    assert!(report.user_panics[0].ends_with("user panic: boom"));
    assert_eq!(entries(&done), vec!["survivor"]);
    assert_eq!(report.envs_left, 0);
}

#[test]
fn spinning_env_is_reported_hung() {
    let mut config = exo_user::MachineConfig::default();
    config.max_traps = 200;
    let m = exo_user::Machine::new(config);
    m.spawn(&default_image(), |env| loop {
        env.sys_yield();
    })
    .unwrap();
    let report = m.run();
    assert_eq!(report.outcome, Outcome::Hung);
    assert_eq!(report.envs_left, 1);
    assert!(report.traps > 200);
}

#[test]
fn children_spread_over_cpus() {
    let m = machine(4, 8);
    let ran = journal::<usize>();
    let log = ran.clone();
    m.spawn(&default_image(), move |env| {
        let mut kids = Vec::new();
        for _ in 0..6 {
            let log = log.clone();
            let kid = fork(env, move |c| {
                c.compute(64);
                log.lock().unwrap().push(c.cpu());
            })
            .unwrap();
            kids.push(kid);
        }
        for kid in kids {
            wait(env, kid);
        }
    })
    .unwrap();
    let report = m.run();
    assert_clean(&report);
    assert_eq!(entries(&ran).len(), 6);
}

#[test]
fn time_advances_with_ticks() {
    let m = machine(1, 4);
    let times = journal::<u32>();
    let log = times.clone();
    m.spawn(&default_image(), move |env| {
        let start = env.sys_time_msec();
        env.compute(40);
        let end = env.sys_time_msec();
        log.lock().unwrap().push(end - start);
    })
    .unwrap();
    let report = m.run();
    assert_clean(&report);
    // 每 4 次操作一个时钟中断，每个 10ms
    assert_eq!(entries(&times), vec![100]);
}
