//! A whole machine on host threads.
//!
//! One driver thread per CPU loops on [`Kernel::trap`]. Every environment
//! gets its own thread running its program; the CPU that dispatches an
//! environment wakes that thread and waits for its next trap frame. The
//! big kernel lock keeps the kernel single-threaded; the hand-off keeps
//! each CPU running at most one environment.

use crate::console::{with_sink, HostConsole, OutputSink};
use crate::env::{Killed, Resume, UserEnv};
use crate::pgfault::PgfaultHandler;
use crate::Program;
use exo_kernel::config::{PAGE_SIZE, UTEXT};
use exo_kernel::console::init_console;
use exo_kernel::trap::{GD_KD, GD_KT, IRQ_OFFSET, IRQ_TIMER};
use exo_kernel::{Devices, Dispatch, EnvId, KResult, Kernel, KernelConfig, ProgramImage, TrapFrame};
use spin::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// start of the data pages every program image carries
pub const UDATA: usize = UTEXT + PAGE_SIZE;
pub const UDATA_SIZE: usize = 4 * PAGE_SIZE;

/// how long an idle CPU sleeps before its next timer interrupt
const HALT_NAP: Duration = Duration::from_millis(1);
/// how often a CPU waiting for a trap checks whether the machine stopped
const TRAP_POLL: Duration = Duration::from_millis(50);

static HOST_CONSOLE: HostConsole = HostConsole;

#[derive(Debug, Clone, Copy)]
pub struct MachineConfig {
    pub kernel: KernelConfig,
    /// user operations between timer interrupts, 0 for none
    pub quantum: u32,
    /// traps (idle ones included) before the run is declared hung
    pub max_traps: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            kernel: KernelConfig::default(),
            quantum: 64,
            max_traps: 1_000_000,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// every environment exited and the kernel entered its monitor
    Idle,
    /// the kernel panicked
    Panic,
    /// `max_traps` ran out first
    Hung,
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: Outcome,
    /// everything the kernel printed on the console
    pub output: String,
    pub traps: u64,
    pub ticks: u32,
    /// messages of user programs that panicked and were destroyed
    pub user_panics: Vec<String>,
    /// environments still alive at the end
    pub envs_left: usize,
}

/// State shared by the CPU threads and the environment threads.
pub(crate) struct Shared {
    pub(crate) kernel: Kernel,
    pub(crate) quantum: u32,
    max_traps: u64,
    /// programs of environments whose threads haven't started yet
    programs: Mutex<BTreeMap<EnvId, (Program, Option<PgfaultHandler>)>>,
    /// wake-up channels of started environment threads
    threads: Mutex<BTreeMap<EnvId, Sender<Resume>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    traps: AtomicU64,
    stop: AtomicBool,
    outcome: Mutex<Option<Outcome>>,
    output: OutputSink,
    user_panics: Mutex<Vec<String>>,
}

impl Shared {
    /// Program the thread of `id` will run once it is first dispatched.
    pub(crate) fn register(&self, id: EnvId, program: Program, handler: Option<PgfaultHandler>) {
        self.programs.lock().insert(id, (program, handler));
    }

    /// The first outcome wins; every CPU stops after this.
    fn finish(&self, outcome: Outcome) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            debug!("machine stopping: {:?}", outcome);
            *slot = Some(outcome);
        }
        self.stop.store(true, Ordering::Release);
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Count one trap; false once the budget is spent.
    fn count_trap(&self) -> bool {
        let n = self.traps.fetch_add(1, Ordering::AcqRel) + 1;
        if n > self.max_traps {
            self.finish(Outcome::Hung);
            return false;
        }
        true
    }

    /// Wake-up channel of `id`, starting its thread on first dispatch.
    fn resume_of(self: &Arc<Self>, id: EnvId) -> Option<Sender<Resume>> {
        let mut threads = self.threads.lock();
        if let Some(tx) = threads.get(&id) {
            return Some(tx.clone());
        }
        let (program, handler) = self
            .programs
            .lock()
            .remove(&id)
            .unwrap_or_else(|| (Box::new(default_program) as Program, None));
        let (tx, rx) = channel();
        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("env-{:08x}", id))
            .spawn(move || env_main(shared, id, rx, program, handler));
        match spawned {
            Ok(handle) => {
                self.handles.lock().push(handle);
                threads.insert(id, tx.clone());
                Some(tx)
            }
            Err(e) => {
                error!("cannot start thread for env {:08x}: {}", id, e);
                None
            }
        }
    }

    /// Unwind the threads of environments the kernel has freed.
    fn reap(&self) {
        let mut threads = self.threads.lock();
        let dead: Vec<EnvId> = threads
            .keys()
            .copied()
            .filter(|&id| self.kernel.env_info(id).is_none())
            .collect();
        for id in dead {
            if let Some(tx) = threads.remove(&id) {
                trace!("reaping thread of env {:08x}", id);
                let _ = tx.send(Resume::Kill);
            }
        }
    }

    fn record_user_panic(&self, id: EnvId, msg: String) {
        let line = format!("[{:08x}] user panic: {}", id, msg);
        warn!("{}", line);
        self.output.lock().push_str(&format!("{}\n", line));
        self.user_panics.lock().push(line);
    }
}

/// A child forked with no program of its own just exits.
fn default_program(env: &mut UserEnv) {
    env.exit();
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// libmain: wait for the first dispatch, run the program, exit.
fn env_main(
    shared: Arc<Shared>,
    id: EnvId,
    resume: Receiver<Resume>,
    program: Program,
    handler: Option<PgfaultHandler>,
) {
    let mut env = UserEnv::new(id, Arc::clone(&shared), resume, handler);
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        env.wait_dispatch();
        program(&mut env);
        env.exit();
    }));
    if let Err(payload) = result {
        if payload.is::<Killed>() {
            return;
        }
        shared.record_user_panic(id, panic_message(payload.as_ref()));
        env.abort();
    }
}

/// Frame of a CPU idling in the kernel when the clock fires.
fn idle_timer_frame() -> TrapFrame {
    TrapFrame {
        trapno: IRQ_OFFSET + IRQ_TIMER,
        cs: GD_KT,
        ds: GD_KD,
        es: GD_KD,
        ss: GD_KD,
        ..TrapFrame::default()
    }
}

fn cpu_main(shared: Arc<Shared>, cpu: usize) {
    with_sink(&shared.output, || {
        let (link, traps) = channel::<TrapFrame>();
        let mut dispatch = shared.kernel.start_cpu(cpu);
        while !shared.stopped() {
            let tf = match dispatch {
                Dispatch::Run { env, tf, cr3 } => {
                    let resume = match shared.resume_of(env) {
                        Some(resume) => resume,
                        None => {
                            shared.finish(Outcome::Panic);
                            break;
                        }
                    };
                    let run = Resume::Run {
                        cpu,
                        tf,
                        cr3,
                        link: link.clone(),
                    };
                    if resume.send(run).is_err() {
                        error!("env {:08x} thread vanished", env);
                        shared.finish(Outcome::Panic);
                        break;
                    }
                    match wait_trap(&shared, &traps) {
                        Some(tf) => tf,
                        None => break,
                    }
                }
                Dispatch::Halt => {
                    thread::sleep(HALT_NAP);
                    idle_timer_frame()
                }
                Dispatch::Monitor => {
                    shared.finish(Outcome::Idle);
                    break;
                }
                Dispatch::Panic => {
                    shared.finish(Outcome::Panic);
                    break;
                }
            };
            if !shared.count_trap() {
                break;
            }
            dispatch = shared.kernel.trap(cpu, tf);
            shared.reap();
        }
        trace!("CPU {} leaves", cpu);
    });
}

/// Next trap frame from whichever environment this CPU is running.
fn wait_trap(shared: &Shared, traps: &Receiver<TrapFrame>) -> Option<TrapFrame> {
    loop {
        match traps.recv_timeout(TRAP_POLL) {
            Ok(tf) => return Some(tf),
            Err(RecvTimeoutError::Timeout) if !shared.stopped() => continue,
            Err(_) => return None,
        }
    }
}

/// The page every program image starts with, then [`UDATA_SIZE`] bytes of bss.
pub fn default_image() -> ProgramImage {
    ProgramImage::new(UTEXT + 0x20)
        .segment(UTEXT, &[0x90; 0x40], PAGE_SIZE, false)
        .bss(UDATA, UDATA_SIZE)
}

pub struct Machine {
    shared: Arc<Shared>,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        Self::with_devices(config, Devices::default())
    }

    pub fn with_devices(config: MachineConfig, devices: Devices) -> Self {
        init_console(&HOST_CONSOLE);
        exo_kernel::logging::init();
        let output = OutputSink::default();
        let kernel = with_sink(&output, || Kernel::new(config.kernel, devices));
        Self {
            shared: Arc::new(Shared {
                kernel,
                quantum: config.quantum,
                max_traps: config.max_traps,
                programs: Mutex::new(BTreeMap::new()),
                threads: Mutex::new(BTreeMap::new()),
                handles: Mutex::new(Vec::new()),
                traps: AtomicU64::new(0),
                stop: AtomicBool::new(false),
                outcome: Mutex::new(None),
                output,
                user_panics: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.shared.kernel
    }

    /// Create an environment from `image` whose thread runs `program`.
    pub fn spawn<F>(&self, image: &ProgramImage, program: F) -> KResult<EnvId>
    where
        F: FnOnce(&mut UserEnv) + Send + 'static,
    {
        let id = with_sink(&self.shared.output, || self.shared.kernel.create_env(image))?;
        self.shared.register(id, Box::new(program), None);
        Ok(id)
    }

    /// Start every CPU and run until the kernel has nothing left to do.
    pub fn run(self) -> RunReport {
        let ncpu = self.shared.kernel.config().ncpu;
        let cpus: Vec<_> = (0..ncpu)
            .filter_map(|cpu| {
                let shared = Arc::clone(&self.shared);
                thread::Builder::new()
                    .name(format!("cpu-{}", cpu))
                    .spawn(move || cpu_main(shared, cpu))
                    .map_err(|e| error!("cannot start CPU {}: {}", cpu, e))
                    .ok()
            })
            .collect();
        for handle in cpus {
            if handle.join().is_err() {
                self.shared.finish(Outcome::Panic);
            }
        }
        self.shared.stop.store(true, Ordering::Release);

        // 剩下的环境线程都阻塞在等待调度上
        let threads = std::mem::take(&mut *self.shared.threads.lock());
        for tx in threads.values() {
            let _ = tx.send(Resume::Kill);
        }
        drop(threads);
        let handles = std::mem::take(&mut *self.shared.handles.lock());
        for handle in handles {
            let _ = handle.join();
        }

        let shared = &self.shared;
        RunReport {
            outcome: (*shared.outcome.lock()).unwrap_or(Outcome::Hung),
            output: shared.output.lock().clone(),
            traps: shared.traps.load(Ordering::Acquire),
            ticks: shared.kernel.ticks(),
            user_panics: shared.user_panics.lock().clone(),
            envs_left: shared.kernel.env_count(),
        }
    }
}
