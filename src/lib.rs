//! A user-space M:N concurrency runtime that multiplexes lightweight
//! cooperative tasks ("greenlets") onto a pool of OS threads.
//!
//! ## Why greenlets?
//!
//! `tin` schedules stackful coroutines rather than futures: a greenlet is
//! an ordinary call stack that can be suspended at well-defined points
//! (yields, parks, blocking submissions, syscall entry/exit) and resumed
//! on any worker thread. That keeps user code in plain blocking style
//! while the runtime multiplexes it over a fixed set of logical
//! processors.
//!
//! The scheduler follows the classic G/P/M shape: each logical processor
//! (P) owns a bounded lock-free run queue plus a one-slot LIFO hint;
//! overflow and foreign wakeups go to a lock-protected global queue;
//! worker threads (M) bind to a P, drain it, steal from peers when idle,
//! and park on a per-worker semaphore when the whole runtime goes quiet.
//! A count of "spinning" workers bounds wakeup cost: making a greenlet
//! runnable only signals a new worker when nobody is already searching.
//!
//! Blocking calls that cannot be made non-blocking (most prominently name
//! resolution) are shipped to a separate offload pool via
//! [`submit_blocking`]; the submitting greenlet is parked, its P keeps
//! running other work, and the pool re-queues the greenlet when the call
//! finishes.
//!
//! ```no_run
//! let handle = tin::spawn(|| {
//!     tin::yield_now();
//!     2 + 2
//! });
//! assert_eq!(handle.join(), 4);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::{Condvar, Mutex, MutexGuard};

mod greenlet;
mod machine;
mod netpoll;
mod offload;
mod proc;
mod runq;
mod scheduler;

pub mod ip;

pub use greenlet::GreenletRef;
pub use netpoll::{set_net_poller, NetPoller};
pub use offload::{submit_blocking, submit_resolver_blocking};

use greenlet::{GStatus, Greenlet, SwitchReason};
use scheduler::Scheduler;

/// Startup knobs. Apply once with [`configure`] before anything else
/// touches the runtime; afterwards the values are frozen.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of logical processors (the concurrency width). Defaults to
    /// the number of CPUs.
    pub procs: usize,
    /// Stack allocation per greenlet, passed to the coroutine stack
    /// allocator.
    pub greenlet_stack: usize,
    /// OS stack size of worker threads.
    pub worker_stack: usize,
    /// Threads in the general blocking-offload pool.
    pub blocking_threads: usize,
    /// Threads in the resolver-dedicated offload pool.
    pub resolver_threads: usize,
    /// Hard cap on worker threads; exceeding it is fatal.
    pub max_machines: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            procs: num_cpus::get(),
            greenlet_stack: 0x4000,
            worker_stack: 1 << 20,
            blocking_threads: 4,
            resolver_threads: 2,
            max_machines: 10_000,
        }
    }
}

static CONFIG: OnceCell<Config> = OnceCell::new();
static SCHED: Lazy<&'static Scheduler> = Lazy::new(|| Scheduler::new_leaked(config()));
static LIVE_GREENLETS: AtomicUsize = AtomicUsize::new(0);

/// Installs the runtime configuration. Returns the rejected value if the
/// runtime was already configured (explicitly or by first use).
pub fn configure(cfg: Config) -> Result<(), Config> {
    CONFIG.set(cfg)
}

pub(crate) fn config() -> &'static Config {
    CONFIG.get_or_init(Config::default)
}

pub(crate) fn scheduler_ref() -> &'static Scheduler {
    *SCHED
}

pub(crate) fn note_greenlet_done() {
    LIVE_GREENLETS.fetch_sub(1, Ordering::Relaxed);
}

/// Number of greenlets that have been spawned and not yet fully reclaimed.
pub fn active_greenlet_count() -> usize {
    LIVE_GREENLETS.load(Ordering::Relaxed)
}

/// A point-in-time snapshot of scheduler counters, mostly useful for
/// diagnostics and tests.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub procs: usize,
    pub global_queue_len: usize,
    pub idle_procs: u32,
    pub spinning_machines: u32,
    pub machines: u32,
    pub live_greenlets: usize,
}

pub fn stats() -> Stats {
    let sched = scheduler_ref();
    Stats {
        procs: sched.procs(),
        global_queue_len: sched.global_len(),
        idle_procs: sched.idle_procs(),
        spinning_machines: sched.spinning(),
        machines: sched.machines(),
        live_greenlets: active_greenlet_count(),
    }
}

struct JoinInner<T> {
    slot: Mutex<Option<T>>,
    done: Condvar,
}

/// Handle to a spawned greenlet's result.
pub struct JoinHandle<T> {
    inner: Arc<JoinInner<T>>,
}

impl<T> JoinHandle<T> {
    /// Blocks the calling OS thread until the greenlet's body returns and
    /// yields its output. Meant for threads outside the runtime (tests,
    /// `main`); calling it from inside a greenlet stalls that greenlet's
    /// whole worker, so prefer channels built on [`park_with`]/[`ready`]
    /// there.
    pub fn join(self) -> T {
        let mut slot = self.inner.slot.lock();
        while slot.is_none() {
            self.inner.done.wait(&mut slot);
        }
        slot.take().expect("join result vanished")
    }

    /// Non-blocking probe for completion.
    pub fn try_join(&self) -> Option<T> {
        self.inner.slot.lock().take()
    }
}

/// Spawns a greenlet. From inside the runtime the new greenlet lands in
/// the spawner's `run_next` slot (it will run before anything already
/// queued there); from a foreign thread it is injected globally and a
/// worker is woken if needed.
pub fn spawn<T, F>(f: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let sched = scheduler_ref();
    let inner = Arc::new(JoinInner {
        slot: Mutex::new(None),
        done: Condvar::new(),
    });
    let inner2 = inner.clone();
    let body = Box::new(move || {
        let out = f();
        *inner2.slot.lock() = Some(out);
        inner2.done.notify_all();
    });
    LIVE_GREENLETS.fetch_add(1, Ordering::Relaxed);
    let g = Greenlet::alloc(body, sched.greenlet_stack());
    unsafe { (*g).set_status(GStatus::Runnable) };
    sched.schedule_new(g);
    JoinHandle { inner }
}

/// Spawns `f` and blocks the calling OS thread on its completion.
pub fn block_on<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    spawn(f).join()
}

/// Voluntarily gives up the processor: the current greenlet goes to the
/// back of its P's local queue. Outside the runtime this degrades to an
/// OS-level yield.
pub fn yield_now() {
    match machine::current_gp() {
        Some(g) => unsafe { greenlet::switch_out(g, SwitchReason::Yielded) },
        None => std::thread::yield_now(),
    }
}

/// An opaque handle to the running greenlet, for handing to wait lists.
pub fn current() -> GreenletRef {
    GreenletRef(machine::current_gp().expect("current() outside the runtime"))
}

/// Parks the current greenlet. `pred` runs on the worker's scheduler stack
/// *after* the greenlet's context is fully saved, which makes it the safe
/// place to publish the greenlet to whoever will [`ready`] it (push it on
/// a wait list, hand it to a pool, release a lock). Returning `false`
/// aborts the park and the greenlet resumes immediately, keeping its
/// quantum.
pub fn park_with<F>(mut pred: F)
where
    F: FnMut() -> bool,
{
    let g = machine::current_gp().expect("park_with outside the runtime");
    unsafe {
        let pred_obj: *mut (dyn FnMut() -> bool + '_) = &mut pred;
        (*g).set_park_pred(greenlet::erase_pred_lifetime(pred_obj));
        (*g).transition(GStatus::Running, GStatus::Waiting);
        greenlet::switch_out(g, SwitchReason::Parked);
    }
}

/// Atomically releases `guard` and parks; the building block for channels
/// and condition variables. The lock is dropped only after the greenlet
/// can safely be readied by whoever acquires it next.
pub fn park_unlock<T>(guard: MutexGuard<'_, T>) {
    let mut guard = Some(guard);
    park_with(move || {
        drop(guard.take());
        true
    });
}

/// Makes a parked greenlet runnable again and wakes a worker if nobody is
/// searching for work. The handle must come from [`current`] on the
/// greenlet that then parked; readying a greenlet that is not parked is a
/// fatal runtime error.
pub fn ready(g: GreenletRef) {
    scheduler_ref().make_ready(g.0);
}

/// Declares that the current greenlet is about to enter a blocking system
/// call: its P is released (and handed to another worker if it still has
/// work) so the call can stall only this OS thread.
pub fn enter_syscall_block() {
    machine::with_worker(|w| scheduler_ref().enter_syscall_block(w))
        .expect("enter_syscall_block outside the runtime");
}

/// Declares that the blocking system call finished. The worker tries to
/// take its old P back, then any idle P; with neither available the
/// greenlet is re-queued globally and this worker parks.
pub fn exit_syscall() {
    machine::with_worker(|w| scheduler_ref().exit_syscall(w))
        .expect("exit_syscall outside the runtime");
}

/// The OS error code captured when this greenlet's last offloaded work
/// item finished (zero when none was set).
pub fn last_os_error() -> i32 {
    let g = machine::current_gp().expect("last_os_error outside the runtime");
    unsafe { (*g).saved_os_error() }
}
