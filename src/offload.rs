//! The blocking-offload pools: fixed sets of plain OS threads that run
//! work which would otherwise stall a P, then hand the submitting greenlet
//! back to the scheduler. Name resolution gets its own pool so a slow DNS
//! server cannot exhaust the general one.

use std::collections::VecDeque;
use std::io;
use std::mem;
use std::thread;

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::greenlet::Gp;
use crate::machine;

/// A unit of blocking work. Implementations run exactly once on a pool
/// thread and consume themselves.
pub(crate) trait Work: Send {
    fn run(self: Box<Self>);
}

/// Work submitted by a greenlet: runs the job, records the thread's OS
/// error state for the submitter, then re-queues the submitter.
struct GletWork {
    g: Gp,
    job: Option<Box<dyn FnOnce() + Send>>,
}

unsafe impl Send for GletWork {}

impl Work for GletWork {
    fn run(mut self: Box<Self>) {
        if let Some(job) = self.job.take() {
            job();
        }
        let err = io::Error::last_os_error().raw_os_error().unwrap_or(0);
        unsafe { (*self.g).set_saved_os_error(err) };
        // Hand the greenlet back, then self-destruct by going out of scope.
        crate::scheduler_ref().make_ready(self.g);
    }
}

struct PoolShared {
    queue: Mutex<VecDeque<Box<dyn Work>>>,
    available: Condvar,
}

pub(crate) struct OffloadPool {
    shared: &'static PoolShared,
}

impl OffloadPool {
    /// Starts `threads` workers named after `name`. The pool lives for the
    /// process; its threads park on the condvar when the queue runs dry.
    pub(crate) fn start(name: &'static str, threads: usize) -> Self {
        let shared: &'static PoolShared = Box::leak(Box::new(PoolShared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }));
        for i in 0..threads.max(1) {
            thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || pool_loop(shared))
                .expect("failed to spawn an offload thread");
        }
        log::debug!("offload pool {} up with {} threads", name, threads.max(1));
        OffloadPool { shared }
    }

    pub(crate) fn add_work(&self, work: Box<dyn Work>) {
        self.shared.queue.lock().push_back(work);
        self.shared.available.notify_one();
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }
}

fn pool_loop(shared: &'static PoolShared) {
    let mut queue = shared.queue.lock();
    loop {
        // Drain everything runnable before sleeping again.
        while let Some(work) = queue.pop_front() {
            MutexGuard::unlocked(&mut queue, || work.run());
        }
        shared.available.wait(&mut queue);
    }
}

static BLOCKING_POOL: Lazy<OffloadPool> =
    Lazy::new(|| OffloadPool::start("tin-offload", crate::config().blocking_threads));

static RESOLVER_POOL: Lazy<OffloadPool> =
    Lazy::new(|| OffloadPool::start("tin-resolver", crate::config().resolver_threads));

/// Runs `f` on the general blocking pool while this greenlet's P keeps
/// executing other work; returns `f`'s output once the pool finishes and
/// the greenlet is rescheduled. The pool thread's OS error code is saved
/// and readable through [`crate::last_os_error`].
///
/// Must be called from inside a greenlet.
pub fn submit_blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    submit_on(&BLOCKING_POOL, f)
}

/// Like [`submit_blocking`], but on the pool dedicated to name resolution.
pub fn submit_resolver_blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    submit_on(&RESOLVER_POOL, f)
}

fn submit_on<T, F>(pool: &OffloadPool, f: F) -> T
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    let g = machine::current_gp().expect("submit_blocking outside the runtime");
    let mut slot: Option<T> = None;
    {
        let slot_ref = &mut slot;
        let job: Box<dyn FnOnce() + Send + '_> = Box::new(move || {
            *slot_ref = Some(f());
        });
        // The job borrows this greenlet's stack, which stays frozen until
        // the pool readies it again.
        let job: Box<dyn FnOnce() + Send + 'static> = unsafe { mem::transmute(job) };
        let mut work: Option<Box<dyn Work>> = Some(Box::new(GletWork { g, job: Some(job) }));
        // Enqueue from the park predicate: it runs after this context is
        // fully saved, so the pool can never resume a half-switched
        // greenlet.
        crate::park_with(move || {
            pool.add_work(work.take().expect("offload work enqueued twice"));
            true
        });
    }
    slot.expect("offload work finished without producing output")
}
