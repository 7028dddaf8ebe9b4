//! OS worker threads. Each worker owns a parker (its binary semaphore), a
//! hand-off slot a waker fills before signalling it, and the dispatch loop
//! that resumes greenlets and routes them on the way out.

use std::cell::Cell;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_utils::sync::{Parker, Unparker};
use scoped_tls::scoped_thread_local;
use scopeguard::defer;

use crate::greenlet::{self, GStatus, Gp, SwitchReason};
use crate::proc::Proc;
use crate::scheduler::Scheduler;

/// Sentinel for an empty hand-off slot.
pub(crate) const NO_P: u32 = u32::MAX;

/// The cross-thread face of a worker: what wakers need.
pub(crate) struct MachineShared {
    pub(crate) id: u32,
    pub(crate) unparker: Unparker,
    /// P to attach on wakeup, set by the waker before unparking.
    pub(crate) next_p: AtomicU32,
    pub(crate) next_spinning: AtomicBool,
}

/// The thread-local face: everything only the worker itself touches.
pub(crate) struct WorkerCtx {
    pub(crate) shared: Arc<MachineShared>,
    pub(crate) parker: Parker,
    pub(crate) p: Cell<Option<&'static Proc>>,
    /// The P remembered across a blocking syscall for the fast exit path.
    pub(crate) syscall_p: Cell<Option<&'static Proc>>,
    pub(crate) cur_g: Cell<Gp>,
    pub(crate) spinning: Cell<bool>,
}

scoped_thread_local!(static WORKER: WorkerCtx);

/// Runs `f` with the current worker context, or returns `None` when called
/// from a thread that is not a worker.
pub(crate) fn with_worker<R>(f: impl FnOnce(&WorkerCtx) -> R) -> Option<R> {
    if WORKER.is_set() {
        Some(WORKER.with(f))
    } else {
        None
    }
}

/// The greenlet currently running on this thread, if any.
pub(crate) fn current_gp() -> Option<Gp> {
    with_worker(|w| w.cur_g.get()).filter(|g| !g.is_null())
}

/// Worker thread entry. Attaches the P handed over at creation, then loops
/// between finding work and running it forever; workers never exit.
pub(crate) fn run(sched: &'static Scheduler, shared: Arc<MachineShared>, parker: Parker) {
    let id = shared.id;
    defer!({
        if std::thread::panicking() {
            log::error!("worker {} died in a panic", id);
        }
    });
    let w = WorkerCtx {
        shared,
        parker,
        p: Cell::new(None),
        syscall_p: Cell::new(None),
        cur_g: Cell::new(ptr::null_mut()),
        spinning: Cell::new(false),
    };
    WORKER.set(&w, || worker_loop(sched, &w));
}

fn worker_loop(sched: &'static Scheduler, w: &WorkerCtx) {
    let pid = w.shared.next_p.swap(NO_P, Ordering::Acquire);
    if pid != NO_P {
        sched.attach_p(w, sched.proc_at(pid));
        if w.shared.next_spinning.swap(false, Ordering::AcqRel) {
            w.spinning.set(true);
            // The creator already counted us as spinning.
        }
    }
    loop {
        if w.p.get().is_none() {
            sched.stop_m(w);
        }
        let (g, inherit) = sched.find_runnable(w);
        execute(sched, w, g, inherit);
    }
}

/// Runs one greenlet until it switches out, then decides where it goes:
/// local tail on a voluntary yield, wait list on a park (the predicate can
/// veto and keep the quantum), global queue after a stranded syscall exit,
/// the free list when done.
fn execute(sched: &'static Scheduler, w: &WorkerCtx, g: Gp, inherit: bool) {
    let mut inherit = inherit;
    loop {
        unsafe { (*g).transition(GStatus::Runnable, GStatus::Running) };
        if !inherit {
            if let Some(p) = w.p.get() {
                p.inc_sched_tick();
            }
        }
        w.cur_g.set(g);
        let reason = unsafe { greenlet::resume(g) };
        w.cur_g.set(ptr::null_mut());
        match reason {
            SwitchReason::Yielded => {
                // The context is saved (resume returned), so the status
                // change is safe to publish.
                unsafe { (*g).transition(GStatus::Running, GStatus::Runnable) };
                let p = w
                    .p
                    .get()
                    .expect("a yielding greenlet must leave its worker a P");
                p.runq.put(g, false, sched);
                return;
            }
            SwitchReason::Parked => {
                let pred = unsafe { (*g).take_park_pred() };
                let keep_parked = match pred {
                    Some(pred) => unsafe { (&mut *pred)() },
                    None => true,
                };
                if keep_parked {
                    // The wait list owns the greenlet now; nothing of it
                    // may be touched here.
                    return;
                }
                if unsafe { (*g).cas_status(GStatus::Waiting, GStatus::Runnable) } {
                    // Aborted park: run it again on the same quantum.
                    inherit = true;
                    continue;
                }
                // A waker got there first and queued it.
                return;
            }
            SwitchReason::SyscallParked => {
                if sched.requeue_after_syscall(w, g) {
                    // Got a P after all: resume the same greenlet here.
                    inherit = false;
                    continue;
                }
                // Queued globally; this worker has no P and the loop
                // parks it.
                return;
            }
            SwitchReason::Done => {
                unsafe {
                    (*g).set_status(GStatus::Dead);
                    greenlet::free(g);
                }
                crate::note_greenlet_done();
                return;
            }
        }
    }
}
