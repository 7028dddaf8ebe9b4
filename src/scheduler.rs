//! The process-wide scheduler: the global run queue and its lock, the
//! idle-P and idle-M stacks, the spinning-worker gate, the work-finding
//! cascade, and the syscall hand-off protocol.

use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_utils::sync::Parker;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::greenlet::{self, GList, GStatus, Gp, SwitchReason};
use crate::machine::{self, MachineShared, WorkerCtx, NO_P};
use crate::netpoll;
use crate::proc::{PStatus, Proc, NO_M};
use crate::runq::LOCAL_QUEUE_CAP;
use crate::Config;

/// Every 61st tick on a P, the global queue is polled ahead of the local
/// one so globally queued greenlets cannot starve.
const GLOBAL_POLL_INTERVAL: u32 = 61;

/// Steal passes over the randomized victim order; the last one also raids
/// `run_next` slots.
const STEAL_PASSES: usize = 4;

struct SchedInner {
    runq_head: Gp,
    runq_tail: Gp,
    idle_ps: Vec<u32>,
    idle_ms: Vec<Arc<MachineShared>>,
}

// Raw greenlet pointers are only touched under the lock that guards them.
unsafe impl Send for SchedInner {}

pub(crate) struct Scheduler {
    inner: Mutex<SchedInner>,
    allp: Box<[Proc]>,
    /// Mirror of the global queue length, readable without the lock.
    global_size: AtomicI32,
    /// Mirror of `idle_ps.len()`; may transiently overcount while a
    /// syscall-abandoned P is reclaimed past the stack (see `pidle_get`).
    nr_idlep: AtomicU32,
    nr_spinning: AtomicU32,
    mcount: AtomicU32,
    max_mcount: u32,
    last_poll: AtomicU64,
    greenlet_stack: usize,
    worker_stack: usize,
}

impl Scheduler {
    /// Builds the scheduler and leaks it; the runtime lives for the whole
    /// process, exactly like its workers. All Ps start on the idle stack.
    pub(crate) fn new_leaked(cfg: &Config) -> &'static Scheduler {
        let procs = cfg.procs.max(1);
        let allp: Box<[Proc]> = (0..procs as u32).map(Proc::new).collect();
        // Reverse so P0 pops first.
        let idle_ps: Vec<u32> = (0..procs as u32).rev().collect();
        let sched = Box::leak(Box::new(Scheduler {
            inner: Mutex::new(SchedInner {
                runq_head: ptr::null_mut(),
                runq_tail: ptr::null_mut(),
                idle_ps,
                idle_ms: Vec::new(),
            }),
            allp,
            global_size: AtomicI32::new(0),
            nr_idlep: AtomicU32::new(procs as u32),
            nr_spinning: AtomicU32::new(0),
            mcount: AtomicU32::new(0),
            max_mcount: cfg.max_machines,
            last_poll: AtomicU64::new(0),
            greenlet_stack: cfg.greenlet_stack,
            worker_stack: cfg.worker_stack,
        }));
        log::debug!("scheduler up with {} processors", procs);
        sched
    }

    pub(crate) fn procs(&self) -> usize {
        self.allp.len()
    }

    pub(crate) fn proc_at(&'static self, id: u32) -> &'static Proc {
        &self.allp[id as usize]
    }

    pub(crate) fn greenlet_stack(&self) -> usize {
        self.greenlet_stack
    }

    pub(crate) fn machines(&self) -> u32 {
        self.mcount.load(Ordering::Relaxed)
    }

    pub(crate) fn spinning(&self) -> u32 {
        self.nr_spinning.load(Ordering::SeqCst)
    }

    pub(crate) fn idle_procs(&self) -> u32 {
        self.nr_idlep.load(Ordering::SeqCst)
    }

    // ---- global run queue -------------------------------------------------

    pub(crate) fn global_len(&self) -> usize {
        self.global_size.load(Ordering::SeqCst).max(0) as usize
    }

    fn push_back_locked(&self, inner: &mut SchedInner, g: Gp) {
        unsafe { (*g).schedlink.store(ptr::null_mut(), Ordering::Relaxed) };
        if inner.runq_tail.is_null() {
            inner.runq_head = g;
        } else {
            unsafe { (*inner.runq_tail).schedlink.store(g, Ordering::Relaxed) };
        }
        inner.runq_tail = g;
        self.global_size.fetch_add(1, Ordering::SeqCst);
    }

    fn push_front_locked(&self, inner: &mut SchedInner, g: Gp) {
        unsafe { (*g).schedlink.store(inner.runq_head, Ordering::Relaxed) };
        inner.runq_head = g;
        if inner.runq_tail.is_null() {
            inner.runq_tail = g;
        }
        self.global_size.fetch_add(1, Ordering::SeqCst);
    }

    fn pop_front_locked(&self, inner: &mut SchedInner) -> Option<Gp> {
        if inner.runq_head.is_null() {
            return None;
        }
        let g = inner.runq_head;
        inner.runq_head = unsafe { (*g).schedlink.load(Ordering::Relaxed) };
        if inner.runq_head.is_null() {
            inner.runq_tail = ptr::null_mut();
        }
        self.global_size.fetch_sub(1, Ordering::SeqCst);
        Some(g)
    }

    /// FIFO enqueue at the tail.
    pub(crate) fn global_put(&self, g: Gp) {
        let mut inner = self.inner.lock();
        self.push_back_locked(&mut inner, g);
    }

    /// Splices a prebuilt chain onto the tail in one lock acquisition.
    pub(crate) fn global_put_batch(&self, list: GList) {
        if list.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        self.splice_locked(&mut inner, list);
    }

    fn splice_locked(&self, inner: &mut SchedInner, list: GList) {
        if inner.runq_tail.is_null() {
            inner.runq_head = list.head();
        } else {
            unsafe {
                (*inner.runq_tail)
                    .schedlink
                    .store(list.head(), Ordering::Relaxed)
            };
        }
        inner.runq_tail = list.tail();
        self.global_size.fetch_add(list.len() as i32, Ordering::SeqCst);
    }

    /// Dequeues up to a fair slice of the global queue; the first greenlet
    /// is returned and the rest go to `p`'s local queue. `max` of zero
    /// means "no explicit cap".
    fn global_get_locked(
        &self,
        inner: &mut SchedInner,
        p: Option<&Proc>,
        max: u32,
    ) -> Option<Gp> {
        let size = self.global_size.load(Ordering::SeqCst);
        if size <= 0 {
            return None;
        }
        let mut n = size / self.allp.len() as i32 + 1;
        n = n.min(size);
        if max > 0 {
            n = n.min(max as i32);
        }
        // Never more than half the local capacity, so the local puts below
        // cannot overflow back into this lock.
        n = n.min((LOCAL_QUEUE_CAP / 2) as i32);
        let g = self.pop_front_locked(inner)?;
        if let Some(p) = p {
            for _ in 1..n {
                match self.pop_front_locked(inner) {
                    Some(extra) => p.runq.put(extra, false, self),
                    None => break,
                }
            }
        }
        Some(g)
    }

    /// Splices `list` onto the global queue and wakes one worker per
    /// injected greenlet, capped by the number of idle Ps.
    pub(crate) fn inject(&'static self, mut list: GList) {
        if list.is_empty() {
            return;
        }
        let mut chained = GList::new();
        while let Some(g) = list.pop_front() {
            unsafe { (*g).transition(GStatus::Waiting, GStatus::Runnable) };
            chained.push_back(g);
        }
        let n = chained.len();
        {
            let mut inner = self.inner.lock();
            self.splice_locked(&mut inner, chained);
        }
        let wake = n.min(self.nr_idlep.load(Ordering::SeqCst));
        for _ in 0..wake {
            self.start_m(None, false);
        }
    }

    // ---- idle P stack -----------------------------------------------------

    fn pidle_put_locked(&self, inner: &mut SchedInner, p: &Proc) {
        debug_assert_eq!(p.m_id(), NO_M);
        inner.idle_ps.push(p.id());
        self.nr_idlep.fetch_add(1, Ordering::SeqCst);
    }

    /// Pops idle Ps until one can actually be claimed. Entries whose claim
    /// CAS fails were reclaimed by the fast syscall-exit path and are
    /// dropped.
    fn pidle_get_locked(&'static self, inner: &mut SchedInner) -> Option<&'static Proc> {
        while let Some(id) = inner.idle_ps.pop() {
            self.nr_idlep.fetch_sub(1, Ordering::SeqCst);
            let p = self.proc_at(id);
            if p.claim() {
                return Some(p);
            }
            log::trace!("P{} already reclaimed, skipping stale idle entry", id);
        }
        None
    }

    // ---- worker attachment ------------------------------------------------

    pub(crate) fn attach_p(&self, w: &WorkerCtx, p: &'static Proc) {
        debug_assert_eq!(p.status(), PStatus::Running);
        if w.p.get().is_some() || p.m_id() != NO_M {
            log::error!("attaching P{} which is already owned", p.id());
            panic!("processor double attach");
        }
        p.set_m(w.shared.id);
        w.p.set(Some(p));
    }

    fn release_p(&self, w: &WorkerCtx, p: &'static Proc) {
        debug_assert_eq!(w.p.get().map(|p| p.id()), Some(p.id()));
        w.p.set(None);
        p.set_m(NO_M);
        p.transition(PStatus::Running, PStatus::Idle);
    }

    // ---- machine lifecycle ------------------------------------------------

    /// Hands `p` (already claimed into `Running`) to a worker: an idle one
    /// if any is parked, otherwise a freshly created one. With `p` absent,
    /// claims an idle P first and gives up quietly if there is none.
    pub(crate) fn start_m(&'static self, p: Option<&'static Proc>, spinning: bool) {
        let mut inner = self.inner.lock();
        let p = match p {
            Some(p) => p,
            None => match self.pidle_get_locked(&mut inner) {
                Some(p) => p,
                None => {
                    drop(inner);
                    if spinning {
                        // Undo the caller's optimistic 0 -> 1.
                        self.nr_spinning.fetch_sub(1, Ordering::SeqCst);
                    }
                    return;
                }
            },
        };
        if let Some(m) = inner.idle_ms.pop() {
            drop(inner);
            // Hand-off slot first, then the signal.
            m.next_spinning.store(spinning, Ordering::Release);
            m.next_p.store(p.id(), Ordering::Release);
            m.unparker.unpark();
        } else {
            drop(inner);
            self.new_machine(p, spinning);
        }
    }

    fn new_machine(&'static self, p: &'static Proc, spinning: bool) {
        let id = self.mcount.fetch_add(1, Ordering::SeqCst) + 1;
        if id > self.max_mcount {
            log::error!(
                "cannot create worker {}: machine cap {} reached",
                id,
                self.max_mcount
            );
            panic!("worker thread exhaustion");
        }
        let parker = Parker::new();
        let shared = Arc::new(MachineShared {
            id,
            unparker: parker.unparker().clone(),
            next_p: AtomicU32::new(p.id()),
            next_spinning: std::sync::atomic::AtomicBool::new(spinning),
        });
        log::debug!("starting worker {} on P{}", id, p.id());
        thread::Builder::new()
            .name(format!("tin-worker-{}", id))
            .stack_size(self.worker_stack)
            .spawn(move || machine::run(self, shared, parker))
            .expect("failed to spawn a worker thread");
    }

    /// Parks the current worker on the idle-M stack until a waker hands it
    /// a P through the hand-off slot.
    pub(crate) fn stop_m(&'static self, w: &WorkerCtx) {
        debug_assert!(w.p.get().is_none());
        debug_assert!(!w.spinning.get());
        {
            let mut inner = self.inner.lock();
            inner.idle_ms.push(w.shared.clone());
        }
        // The idle push above is what publishes us as parked; the parker's
        // token makes an unpark-before-park safe. Waking without a hand-off
        // P means an unpark raced ahead of the slot write; park again, we
        // are already off the idle stack.
        loop {
            w.parker.park();
            let pid = w.shared.next_p.swap(NO_P, Ordering::Acquire);
            if pid != NO_P {
                let p = self.proc_at(pid);
                self.attach_p(w, p);
                if w.shared.next_spinning.swap(false, Ordering::AcqRel) {
                    w.spinning.set(true);
                }
                return;
            }
            log::warn!("worker {} woke without a hand-off P", w.shared.id);
        }
    }

    /// Wakes one extra searching worker when there is spare capacity and
    /// nobody is already looking: the `nr_spinning == 0 && nr_idlep > 0`
    /// gate that keeps ready() cheap.
    pub(crate) fn wake_p_if_necessary(&'static self) {
        if self.nr_idlep.load(Ordering::SeqCst) == 0 {
            return;
        }
        if self.nr_spinning.load(Ordering::SeqCst) != 0 {
            return;
        }
        if self
            .nr_spinning
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.start_m(None, true);
    }

    /// Gives away a P abandoned at syscall entry: to a worker immediately
    /// if it still has work anywhere, otherwise onto the idle stack where
    /// it stays reclaimable by the fast exit path (it keeps its `Syscall`
    /// status there).
    pub(crate) fn handoff_p(&'static self, p: &'static Proc) {
        if !p.runq.is_empty() || self.global_len() > 0 {
            p.transition(PStatus::Syscall, PStatus::Running);
            self.start_m(Some(p), false);
            return;
        }
        let mut inner = self.inner.lock();
        // Recheck under the lock: a producer that saw no idle P may have
        // enqueued globally between the check above and here.
        if self.global_len() > 0 {
            drop(inner);
            p.transition(PStatus::Syscall, PStatus::Running);
            self.start_m(Some(p), false);
            return;
        }
        self.pidle_put_locked(&mut inner, p);
    }

    // ---- ready / spawn injection -----------------------------------------

    /// Waiting -> runnable, then queue on the current P (regular slot, not
    /// `run_next`) or globally when called from outside the runtime.
    pub(crate) fn make_ready(&'static self, g: Gp) {
        unsafe { (*g).transition(GStatus::Waiting, GStatus::Runnable) };
        self.queue_ready(g);
        self.wake_p_if_necessary();
    }

    /// Queues a freshly spawned greenlet: `run_next` on the spawner's P to
    /// promote locality, global otherwise.
    pub(crate) fn schedule_new(&'static self, g: Gp) {
        let queued_locally = machine::with_worker(|w| {
            if let Some(p) = w.p.get() {
                p.runq.put(g, true, self);
                true
            } else {
                false
            }
        })
        .unwrap_or(false);
        if !queued_locally {
            self.global_put(g);
        }
        self.wake_p_if_necessary();
    }

    fn queue_ready(&'static self, g: Gp) {
        let queued_locally = machine::with_worker(|w| {
            if let Some(p) = w.p.get() {
                p.runq.put(g, false, self);
                true
            } else {
                false
            }
        })
        .unwrap_or(false);
        if !queued_locally {
            self.global_put(g);
        }
    }

    // ---- the work-finding cascade ----------------------------------------

    /// Finds the next greenlet for the worker's P. Returns it together
    /// with the inherit-quantum hint. Parks the worker (releasing the P)
    /// when the whole runtime looks idle.
    pub(crate) fn find_runnable(&'static self, w: &WorkerCtx) -> (Gp, bool) {
        'top: loop {
            let p = w.p.get().expect("find_runnable without a P");

            // Periodic global poll for fairness.
            if p.sched_tick() % GLOBAL_POLL_INTERVAL == 0 && self.global_len() > 0 {
                let got = {
                    let mut inner = self.inner.lock();
                    self.global_get_locked(&mut inner, None, 1)
                };
                if let Some(g) = got {
                    self.found_work(w);
                    return (g, false);
                }
            }

            // Local queue, run_next first.
            if let Some((g, inherit)) = p.runq.get() {
                self.found_work(w);
                return (g, inherit);
            }

            // Global queue, batched.
            if self.global_len() > 0 {
                let got = {
                    let mut inner = self.inner.lock();
                    self.global_get_locked(&mut inner, Some(p), 0)
                };
                if let Some(g) = got {
                    self.found_work(w);
                    return (g, false);
                }
            }

            // Network poller, rate-limited by the poll clock.
            if let Some(g) = self.try_netpoll() {
                self.found_work(w);
                return (g, false);
            }

            // Work stealing.
            if !w.spinning.get() {
                w.spinning.set(true);
                self.nr_spinning.fetch_add(1, Ordering::SeqCst);
            }
            for pass in 0..STEAL_PASSES {
                let steal_next = pass == STEAL_PASSES - 1;
                let mut victims: SmallVec<[u32; 64]> = (0..self.allp.len() as u32).collect();
                fastrand::shuffle(&mut victims);
                for victim in victims {
                    if victim == p.id() {
                        continue;
                    }
                    let v = self.proc_at(victim);
                    if let Some(g) = p.runq.steal(&v.runq, steal_next) {
                        log::trace!("P{} stole work from P{}", p.id(), victim);
                        self.found_work(w);
                        return (g, false);
                    }
                }
            }

            // Nothing anywhere: recheck the global queue once under the
            // lock, then give the P back.
            {
                let mut inner = self.inner.lock();
                if self.global_len() > 0 {
                    if let Some(g) = self.global_get_locked(&mut inner, Some(p), 0) {
                        drop(inner);
                        self.found_work(w);
                        return (g, false);
                    }
                }
                self.release_p(w, p);
                self.pidle_put_locked(&mut inner, p);
            }

            if w.spinning.get() {
                w.spinning.set(false);
                self.nr_spinning.fetch_sub(1, Ordering::SeqCst);
                // Between a producer's tail publication and its read of
                // nr_spinning there is a window; now that we decremented,
                // re-scan every ring so that a push racing the decrement is
                // never stranded.
                for v in self.allp.iter() {
                    if !v.runq.is_empty() {
                        let reclaimed = {
                            let mut inner = self.inner.lock();
                            self.pidle_get_locked(&mut inner)
                        };
                        match reclaimed {
                            Some(p2) => {
                                self.attach_p(w, p2);
                                w.spinning.set(true);
                                self.nr_spinning.fetch_add(1, Ordering::SeqCst);
                                continue 'top;
                            }
                            None => break,
                        }
                    }
                }
                if self.global_len() > 0 {
                    let reclaimed = {
                        let mut inner = self.inner.lock();
                        self.pidle_get_locked(&mut inner)
                    };
                    if let Some(p2) = reclaimed {
                        self.attach_p(w, p2);
                        w.spinning.set(true);
                        self.nr_spinning.fetch_add(1, Ordering::SeqCst);
                        continue 'top;
                    }
                }
            }

            self.stop_m(w);
        }
    }

    /// Clears the spinning state after a successful search, waking a
    /// replacement searcher if this was the last one and idle Ps remain.
    fn found_work(&'static self, w: &WorkerCtx) {
        if !w.spinning.get() {
            return;
        }
        w.spinning.set(false);
        if self.nr_spinning.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.wake_p_if_necessary();
        }
    }

    fn try_netpoll(&'static self) -> Option<Gp> {
        let poller = netpoll::poller()?;
        let now = netpoll::now_ms();
        let last = self.last_poll.load(Ordering::Relaxed);
        if now.saturating_sub(last) < netpoll::POLL_RECENCY_MS {
            return None;
        }
        if self
            .last_poll
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        let ready = poller.poll();
        let mut iter = ready.into_iter();
        let first = iter.next()?.0;
        unsafe { (*first).transition(GStatus::Waiting, GStatus::Runnable) };
        let mut rest = GList::new();
        for r in iter {
            rest.push_back(r.0);
        }
        if !rest.is_empty() {
            self.inject(rest);
        }
        Some(first)
    }

    // ---- syscall protocol -------------------------------------------------

    /// Marks the running greenlet and its P as in-syscall, detaches the P
    /// (keeping a reference for the fast exit) and hands it off so its
    /// remaining work runs immediately.
    pub(crate) fn enter_syscall_block(&'static self, w: &WorkerCtx) {
        let g = w.cur_g.get();
        assert!(!g.is_null(), "enter_syscall_block outside a greenlet");
        unsafe { (*g).transition(GStatus::Running, GStatus::Syscall) };
        let p = w.p.get().expect("enter_syscall_block without a P");
        p.transition(PStatus::Running, PStatus::Syscall);
        p.set_m(NO_M);
        w.p.set(None);
        w.syscall_p.set(Some(p));
        self.handoff_p(p);
    }

    /// Reverses `enter_syscall_block`. Fast path: CAS the remembered P
    /// straight back from syscall to running; it never scans for other Ps.
    /// Otherwise switch to the dispatch loop, which acquires an idle P or
    /// requeues the greenlet globally with the worker going idle.
    pub(crate) fn exit_syscall(&'static self, w: &WorkerCtx) {
        let g = w.cur_g.get();
        assert!(!g.is_null(), "exit_syscall outside a greenlet");
        if let Some(oldp) = w.syscall_p.take() {
            if oldp.cas_status(PStatus::Syscall, PStatus::Running) {
                // Same P, never given away (or parked idle and not yet
                // claimed): reattach and keep going.
                oldp.set_m(w.shared.id);
                w.p.set(Some(oldp));
                unsafe { (*g).transition(GStatus::Syscall, GStatus::Running) };
                return;
            }
        }
        // The old P is gone; only the dispatch loop can finish this (the
        // context must be saved before the greenlet is enqueued anywhere).
        unsafe { greenlet::switch_out(g, SwitchReason::SyscallParked) };
        // Resumed with a P attached, either right here or by another worker.
        debug_assert_eq!(unsafe { (*g).status() }, GStatus::Running);
    }

    /// Dispatch-side tail of a stranded syscall exit, with the greenlet's
    /// context now saved: claim an idle P and keep running it on this
    /// worker, or enqueue it at the global head and report false so the
    /// worker parks. The idle-P probe and the enqueue share one lock
    /// acquisition: when no P is idle, every P is owned, and each owner's
    /// pre-park global recheck is ordered after this enqueue by the lock.
    pub(crate) fn requeue_after_syscall(&'static self, w: &WorkerCtx, g: Gp) -> bool {
        unsafe { (*g).transition(GStatus::Syscall, GStatus::Runnable) };
        let mut inner = self.inner.lock();
        if let Some(p) = self.pidle_get_locked(&mut inner) {
            drop(inner);
            self.attach_p(w, p);
            return true;
        }
        // Came back from a wait already; front of the line.
        self.push_front_locked(&mut inner, g);
        false
    }

    // ---- test access ------------------------------------------------------

    #[cfg(test)]
    pub(crate) fn global_pop_for_test(&self) -> Option<Gp> {
        let mut inner = self.inner.lock();
        self.pop_front_locked(&mut inner)
    }

    #[cfg(test)]
    pub(crate) fn pidle_pop_for_test(&'static self) -> Option<u32> {
        let mut inner = self.inner.lock();
        self.pidle_get_locked(&mut inner).map(|p| p.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::greenlet::test_support::{dummy, free_dummy};

    fn sched_with(procs: usize) -> &'static Scheduler {
        Scheduler::new_leaked(&Config {
            procs,
            ..Config::default()
        })
    }

    #[test]
    fn global_queue_is_fifo_with_head_insert() {
        let sched = sched_with(1);
        let a = dummy();
        let b = dummy();
        let c = dummy();
        sched.global_put(a);
        sched.global_put(b);
        {
            // Head insert, the way a syscall-stranded greenlet comes back.
            let mut inner = sched.inner.lock();
            sched.push_front_locked(&mut inner, c);
        }
        assert_eq!(sched.global_len(), 3);
        assert_eq!(sched.global_pop_for_test(), Some(c));
        assert_eq!(sched.global_pop_for_test(), Some(a));
        assert_eq!(sched.global_pop_for_test(), Some(b));
        assert_eq!(sched.global_len(), 0);
        for g in [a, b, c] {
            free_dummy(g);
        }
    }

    #[test]
    fn global_get_slices_into_local_queue() {
        let sched = sched_with(2);
        let gs: Vec<_> = (0..10).map(|_| dummy()).collect();
        for &g in &gs {
            sched.global_put(g);
        }
        let p = sched.proc_at(0);
        let got = {
            let mut inner = sched.inner.lock();
            sched.global_get_locked(&mut inner, Some(p), 0)
        };
        // 10/2 + 1 = 6: one returned, five pushed locally.
        assert_eq!(got, Some(gs[0]));
        assert_eq!(p.runq.len(), 5);
        assert_eq!(sched.global_len(), 4);
        gs.into_iter().for_each(free_dummy);
    }

    #[test]
    fn global_get_respects_max() {
        let sched = sched_with(1);
        let gs: Vec<_> = (0..5).map(|_| dummy()).collect();
        for &g in &gs {
            sched.global_put(g);
        }
        let got = {
            let mut inner = sched.inner.lock();
            sched.global_get_locked(&mut inner, None, 1)
        };
        assert_eq!(got, Some(gs[0]));
        assert_eq!(sched.global_len(), 4);
        gs.into_iter().for_each(free_dummy);
    }

    #[test]
    fn idle_p_stack_is_lifo_and_validates_claims() {
        let sched = sched_with(3);
        // P0 pops first (pushed last), and pops claim the P.
        assert_eq!(sched.pidle_pop_for_test(), Some(0));
        assert_eq!(sched.proc_at(0).status(), PStatus::Running);
        // Steal P1 out from under the stack the way a fast syscall exit
        // does; the stale entry is skipped.
        assert!(sched.proc_at(1).claim());
        assert_eq!(sched.pidle_pop_for_test(), Some(2));
        assert_eq!(sched.pidle_pop_for_test(), None);
    }

}
