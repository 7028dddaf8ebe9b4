//! The per-processor run queue: a fixed 256-slot ring with a single
//! producer (the worker bound to the P) and multiple consumers (stealers),
//! plus a one-slot `run_next` LIFO hint that bypasses the ring.
//!
//! The owner publishes slots with a release store of `tail`; consumers
//! commit with a CAS on `head`, so a slot read that lost the race is simply
//! discarded. `head` and `tail` are free-running `u32`s and are reduced
//! modulo the capacity only when indexing.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use crate::greenlet::{GList, Gp};
use crate::scheduler::Scheduler;

pub(crate) const LOCAL_QUEUE_CAP: usize = 256;

pub(crate) struct LocalRunq {
    head: AtomicU32,
    tail: AtomicU32,
    run_next: AtomicPtr<crate::greenlet::Greenlet>,
    slots: [AtomicPtr<crate::greenlet::Greenlet>; LOCAL_QUEUE_CAP],
}

impl LocalRunq {
    pub(crate) fn new() -> Self {
        LocalRunq {
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            run_next: AtomicPtr::new(ptr::null_mut()),
            slots: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
        }
    }

    /// Enqueues `g` on the owner side. With `next` set, `g` takes over the
    /// `run_next` slot and any displaced occupant is pushed to the ring
    /// tail instead. A full ring overflows half of itself plus `g` to the
    /// global queue.
    ///
    /// Owner-only, except that the `run_next` swap is a CAS and therefore
    /// safe against concurrent stealers.
    pub(crate) fn put(&self, g: Gp, next: bool, sched: &Scheduler) {
        let mut g = g;
        if next {
            let mut old = self.run_next.load(Ordering::Relaxed);
            loop {
                match self.run_next.compare_exchange(
                    old,
                    g,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(found) => old = found,
                }
            }
            if old.is_null() {
                return;
            }
            // Kick the displaced greenlet out to the regular queue.
            g = old;
        }
        loop {
            let h = self.head.load(Ordering::Acquire);
            let t = self.tail.load(Ordering::Relaxed);
            if t.wrapping_sub(h) < LOCAL_QUEUE_CAP as u32 {
                self.slots[t as usize % LOCAL_QUEUE_CAP].store(g, Ordering::Relaxed);
                // Publish the slot write.
                self.tail.store(t.wrapping_add(1), Ordering::Release);
                return;
            }
            if self.put_slow(g, h, t, sched) {
                return;
            }
            // A stealer moved head while we were grabbing the batch; the
            // ring has room again.
        }
    }

    /// Overflow path: detaches the older half of the ring plus `g` and
    /// splices all of them onto the global queue in one lock acquisition.
    /// Returns false if a stealer raced the batch claim.
    fn put_slow(&self, g: Gp, h: u32, t: u32, sched: &Scheduler) -> bool {
        let n = t.wrapping_sub(h) / 2;
        if n as usize != LOCAL_QUEUE_CAP / 2 {
            log::error!("put_slow on a queue that is not full (len {})", t.wrapping_sub(h));
            panic!("local run queue overflow invariant violated");
        }
        let mut batch = [ptr::null_mut(); LOCAL_QUEUE_CAP / 2 + 1];
        for (i, slot) in batch.iter_mut().enumerate().take(n as usize) {
            *slot = self.slots[(h.wrapping_add(i as u32)) as usize % LOCAL_QUEUE_CAP]
                .load(Ordering::Relaxed);
        }
        if self
            .head
            .compare_exchange(h, h.wrapping_add(n), Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        batch[n as usize] = g;
        for i in 0..n as usize {
            unsafe {
                (*batch[i]).schedlink.store(batch[i + 1], Ordering::Relaxed);
            }
        }
        unsafe {
            (*batch[n as usize])
                .schedlink
                .store(ptr::null_mut(), Ordering::Relaxed);
        }
        log::trace!("local queue overflow: {} greenlets to the global queue", n + 1);
        sched.global_put_batch(GList::from_chain(batch[0], batch[n as usize], n + 1));
        true
    }

    /// Owner-side dequeue. Returns the greenlet and whether it inherits
    /// the current scheduling quantum (true only for `run_next` hits).
    pub(crate) fn get(&self) -> Option<(Gp, bool)> {
        loop {
            let next = self.run_next.load(Ordering::Relaxed);
            if next.is_null() {
                break;
            }
            if self
                .run_next
                .compare_exchange(next, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some((next, true));
            }
        }
        loop {
            let h = self.head.load(Ordering::Acquire);
            let t = self.tail.load(Ordering::Acquire);
            if t == h {
                return None;
            }
            let g = self.slots[h as usize % LOCAL_QUEUE_CAP].load(Ordering::Relaxed);
            // The CAS guards against a stealer taking the same slot.
            if self
                .head
                .compare_exchange(h, h.wrapping_add(1), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some((g, false));
            }
        }
    }

    /// Steals roughly half of `victim`'s ring into `self` (the thief must
    /// be the owner of `self`) and returns one greenlet to run now. On an
    /// empty ring with `steal_next` set, takes the victim's `run_next`.
    pub(crate) fn steal(&self, victim: &LocalRunq, steal_next: bool) -> Option<Gp> {
        let t = self.tail.load(Ordering::Relaxed);
        let n = self.grab(victim, t, steal_next)?;
        let n = n - 1;
        let g = self.slots[(t.wrapping_add(n)) as usize % LOCAL_QUEUE_CAP].load(Ordering::Relaxed);
        if n == 0 {
            return Some(g);
        }
        let h = self.head.load(Ordering::Acquire);
        if t.wrapping_add(n).wrapping_sub(h) > LOCAL_QUEUE_CAP as u32 {
            log::error!("steal overflowed the thief's queue");
            panic!("run queue bound violated during steal");
        }
        self.tail.store(t.wrapping_add(n), Ordering::Release);
        Some(g)
    }

    /// Copies up to half of `victim`'s ring into our slots starting at
    /// `batch_tail`, committing with a CAS on the victim's head. Returns
    /// how many were taken.
    fn grab(&self, victim: &LocalRunq, batch_tail: u32, steal_next: bool) -> Option<u32> {
        loop {
            let h = victim.head.load(Ordering::Acquire);
            let t = victim.tail.load(Ordering::Acquire);
            let len = t.wrapping_sub(h);
            let n = len - len / 2;
            if n == 0 {
                if steal_next {
                    let next = victim.run_next.load(Ordering::Relaxed);
                    if next.is_null() {
                        return None;
                    }
                    if victim
                        .run_next
                        .compare_exchange(
                            next,
                            ptr::null_mut(),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_err()
                    {
                        continue;
                    }
                    self.slots[batch_tail as usize % LOCAL_QUEUE_CAP]
                        .store(next, Ordering::Relaxed);
                    return Some(1);
                }
                return None;
            }
            if n > (LOCAL_QUEUE_CAP / 2) as u32 {
                // Inconsistent head/tail pair; re-read.
                continue;
            }
            for i in 0..n {
                let g = victim.slots[(h.wrapping_add(i)) as usize % LOCAL_QUEUE_CAP]
                    .load(Ordering::Relaxed);
                self.slots[(batch_tail.wrapping_add(i)) as usize % LOCAL_QUEUE_CAP]
                    .store(g, Ordering::Relaxed);
            }
            if victim
                .head
                .compare_exchange(h, h.wrapping_add(n), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                log::trace!("stole {} greenlets", n);
                return Some(n);
            }
        }
    }

    /// Best-effort emptiness.
    pub(crate) fn is_empty(&self) -> bool {
        let h = self.head.load(Ordering::Acquire);
        let t = self.tail.load(Ordering::Acquire);
        t == h && self.run_next.load(Ordering::Relaxed).is_null()
    }

    /// Best-effort length of the ring (excludes `run_next`).
    #[cfg(test)]
    pub(crate) fn len(&self) -> u32 {
        let h = self.head.load(Ordering::Acquire);
        let t = self.tail.load(Ordering::Acquire);
        t.wrapping_sub(h)
    }

}
