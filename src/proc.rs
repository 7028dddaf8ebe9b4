use std::sync::atomic::{AtomicU32, Ordering};

use crate::runq::LocalRunq;

/// Sentinel for "no machine attached".
pub(crate) const NO_M: u32 = u32::MAX;

/// Logical-processor states. Only CAS moves a P between them, which makes
/// the status word the single ownership arbiter during hand-offs.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PStatus {
    Idle = 0,
    Running = 1,
    Syscall = 2,
    Dead = 3,
}

impl PStatus {
    fn from_u32(v: u32) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Syscall,
            _ => Self::Dead,
        }
    }
}

/// A scheduling slot: the bounded local run queue plus the bookkeeping a
/// worker needs while bound to it. The number of these is the concurrency
/// width and is fixed at startup.
pub(crate) struct Proc {
    id: u32,
    status: AtomicU32,
    pub(crate) runq: LocalRunq,
    sched_tick: AtomicU32,
    m_id: AtomicU32,
}

impl Proc {
    pub(crate) fn new(id: u32) -> Self {
        Proc {
            id,
            status: AtomicU32::new(PStatus::Idle as u32),
            runq: LocalRunq::new(),
            sched_tick: AtomicU32::new(0),
            m_id: AtomicU32::new(NO_M),
        }
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn status(&self) -> PStatus {
        PStatus::from_u32(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn cas_status(&self, old: PStatus, new: PStatus) -> bool {
        self.status
            .compare_exchange(old as u32, new as u32, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Transition that only the current owner may perform; failure means
    /// the P has two owners.
    pub(crate) fn transition(&self, old: PStatus, new: PStatus) {
        if !self.cas_status(old, new) {
            log::error!(
                "P{}: bad status transition {:?} -> {:?} (found {:?})",
                self.id,
                old,
                new,
                self.status()
            );
            panic!("processor status transition violated");
        }
    }

    /// Claims an unowned P for running: either a plain idle one or one
    /// abandoned at syscall entry. Returns false if someone else (e.g. the
    /// fast syscall-exit path) got it first.
    pub(crate) fn claim(&self) -> bool {
        self.cas_status(PStatus::Idle, PStatus::Running)
            || self.cas_status(PStatus::Syscall, PStatus::Running)
    }

    pub(crate) fn sched_tick(&self) -> u32 {
        self.sched_tick.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_sched_tick(&self) {
        self.sched_tick.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn m_id(&self) -> u32 {
        self.m_id.load(Ordering::Relaxed)
    }

    pub(crate) fn set_m(&self, m: u32) {
        self.m_id.store(m, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive() {
        let p = Proc::new(0);
        assert_eq!(p.status(), PStatus::Idle);
        assert!(p.claim());
        assert_eq!(p.status(), PStatus::Running);
        assert!(!p.claim());
        p.transition(PStatus::Running, PStatus::Syscall);
        // A syscall-abandoned P is claimable again.
        assert!(p.claim());
    }

    #[test]
    fn tick_counts_up() {
        let p = Proc::new(3);
        assert_eq!(p.sched_tick(), 0);
        p.inc_sched_tick();
        p.inc_sched_tick();
        assert_eq!(p.sched_tick(), 2);
        assert_eq!(p.id(), 3);
        assert_eq!(p.m_id(), NO_M);
    }
}
