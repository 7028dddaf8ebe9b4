//! The seam between the scheduler and the socket layer's readiness poller.
//! The scheduler never does I/O itself; it periodically asks a registered
//! poller for greenlets whose I/O completed and injects them as runnable.

use std::time::Instant;

use once_cell::sync::{Lazy, OnceCell};

use crate::greenlet::GreenletRef;

/// How stale the poll clock may get before `find_runnable` consults the
/// poller again.
pub(crate) const POLL_RECENCY_MS: u64 = 10;

static START: Lazy<Instant> = Lazy::new(Instant::now);
static POLLER: OnceCell<Box<dyn NetPoller>> = OnceCell::new();

/// Implemented by the I/O layer. `poll` must not block; it returns the
/// greenlets whose awaited readiness arrived, all still in their parked
/// state.
pub trait NetPoller: Send + Sync + 'static {
    fn poll(&self) -> Vec<GreenletRef>;
}

/// Registers the process-wide poller. Fails (returning the poller back) if
/// one is already installed.
pub fn set_net_poller(poller: Box<dyn NetPoller>) -> Result<(), Box<dyn NetPoller>> {
    POLLER.set(poller)
}

pub(crate) fn poller() -> Option<&'static dyn NetPoller> {
    POLLER.get().map(|p| &**p)
}

/// Milliseconds on the runtime's monotonic poll clock.
pub(crate) fn now_ms() -> u64 {
    START.elapsed().as_millis() as u64
}
