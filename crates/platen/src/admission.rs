//! Concurrency admission.
//!
//! A counting semaphore gates the render pipeline: at most `capacity`
//! renders hold a permit at once. Waiters poll in short slices so they
//! observe cancellation promptly; a waiter that reaches its deadline
//! without a permit fails with [`Error::RendererBusy`]. Permits are RAII
//! and release on every exit path, including panics.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use platen_cancel::CancelToken;
use platen_types::{Error, Result};

/// Upper bound on one wait slice.
const WAIT_SLICE: Duration = Duration::from_millis(25);

/// Counting semaphore over the render pipeline.
#[derive(Debug)]
pub struct RenderGate {
    capacity: usize,
    in_use: Mutex<usize>,
    freed: Condvar,
}

/// An admission slot. Dropping it releases the slot and wakes one waiter.
#[derive(Debug)]
pub struct RenderPermit<'a> {
    gate: &'a RenderGate,
}

impl RenderGate {
    pub fn new(capacity: usize) -> RenderGate {
        RenderGate {
            capacity: capacity.max(1),
            in_use: Mutex::new(0),
            freed: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.capacity - *self.in_use.lock().unwrap()
    }

    /// Acquire one permit within `deadline`.
    ///
    /// Cancellation while waiting returns [`Error::Cancelled`]; reaching
    /// the deadline — including exactly reaching it — returns
    /// [`Error::RendererBusy`].
    pub fn acquire(&self, deadline: Duration, cancel: &CancelToken) -> Result<RenderPermit<'_>> {
        let until = Instant::now() + deadline;
        let mut in_use = self.in_use.lock().unwrap();

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let now = Instant::now();
            if now >= until {
                return Err(Error::RendererBusy);
            }
            if *in_use < self.capacity {
                *in_use += 1;
                return Ok(RenderPermit { gate: self });
            }

            let wait = (until - now).min(WAIT_SLICE);
            let (guard, _timeout) = self.freed.wait_timeout(in_use, wait).unwrap();
            in_use = guard;
        }
    }
}

impl Drop for RenderPermit<'_> {
    fn drop(&mut self) {
        let mut in_use = self.gate.in_use.lock().unwrap();
        *in_use = in_use.saturating_sub(1);
        self.gate.freed.notify_one();
    }
}
