//! Cooperative cancellation for platen.
//!
//! The rendering core is thread-based; every operation that performs I/O,
//! waits, or calls user plugin code threads a [`CancelToken`] through and
//! polls it at its suspension points. Cancelling a token cancels all of its
//! children; cancelling a child leaves the parent untouched.
//!
//! # Example
//!
//! ```
//! use platen_cancel::CancelToken;
//!
//! let root = CancelToken::new();
//! let child = root.child();
//!
//! root.cancel();
//! assert!(child.is_cancelled());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Granularity of cancellable waits. Waiters observe cancellation within
/// one slice.
const POLL_SLICE: Duration = Duration::from_millis(25);

#[derive(Debug)]
struct Inner {
    flag: AtomicBool,
    parent: Option<Arc<Inner>>,
}

impl Inner {
    fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::Acquire) {
            return true;
        }
        match &self.parent {
            Some(parent) => parent.is_cancelled(),
            None => false,
        }
    }
}

/// A cloneable cancellation token. Clones observe the same flag; children
/// created with [`CancelToken::child`] additionally observe their parent.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// A fresh, un-cancelled root token.
    pub fn new() -> CancelToken {
        CancelToken {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                parent: None,
            }),
        }
    }

    /// A token that can never be cancelled, for callers without a
    /// cancellation source.
    pub fn never() -> CancelToken {
        CancelToken::new()
    }

    /// A child token: cancelled when either it or this token is cancelled.
    pub fn child(&self) -> CancelToken {
        CancelToken {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                parent: Some(Arc::clone(&self.inner)),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Sleeps for up to `duration`, waking early on cancellation. Returns
    /// `true` when the sleep ended because of cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep((deadline - now).min(POLL_SLICE));
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        CancelToken::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_live() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_observable_through_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn parent_cancels_child() {
        let parent = CancelToken::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_does_not_cancel_parent() {
        let parent = CancelToken::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn sleep_runs_to_completion_when_live() {
        let token = CancelToken::new();
        let start = Instant::now();
        let cancelled = token.sleep(Duration::from_millis(30));
        assert!(!cancelled);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn sleep_wakes_on_cancellation() {
        let token = CancelToken::new();
        let waker = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            waker.cancel();
        });

        let start = Instant::now();
        let cancelled = token.sleep(Duration::from_secs(10));
        assert!(cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn pre_cancelled_sleep_returns_immediately() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.sleep(Duration::from_secs(10)));
    }
}
