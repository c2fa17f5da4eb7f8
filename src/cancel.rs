//! Cooperative cancellation token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// How long a blocked channel operation waits before re-checking the token.
pub(crate) const POLL_QUANTUM: Duration = Duration::from_millis(10);

/// Shared cancellation signal with an optional deadline.
///
/// Clones share the same state. A child token created with [`CancelToken::child`]
/// observes its parent: cancelling the parent cancels every descendant, while
/// cancelling a child leaves the parent untouched.
///
/// Cancellation is cooperative: long-running code is expected to call
/// [`CancelToken::check`] at its suspension points (each line read, each
/// channel wait quantum).
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<State>,
}

struct State {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<CancelToken>,
}

impl CancelToken {
    /// Creates a root token that never expires on its own.
    pub fn new() -> Self {
        Self::make(None, None)
    }

    /// Creates a root token that reports `DeadlineExceeded` once `timeout` elapses.
    pub fn with_deadline(timeout: Duration) -> Self {
        Self::make(Instant::now().checked_add(timeout), None)
    }

    /// Derives a token cancelled together with `self`.
    pub fn child(&self) -> Self {
        Self::make(None, Some(self.clone()))
    }

    /// Derives a token cancelled together with `self` or once `timeout` elapses.
    pub fn child_with_deadline(&self, timeout: Duration) -> Self {
        Self::make(Instant::now().checked_add(timeout), Some(self.clone()))
    }

    fn make(deadline: Option<Instant>, parent: Option<CancelToken>) -> Self {
        CancelToken {
            state: Arc::new(State {
                cancelled: AtomicBool::new(false),
                deadline,
                parent,
            }),
        }
    }

    /// Fires the token. Idempotent.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }

    /// Returns the error the token currently reports, if any.
    ///
    /// An explicit `cancel` wins over an elapsed deadline; a clean token
    /// forwards to its parent.
    pub fn status(&self) -> Option<Error> {
        if self.state.cancelled.load(Ordering::Acquire) {
            return Some(Error::Cancelled);
        }

        if let Some(deadline) = self.state.deadline {
            if Instant::now() >= deadline {
                return Some(Error::DeadlineExceeded);
            }
        }

        match &self.state.parent {
            Some(parent) => parent.status(),
            None => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status().is_some()
    }

    /// `Err` with the token status if the token has fired.
    pub fn check(&self) -> Result<()> {
        match self.status() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        CancelToken::new()
    }
}
