//! Ambient context threaded through every core call.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::fs::Fs;

/// Execution environment: the file system, the cancellation token, the
/// current scope and the unhandled-error sink.
///
/// `Env` is cheap to clone and is passed by reference into every core
/// operation instead of being kept in process-wide globals. Workers receive
/// their own clones.
#[derive(Clone)]
pub struct Env {
    fs: Arc<dyn Fs>,
    cancel: CancelToken,
    scope: String,
    unhandled: Arc<Mutex<Vec<String>>>,
}

impl Env {
    pub fn new(fs: Arc<dyn Fs>, cancel: CancelToken) -> Self {
        Env {
            fs,
            cancel,
            scope: String::new(),
            unhandled: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn fs(&self) -> &dyn Fs {
        self.fs.as_ref()
    }

    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn check_cancelled(&self) -> Result<()> {
        self.cancel.check()
    }

    /// Derives an environment whose scope string is extended with `scope`.
    /// The scope decorates messages delivered to the unhandled-error sink.
    pub fn scoped(&self, scope: &str) -> Env {
        let mut derived = self.clone();
        derived.scope = format!("{}{}: ", self.scope, scope);
        derived
    }

    /// Derives an environment carrying `cancel` instead of the current token.
    pub fn with_cancel(&self, cancel: CancelToken) -> Env {
        let mut derived = self.clone();
        derived.cancel = cancel;
        derived
    }

    /// Delivers an error that lost the first-error race or occurred outside
    /// the primary control path. Cancellation and deadline errors are
    /// filtered out; the rest are decorated with the scope, logged and kept
    /// for the final report.
    pub fn on_unhandled_error(&self, err: Error) {
        if err.is_cancellation() {
            return;
        }

        let decorated = format!("{}{}", self.scope, err);
        log::error!("UNHANDLED ERROR: {}", decorated);
        self.unhandled.lock().push(decorated);
    }

    /// Snapshot of the collected unhandled-error tail.
    pub fn unhandled_errors(&self) -> Vec<String> {
        self.unhandled.lock().clone()
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env").field("scope", &self.scope).finish()
    }
}

/// First-error latch: the first stored error wins and is eventually returned
/// to the caller, later errors are delivered to the unhandled-error sink.
///
/// The winner is expected to fire the shared cancellation token so that the
/// rest of the pipeline unwinds.
pub(crate) struct FirstError {
    slot: Mutex<Option<Error>>,
}

impl FirstError {
    pub fn new() -> Self {
        FirstError {
            slot: Mutex::new(None),
        }
    }

    /// Stores `err` if the slot is still empty and reports whether it won.
    /// A losing error goes to the sink of `env`.
    pub fn set(&self, env: &Env, err: Error) -> bool {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            None => {
                *slot = Some(err);
                true
            }
            Some(_) => {
                drop(slot);
                env.on_unhandled_error(err);
                false
            }
        }
    }

    /// Takes the stored error out of the latch.
    pub fn take(&self) -> Option<Error> {
        self.slot.lock().take()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{Env, FirstError};
    use crate::cancel::CancelToken;
    use crate::error::Error;
    use crate::fs::MemFs;

    fn new_env() -> Env {
        Env::new(Arc::new(MemFs::new()), CancelToken::new())
    }

    #[test]
    fn test_scope_decoration() {
        let env = new_env().scoped("split").scoped("save");
        env.on_unhandled_error(Error::NoFiles);

        let errs = env.unhandled_errors();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0], "split: save: no files");
    }

    #[test]
    fn test_cancellation_errors_are_filtered() {
        let env = new_env();
        env.on_unhandled_error(Error::Cancelled);
        env.on_unhandled_error(Error::DeadlineExceeded);
        assert!(env.unhandled_errors().is_empty());
    }

    #[test]
    fn test_sink_is_shared_by_derived_envs() {
        let env = new_env();
        env.scoped("a").on_unhandled_error(Error::NoFiles);
        env.scoped("b").on_unhandled_error(Error::NotSorted);
        assert_eq!(env.unhandled_errors().len(), 2);
    }

    #[test]
    fn test_first_error_wins() {
        let env = new_env();
        let latch = FirstError::new();

        assert!(latch.set(&env, Error::NoFiles));
        assert!(!latch.set(&env, Error::NotSorted));

        assert!(matches!(latch.take(), Some(Error::NoFiles)));
        assert!(latch.take().is_none());

        let errs = env.unhandled_errors();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0], "not sorted");
    }

    #[test]
    fn test_losing_cancellation_is_not_collected() {
        let env = new_env();
        let latch = FirstError::new();

        assert!(latch.set(&env, Error::NoFiles));
        assert!(!latch.set(&env, Error::Cancelled));
        assert!(env.unhandled_errors().is_empty());
    }
}
