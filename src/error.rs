//! Error taxonomy shared by every crate subsystem.

use std::io;
use std::path::PathBuf;

/// Crate-wide result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Sorting error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration validation failure.
    #[error("bad config: {0}")]
    BadConfig(String),
    /// File system entry does not exist.
    #[error("does not exist: '{}'", .0.display())]
    NotExist(PathBuf),
    /// File system entry already exists.
    #[error("already exists: '{}'", .0.display())]
    AlreadyExists(PathBuf),
    /// Operation is not permitted for the entry in its current state.
    #[error("permission denied: '{}'", .0.display())]
    Permission(PathBuf),
    /// Malformed path or argument.
    #[error("invalid: {0}")]
    Invalid(String),
    /// Merging got an empty input list.
    #[error("no files")]
    NoFiles,
    /// Checked file is not sorted.
    #[error("not sorted")]
    NotSorted,
    /// A writer accepted a different byte count than the serialized size.
    #[error("unexpected written bytes count: expected {expected}, written {written}")]
    UnexpectedWrittenBytes { expected: u64, written: u64 },
    /// Task submitted to an already closed worker pool.
    #[error("processor already closed")]
    ProcessorClosed,
    /// The cancellation token was fired.
    #[error("cancelled")]
    Cancelled,
    /// The cancellation token's deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// Common I/O error.
    #[error("I/O operation failed: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True for the errors produced by an observed cancellation token.
    /// They are expected consequences of a primary failure and are
    /// filtered out of the unhandled-error sink.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }
}

#[cfg(test)]
mod test {
    use super::Error;

    #[test]
    fn test_cancellation_predicate() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(Error::DeadlineExceeded.is_cancellation());
        assert!(!Error::NoFiles.is_cancellation());
        assert!(!Error::ProcessorClosed.is_cancellation());
    }
}
