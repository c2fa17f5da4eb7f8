//! File system abstraction consumed by the sorting core.
//!
//! The core never touches `std::fs` directly: every open, create, move and
//! remove goes through the [`Fs`] trait so that the whole pipeline can run
//! against the in-memory implementation in tests, which also tracks open
//! handles and catches handle leaks.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::env::Env;
use crate::error::Result;

pub mod mem;
pub mod os;

pub use mem::MemFs;
pub use os::OsFs;

/// A file handle with an observable close.
///
/// `Drop` cannot report errors, so handles are closed explicitly; the
/// [`ScopedFile`] guard takes care of the exit paths that skip the explicit
/// close.
pub trait FileHandle {
    fn close(self: Box<Self>) -> Result<()>;
}

/// Readable file handle.
pub trait ReadFile: io::Read + FileHandle + Send {}

impl<T: io::Read + FileHandle + Send> ReadFile for T {}

/// Writable file handle.
pub trait WriteFile: io::Write + FileHandle + Send {}

impl<T: io::Write + FileHandle + Send> WriteFile for T {}

/// File system interface.
///
/// Implementations must be safe for concurrent use on distinct paths.
pub trait Fs: Send + Sync {
    /// Size of an existing file in bytes.
    fn file_size(&self, path: &Path) -> Result<u64>;

    /// Creates a new file for writing. The file must not exist yet.
    fn create_write_file(&self, path: &Path) -> Result<Box<dyn WriteFile>>;

    /// Opens an existing file for reading and reports its size.
    fn open_read_file(&self, path: &Path) -> Result<(Box<dyn ReadFile>, u64)>;

    /// Moves a file. Atomic within one volume; implementations may fall back
    /// to copy+remove across volumes. Fails if `dst` already exists; missing
    /// parent directories of `dst` are created.
    fn move_file(&self, src: &Path, dst: &Path) -> Result<()>;

    /// Removes a single file.
    fn remove(&self, path: &Path) -> Result<()>;

    /// Creates a directory together with its missing parents. Fails if the
    /// directory itself already exists.
    fn create_dir(&self, path: &Path) -> Result<()>;

    /// Removes a directory tree. Missing path is not an error.
    fn remove_all(&self, path: &Path) -> Result<()>;
}

/// Scope guard around a file handle.
///
/// The happy path closes the guard explicitly with [`ScopedFile::close`] and
/// observes the close error in its result. Every other exit path closes the
/// handle on drop and routes the close error into the unhandled-error sink
/// of the associated [`Env`].
pub struct ScopedFile<'e, F: FileHandle + ?Sized> {
    env: &'e Env,
    handle: Option<Box<F>>,
}

impl<'e, F: FileHandle + ?Sized> ScopedFile<'e, F> {
    pub fn new(env: &'e Env, handle: Box<F>) -> Self {
        ScopedFile {
            env,
            handle: Some(handle),
        }
    }

    /// Closes the handle, disarming the guard.
    pub fn close(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.close(),
            None => Ok(()),
        }
    }
}

impl<'e, F: FileHandle + ?Sized> Drop for ScopedFile<'e, F> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.close() {
                self.env.on_unhandled_error(err);
            }
        }
    }
}

impl<'e, F: FileHandle + io::Read + ?Sized> io::Read for ScopedFile<'e, F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.handle.as_mut() {
            Some(handle) => handle.read(buf),
            None => Err(closed_handle_error()),
        }
    }
}

impl<'e, F: FileHandle + io::Write + ?Sized> io::Write for ScopedFile<'e, F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.handle.as_mut() {
            Some(handle) => handle.write(buf),
            None => Err(closed_handle_error()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.handle.as_mut() {
            Some(handle) => handle.flush(),
            None => Err(closed_handle_error()),
        }
    }
}

fn closed_handle_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "file handle already closed")
}

/// Thread-safe generator of sequential scratch file paths:
/// `<dir>/<prefix>_000001`, `<dir>/<prefix>_000002`, ...
pub(crate) struct NameSeq {
    dir: PathBuf,
    prefix: &'static str,
    counter: AtomicU64,
}

impl NameSeq {
    pub fn new(dir: impl Into<PathBuf>, prefix: &'static str) -> Self {
        NameSeq {
            dir: dir.into(),
            prefix,
            counter: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> PathBuf {
        let id = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.dir.join(format!("{}_{:06}", self.prefix, id))
    }
}

/// `BufReader` honoring the configured capacity; 0 selects the default.
pub(crate) fn buf_reader<R: io::Read>(inner: R, buf_size: usize) -> io::BufReader<R> {
    if buf_size == 0 {
        io::BufReader::new(inner)
    } else {
        io::BufReader::with_capacity(buf_size, inner)
    }
}

/// `BufWriter` honoring the configured capacity; 0 selects the default.
pub(crate) fn buf_writer<W: io::Write>(inner: W, buf_size: usize) -> io::BufWriter<W> {
    if buf_size == 0 {
        io::BufWriter::new(inner)
    } else {
        io::BufWriter::with_capacity(buf_size, inner)
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;
    use std::sync::Arc;

    use super::{Fs, MemFs, NameSeq, ScopedFile};
    use crate::cancel::CancelToken;
    use crate::env::Env;

    #[test]
    fn test_name_seq() {
        let names = NameSeq::new("dir", "chunk");
        assert_eq!(names.next(), Path::new("dir").join("chunk_000001"));
        assert_eq!(names.next(), Path::new("dir").join("chunk_000002"));
        assert_eq!(names.next(), Path::new("dir").join("chunk_000003"));
    }

    #[test]
    fn test_scoped_file_close_disarms_guard() {
        let fs = Arc::new(MemFs::new());
        let env = Env::new(fs.clone(), CancelToken::new());

        let file = ScopedFile::new(&env, fs.create_write_file(Path::new("file")).unwrap());
        file.close().unwrap();

        assert!(!fs.has_open_entries());
        assert!(env.unhandled_errors().is_empty());
    }

    #[test]
    fn test_scoped_file_closes_on_drop() {
        let fs = Arc::new(MemFs::new());
        let env = Env::new(fs.clone(), CancelToken::new());

        {
            let _file = ScopedFile::new(&env, fs.create_write_file(Path::new("file")).unwrap());
        }

        assert!(!fs.has_open_entries());
        assert!(env.unhandled_errors().is_empty());
    }
}
