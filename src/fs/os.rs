//! Operating system file system.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fs::{FileHandle, Fs, ReadFile, WriteFile};

/// `std::fs`-backed [`Fs`] implementation.
pub struct OsFs;

impl OsFs {
    pub fn new() -> Self {
        OsFs
    }
}

impl Default for OsFs {
    fn default() -> Self {
        OsFs::new()
    }
}

impl Fs for OsFs {
    fn file_size(&self, path: &Path) -> Result<u64> {
        let meta = fs::metadata(path).map_err(|err| map_io_error(path, err))?;
        if !meta.is_file() {
            return Err(Error::Invalid(format!("not a file: '{}'", path.display())));
        }

        Ok(meta.len())
    }

    fn create_write_file(&self, path: &Path) -> Result<Box<dyn WriteFile>> {
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|err| map_io_error(path, err))?;

        Ok(Box::new(OsFile { file }))
    }

    fn open_read_file(&self, path: &Path) -> Result<(Box<dyn ReadFile>, u64)> {
        let file = fs::File::open(path).map_err(|err| map_io_error(path, err))?;

        let meta = file.metadata().map_err(|err| map_io_error(path, err))?;
        if !meta.is_file() {
            return Err(Error::Invalid(format!("not a file: '{}'", path.display())));
        }

        Ok((Box::new(OsFile { file }), meta.len()))
    }

    fn move_file(&self, src: &Path, dst: &Path) -> Result<()> {
        if fs::symlink_metadata(dst).is_ok() {
            return Err(Error::AlreadyExists(dst.to_path_buf()));
        }

        if let Some(parent) = nonempty_parent(dst) {
            fs::create_dir_all(parent).map_err(|err| map_io_error(parent, err))?;
        }

        if fs::rename(src, dst).is_ok() {
            return Ok(());
        }

        // rename does not work across volumes
        fs::copy(src, dst).map_err(|err| map_io_error(src, err))?;
        fs::remove_file(src).map_err(|err| map_io_error(src, err))?;

        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|err| map_io_error(path, err))
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        if path.exists() {
            return Err(Error::AlreadyExists(path.to_path_buf()));
        }

        fs::create_dir_all(path).map_err(|err| map_io_error(path, err))
    }

    fn remove_all(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(map_io_error(path, err)),
        }
    }
}

struct OsFile {
    file: fs::File,
}

impl io::Read for OsFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut self.file, buf)
    }
}

impl io::Write for OsFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut self.file, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.file)
    }
}

impl FileHandle for OsFile {
    fn close(self: Box<Self>) -> Result<()> {
        drop(self.file);
        Ok(())
    }
}

fn nonempty_parent(path: &Path) -> Option<&Path> {
    path.parent().filter(|parent| !parent.as_os_str().is_empty())
}

fn map_io_error(path: &Path, err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => Error::NotExist(path.to_path_buf()),
        io::ErrorKind::AlreadyExists => Error::AlreadyExists(path.to_path_buf()),
        io::ErrorKind::PermissionDenied => Error::Permission(path.to_path_buf()),
        _ => Error::Io(err),
    }
}

#[cfg(test)]
mod test {
    use std::io::prelude::*;

    use super::OsFs;
    use crate::error::Error;
    use crate::fs::Fs;

    #[test]
    fn test_create_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFs::new();
        let path = dir.path().join("file");

        let mut file = fs.create_write_file(&path).unwrap();
        file.write_all(b"abc\n").unwrap();
        file.flush().unwrap();
        file.close().unwrap();

        assert!(matches!(
            fs.create_write_file(&path),
            Err(Error::AlreadyExists(_))
        ));

        assert_eq!(fs.file_size(&path).unwrap(), 4);

        let (mut file, size) = fs.open_read_file(&path).unwrap();
        assert_eq!(size, 4);

        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        file.close().unwrap();
        assert_eq!(data, b"abc\n");
    }

    #[test]
    fn test_missing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFs::new();
        let path = dir.path().join("missing");

        assert!(matches!(fs.file_size(&path), Err(Error::NotExist(_))));
        assert!(matches!(fs.open_read_file(&path), Err(Error::NotExist(_))));
        assert!(matches!(fs.remove(&path), Err(Error::NotExist(_))));
        assert!(matches!(
            fs.create_write_file(&dir.path().join("no_dir").join("file")),
            Err(Error::NotExist(_))
        ));
    }

    #[test]
    fn test_move_file() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFs::new();
        let src = dir.path().join("src");
        let dst = dir.path().join("sub").join("dst");

        fs.create_write_file(&src).unwrap().close().unwrap();
        fs.move_file(&src, &dst).unwrap();

        assert!(matches!(fs.file_size(&src), Err(Error::NotExist(_))));
        assert_eq!(fs.file_size(&dst).unwrap(), 0);

        fs.create_write_file(&src).unwrap().close().unwrap();
        assert!(matches!(
            fs.move_file(&src, &dst),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_create_and_remove_dir() {
        let dir = tempfile::tempdir().unwrap();
        let fs = OsFs::new();
        let path = dir.path().join("a").join("b");

        fs.create_dir(&path).unwrap();
        assert!(matches!(fs.create_dir(&path), Err(Error::AlreadyExists(_))));

        fs.create_write_file(&path.join("file")).unwrap().close().unwrap();
        fs.remove_all(&path).unwrap();
        fs.remove_all(&path).unwrap();

        assert!(matches!(
            fs.open_read_file(&path.join("file")),
            Err(Error::NotExist(_))
        ));
    }
}
