//! In-memory file system.
//!
//! Backs the test suite: a flat map of normalized paths to entries, each
//! entry tracking whether a handle is currently open. Tests assert
//! [`MemFs::has_open_entries`] is false after a run, which catches
//! handle-leak regressions in the core.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::fs::{FileHandle, Fs, ReadFile, WriteFile};

/// In-memory [`Fs`] implementation.
pub struct MemFs {
    storage: Mutex<HashMap<String, Arc<MemEntry>>>,
}

impl MemFs {
    pub fn new() -> Self {
        MemFs {
            storage: Mutex::new(HashMap::new()),
        }
    }

    /// True while any entry has an open handle.
    pub fn has_open_entries(&self) -> bool {
        self.storage.lock().values().any(|entry| entry.is_open())
    }

    /// Creates a directory chain, reporting whether anything was created.
    pub fn ensure_dir_exists(&self, path: &Path) -> Result<bool> {
        let key = normalize(path)?;
        let mut storage = self.storage.lock();
        ensure_dirs_locked(&mut storage, &key)
    }
}

impl Default for MemFs {
    fn default() -> Self {
        MemFs::new()
    }
}

impl Fs for MemFs {
    fn file_size(&self, path: &Path) -> Result<u64> {
        let (file, size) = self.open_read_file(path)?;
        file.close()?;
        Ok(size)
    }

    fn create_write_file(&self, path: &Path) -> Result<Box<dyn WriteFile>> {
        let key = normalize(path)?;
        let mut storage = self.storage.lock();

        check_parent_dir(&storage, &key)?;

        if storage.contains_key(&key) {
            return Err(Error::AlreadyExists(path.to_path_buf()));
        }

        let entry = Arc::new(MemEntry::open_file());
        storage.insert(key, entry.clone());

        Ok(Box::new(MemFile { entry }))
    }

    fn open_read_file(&self, path: &Path) -> Result<(Box<dyn ReadFile>, u64)> {
        let key = normalize(path)?;
        let entry = {
            let storage = self.storage.lock();

            check_parent_dir(&storage, &key)?;

            match storage.get(&key) {
                Some(entry) => entry.clone(),
                None => return Err(Error::NotExist(path.to_path_buf())),
            }
        };

        let size = entry.open_for_read(path)?;

        Ok((Box::new(MemFile { entry }), size))
    }

    fn move_file(&self, src: &Path, dst: &Path) -> Result<()> {
        let src_key = normalize(src)?;
        let dst_key = normalize(dst)?;
        let mut storage = self.storage.lock();

        let entry = match storage.get(&src_key) {
            Some(entry) => entry.clone(),
            None => return Err(Error::NotExist(src.to_path_buf())),
        };
        if !entry.is_file() {
            return Err(Error::Invalid(format!("not a file: '{}'", src.display())));
        }
        if entry.is_open() {
            return Err(Error::Permission(src.to_path_buf()));
        }

        if let Some(existing) = storage.get(&dst_key) {
            if !existing.is_file() {
                return Err(Error::Invalid(format!("not a file: '{}'", dst.display())));
            }
            return Err(Error::AlreadyExists(dst.to_path_buf()));
        }

        if let Some(dir) = parent_of(&dst_key) {
            let dir = dir.to_string();
            ensure_dirs_locked(&mut storage, &dir)?;
        }

        storage.remove(&src_key);
        storage.insert(dst_key, entry);

        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let key = normalize(path)?;
        let mut storage = self.storage.lock();

        if !storage.contains_key(&key) {
            return Err(Error::NotExist(path.to_path_buf()));
        }

        remove_entry_locked(&mut storage, &key, path)
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        let key = normalize(path)?;
        let mut storage = self.storage.lock();

        if !ensure_dirs_locked(&mut storage, &key)? {
            return Err(Error::AlreadyExists(path.to_path_buf()));
        }

        Ok(())
    }

    fn remove_all(&self, path: &Path) -> Result<()> {
        let key = normalize(path)?;
        let mut storage = self.storage.lock();

        if !storage.contains_key(&key) {
            return Ok(());
        }

        remove_entry_locked(&mut storage, &key, path)
    }
}

fn check_parent_dir(storage: &HashMap<String, Arc<MemEntry>>, key: &str) -> Result<()> {
    let dir = match parent_of(key) {
        Some(dir) => dir,
        None => return Ok(()),
    };

    match storage.get(dir) {
        None => Err(Error::NotExist(PathBuf::from(dir))),
        Some(entry) if entry.is_file() => {
            Err(Error::Invalid(format!("not a directory: '{}'", dir)))
        }
        Some(_) => Ok(()),
    }
}

fn ensure_dirs_locked(storage: &mut HashMap<String, Arc<MemEntry>>, key: &str) -> Result<bool> {
    let mut created = false;
    let mut prefix_end = 0;

    for segment in key.split('/') {
        prefix_end += segment.len() + usize::from(prefix_end != 0);
        let prefix = &key[..prefix_end];

        match storage.get(prefix) {
            Some(entry) if entry.is_file() => {
                return Err(Error::Invalid(format!("not a directory: '{}'", prefix)));
            }
            Some(_) => {}
            None => {
                created = true;
                storage.insert(prefix.to_string(), Arc::new(MemEntry::dir()));
            }
        }
    }

    Ok(created)
}

fn remove_entry_locked(
    storage: &mut HashMap<String, Arc<MemEntry>>,
    key: &str,
    path: &Path,
) -> Result<()> {
    let entry = match storage.get(key) {
        Some(entry) => entry.clone(),
        None => return Err(Error::NotExist(path.to_path_buf())),
    };

    if entry.is_open() {
        return Err(Error::Permission(path.to_path_buf()));
    }

    if entry.is_file() {
        storage.remove(key);
        return Ok(());
    }

    let prefix = format!("{}/", key);
    let descendants: Vec<String> = storage
        .keys()
        .filter(|other| other.starts_with(&prefix))
        .cloned()
        .collect();

    for descendant in &descendants {
        if storage[descendant].is_open() {
            return Err(Error::Permission(PathBuf::from(descendant)));
        }
    }

    for descendant in &descendants {
        storage.remove(descendant);
    }
    storage.remove(key);

    Ok(())
}

fn parent_of(key: &str) -> Option<&str> {
    key.rfind('/').map(|idx| &key[..idx])
}

fn normalize(path: &Path) -> Result<String> {
    let normalized = path.to_string_lossy().replace('\\', "/");

    let invalid = || Error::Invalid(format!("bad path: '{}'", path.display()));

    if normalized.is_empty() || normalized.ends_with('/') {
        return Err(invalid());
    }

    for segment in normalized.split('/') {
        if matches!(segment, "" | "." | ".." | ":") {
            return Err(invalid());
        }
    }

    Ok(normalized)
}

struct MemEntry {
    state: Mutex<EntryState>,
}

struct EntryState {
    is_file: bool,
    open: bool,
    read_pos: usize,
    data: Vec<u8>,
}

impl MemEntry {
    fn open_file() -> Self {
        MemEntry {
            state: Mutex::new(EntryState {
                is_file: true,
                open: true,
                read_pos: 0,
                data: Vec::new(),
            }),
        }
    }

    fn dir() -> Self {
        MemEntry {
            state: Mutex::new(EntryState {
                is_file: false,
                open: false,
                read_pos: 0,
                data: Vec::new(),
            }),
        }
    }

    fn is_file(&self) -> bool {
        self.state.lock().is_file
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn open_for_read(&self, path: &Path) -> Result<u64> {
        let mut state = self.state.lock();

        if !state.is_file {
            return Err(Error::Invalid(format!("not a file: '{}'", path.display())));
        }
        if state.open {
            return Err(Error::Permission(path.to_path_buf()));
        }

        state.open = true;
        state.read_pos = 0;

        Ok(state.data.len() as u64)
    }
}

struct MemFile {
    entry: Arc<MemEntry>,
}

impl io::Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.entry.state.lock();

        if !state.open {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "file handle already closed",
            ));
        }

        let remaining = &state.data[state.read_pos..];
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        state.read_pos += count;

        Ok(count)
    }
}

impl io::Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.entry.state.lock();

        if !state.open {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "file handle already closed",
            ));
        }

        state.data.extend_from_slice(buf);

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl FileHandle for MemFile {
    fn close(self: Box<Self>) -> Result<()> {
        let mut state = self.entry.state.lock();

        if !state.open {
            return Err(Error::Invalid("file handle already closed".to_string()));
        }

        state.open = false;

        Ok(())
    }
}
