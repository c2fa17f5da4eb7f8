//! Shared tooling for the unit tests: an in-memory environment plus file
//! helpers mirroring the assertions the suite keeps repeating.

use std::io::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::env::Env;
use crate::error::Error;
use crate::fs::{Fs, MemFs};
use crate::merge::MergeOptions;
use crate::split::SplitOptions;

pub(crate) struct TestTools {
    pub fs: Arc<MemFs>,
    pub env: Env,
}

impl TestTools {
    /// Environment over a fresh in-memory file system with the scratch
    /// directories used by the split/merge tests.
    pub fn new() -> Self {
        let fs = Arc::new(MemFs::new());
        let env = Env::new(fs.clone(), CancelToken::new());

        assert!(fs.ensure_dir_exists(Path::new("splitRes")).unwrap());
        assert!(fs.ensure_dir_exists(Path::new("mergeRes")).unwrap());

        TestTools { fs, env }
    }

    pub fn split_opts(&self) -> SplitOptions {
        SplitOptions {
            output_dir: PathBuf::from("splitRes"),
            chunk_capacity: 0,
            preferred_chunk_size: 0,
            read_buf_size: 0,
            write_buf_size: 0,
            workers: 2,
        }
    }

    pub fn merge_opts(&self) -> MergeOptions {
        MergeOptions {
            output_dir: PathBuf::from("mergeRes"),
            read_buf_size: 0,
            write_buf_size: 0,
            workers: 2,
        }
    }

    /// Environment whose cancellation token has already fired.
    pub fn cancelled_env(&self) -> Env {
        let token = CancelToken::new();
        token.cancel();
        self.env.with_cancel(token)
    }

    pub fn create_file(&self, path: impl AsRef<Path>, data: &str) {
        let mut file = self.fs.create_write_file(path.as_ref()).unwrap();
        file.write_all(data.as_bytes()).unwrap();
        file.close().unwrap();
    }

    pub fn read_file(&self, path: impl AsRef<Path>) -> String {
        let (mut file, _) = self.fs.open_read_file(path.as_ref()).unwrap();
        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        file.close().unwrap();
        String::from_utf8(data).unwrap()
    }

    pub fn check_file_size(&self, path: impl AsRef<Path>, expected: u64) {
        assert_eq!(self.fs.file_size(path.as_ref()).unwrap(), expected);
    }

    pub fn check_absent(&self, path: impl AsRef<Path>) {
        assert!(matches!(
            self.fs.file_size(path.as_ref()),
            Err(Error::NotExist(_))
        ));
    }

    /// No unhandled errors were collected and no handle stayed open.
    pub fn check_clean(&self) {
        assert_eq!(self.env.unhandled_errors(), Vec::<String>::new());
        assert!(!self.fs.has_open_entries());
    }

    /// `count` numbered lines in descending order, `\n`-terminated.
    pub fn lines_for_splitting(&self, count: usize) -> String {
        let mut lines = String::new();
        for idx in (0..count).rev() {
            lines.push_str(&idx.to_string());
            lines.push('\n');
        }
        lines
    }
}
