//! Sorting configuration.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DEFAULT_CHUNK_CAPACITY: usize = 16 * 1024;
pub const DEFAULT_PREFERRED_CHUNK_SIZE_KB: usize = 128;
pub const DEFAULT_WORKER_READ_BUF_SIZE_KB: usize = 32;
pub const DEFAULT_WORKER_WRITE_BUF_SIZE_KB: usize = 32;
pub const DEFAULT_TEMP_DIR: &str = "temp";

/// Number of workers used when the caller does not specify one.
pub fn default_workers_count() -> usize {
    num_cpus::get()
}

/// Validated configuration of a sorting run.
#[derive(Debug, Clone)]
pub struct Config {
    /// File to be sorted.
    pub input_path: PathBuf,
    /// Sorted result destination.
    pub output_path: PathBuf,
    /// Scratch directory for the run files. Created by the run, must not
    /// pre-exist, removed at shutdown.
    pub temp_dir: PathBuf,
    /// Split/merge worker threads.
    pub workers_count: usize,
    /// Initial line-capacity reservation of a chunk.
    pub chunk_capacity: usize,
    /// A chunk is handed off once its serialized size reaches this many
    /// bytes. Zero flushes after every line.
    pub preferred_chunk_size: usize,
    /// Read buffer of each file consumer.
    pub worker_read_buf_size: usize,
    /// Write buffer of each file producer.
    pub worker_write_buf_size: usize,
}

impl Config {
    /// Creates a configuration with default tuning parameters.
    pub fn new(input_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Config {
            input_path: input_path.into(),
            output_path: output_path.into(),
            temp_dir: PathBuf::from(DEFAULT_TEMP_DIR),
            workers_count: default_workers_count(),
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            preferred_chunk_size: DEFAULT_PREFERRED_CHUNK_SIZE_KB * 1024,
            worker_read_buf_size: DEFAULT_WORKER_READ_BUF_SIZE_KB * 1024,
            worker_write_buf_size: DEFAULT_WORKER_WRITE_BUF_SIZE_KB * 1024,
        }
    }

    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Config {
        self.temp_dir = temp_dir.into();
        return self;
    }

    pub fn with_workers_count(mut self, workers_count: usize) -> Config {
        self.workers_count = workers_count;
        return self;
    }

    pub fn with_chunk_capacity(mut self, chunk_capacity: usize) -> Config {
        self.chunk_capacity = chunk_capacity;
        return self;
    }

    pub fn with_preferred_chunk_size(mut self, preferred_chunk_size: usize) -> Config {
        self.preferred_chunk_size = preferred_chunk_size;
        return self;
    }

    pub fn with_worker_read_buf_size(mut self, worker_read_buf_size: usize) -> Config {
        self.worker_read_buf_size = worker_read_buf_size;
        return self;
    }

    pub fn with_worker_write_buf_size(mut self, worker_write_buf_size: usize) -> Config {
        self.worker_write_buf_size = worker_write_buf_size;
        return self;
    }

    /// Checks the configuration invariants.
    ///
    /// `preferred_chunk_size` and the buffer sizes are unsigned and need no
    /// lower-bound check.
    pub fn validate(&self) -> Result<()> {
        if self.input_path.as_os_str().is_empty() {
            return Err(bad_config("input_path is not specified"));
        }

        if self.output_path.as_os_str().is_empty() {
            return Err(bad_config("output_path is not specified"));
        }

        if self.input_path == self.output_path {
            return Err(bad_config("input_path and output_path are the same"));
        }

        if self.temp_dir.as_os_str().is_empty() {
            return Err(bad_config("temp_dir is not specified"));
        }

        if self.output_path.parent() == Some(self.temp_dir.as_path()) {
            return Err(bad_config("output_path is inside the temp_dir"));
        }

        if self.workers_count == 0 {
            return Err(bad_config("workers_count is zero"));
        }

        if self.chunk_capacity == 0 {
            return Err(bad_config("chunk_capacity is zero"));
        }

        Ok(())
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Config {{")?;
        writeln!(f, "  input_path            = {}", self.input_path.display())?;
        writeln!(f, "  output_path           = {}", self.output_path.display())?;
        writeln!(f, "  temp_dir              = {}", self.temp_dir.display())?;
        writeln!(f, "  workers_count         = {}", self.workers_count)?;
        writeln!(f, "  chunk_capacity        = {}", self.chunk_capacity)?;
        writeln!(f, "  preferred_chunk_size  = {}", self.preferred_chunk_size)?;
        writeln!(f, "  worker_read_buf_size  = {}", self.worker_read_buf_size)?;
        writeln!(f, "  worker_write_buf_size = {}", self.worker_write_buf_size)?;
        write!(f, "}}")
    }
}

fn bad_config(reason: &str) -> Error {
    Error::BadConfig(reason.to_string())
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::Config;
    use crate::error::Error;

    #[fixture]
    fn config() -> Config {
        Config::new("input", "output")
    }

    #[rstest]
    fn test_default_config_is_valid(config: Config) {
        config.validate().unwrap();
    }

    #[rstest]
    #[case(Config::new("", "output"))]
    #[case(Config::new("input", ""))]
    #[case(Config::new("same", "same"))]
    #[case(Config::new("input", "output").with_temp_dir(""))]
    #[case(Config::new("input", "temp/output").with_temp_dir("temp"))]
    #[case(Config::new("input", "output").with_workers_count(0))]
    #[case(Config::new("input", "output").with_chunk_capacity(0))]
    fn test_invalid_config(#[case] config: Config) {
        assert!(matches!(config.validate(), Err(Error::BadConfig(_))));
    }

    #[rstest]
    fn test_zero_sizes_are_valid(config: Config) {
        config
            .with_preferred_chunk_size(0)
            .with_worker_read_buf_size(0)
            .with_worker_write_buf_size(0)
            .validate()
            .unwrap();
    }
}
