//! `extsort` is a two-phase external merge sort for huge line-oriented text files.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data.
//! It is required when the data being sorted does not fit into the main memory (RAM) of a
//! computer and instead must reside in slower external memory, usually a hard disk drive.
//! Sorting happens in two passes: the *splitter* streams the input, cuts it into bounded
//! in-memory chunks, sorts each chunk and writes it out as a sorted run file, concurrently
//! across a worker pool; the *merger* then pairwise-merges the runs into a single sorted file
//! along a balanced binary tree whose inner nodes run in parallel on the same kind of pool.
//! For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Bounded memory:** chunk sizes are capped by `preferred_chunk_size`, so memory use does
//!   not grow with the input.
//! * **Multithreading:** chunk sorting and run merging are executed by a fixed-size worker
//!   pool with rendezvous submission, which naturally throttles the merge tree.
//! * **Cooperative cancellation:** a single token (SIGINT, timeouts) aborts the whole
//!   pipeline; scratch files are cleaned up on success and on failure alike.
//! * **Testable file system:** all I/O goes through the [`fs::Fs`] trait, with an in-memory
//!   implementation that tracks open handles.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use extsort::{CancelToken, Config, Env, OsFs};
//!
//! fn main() {
//!     env_logger::Builder::new().filter_level(log::LevelFilter::Info).init();
//!
//!     let env = Env::new(Arc::new(OsFs::new()), CancelToken::new());
//!     let cfg = Config::new("input.txt", "output.txt").with_temp_dir("scratch");
//!
//!     match extsort::sort_file(&env, &cfg) {
//!         Ok(info) => log::info!("sorted: {}", info),
//!         Err(err) => log::error!("sorting failed: {}", err),
//!     }
//! }
//! ```

pub mod cancel;
pub mod chunk;
pub mod config;
pub mod env;
pub mod error;
pub mod fs;
pub mod lines;
pub mod merge;
pub mod pool;
pub mod progress;
pub mod sort;
pub mod split;

#[cfg(test)]
mod testing;

pub use cancel::CancelToken;
pub use chunk::Chunk;
pub use config::Config;
pub use env::Env;
pub use error::{Error, Result};
pub use fs::{Fs, MemFs, OsFs};
pub use lines::{LineFeed, LineReader};
pub use merge::{merge_files, merge_runs, merge_streams, MergeOptions, MergeProgress};
pub use pool::WorkerPool;
pub use progress::Progress;
pub use sort::{sort_file, ExecInfo};
pub use split::{read_chunks, split_file, split_stream, SplitOptions, SplitProgress};
