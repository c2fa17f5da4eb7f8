//! Splitting phase: stream the input into bounded chunks and write each
//! chunk out as a sorted run file, concurrently across a worker pool.

use std::io::prelude::*;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::chunk::Chunk;
use crate::env::{Env, FirstError};
use crate::error::{Error, Result};
use crate::fs::{buf_reader, buf_writer, NameSeq, ScopedFile};
use crate::lines::LineReader;
use crate::pool::WorkerPool;

/// Splitting parameters.
#[derive(Debug, Clone)]
pub struct SplitOptions {
    /// Directory receiving the `chunk_NNNNNN` run files.
    pub output_dir: PathBuf,
    /// Initial line-capacity reservation of each chunk.
    pub chunk_capacity: usize,
    /// Chunk hand-off threshold in serialized bytes; 0 flushes every line.
    pub preferred_chunk_size: usize,
    /// Input read buffer size.
    pub read_buf_size: usize,
    /// Run file write buffer size.
    pub write_buf_size: usize,
    /// Worker pool width; 0 selects the CPU count.
    pub workers: usize,
}

/// Listener invoked by a worker after a run file has been written.
pub type SplitProgress = Arc<dyn Fn(&Env, &Chunk, &Path) -> Result<()> + Send + Sync>;

/// Splits the file at `input` into sorted run files.
/// Returns the run paths in task-completion order.
pub fn split_file(
    env: &Env,
    input: &Path,
    opts: &SplitOptions,
    progress: Option<SplitProgress>,
) -> Result<Vec<PathBuf>> {
    env.check_cancelled()?;

    let env = env.scoped("split");

    let (handle, _) = env.fs().open_read_file(input)?;
    let mut input_file = ScopedFile::new(&env, handle);

    let result = {
        let reader = buf_reader(&mut input_file, opts.read_buf_size);
        split_stream(&env, reader, opts, progress)
    };

    match input_file.close() {
        Ok(()) => result,
        Err(close_err) => match result {
            Ok(_) => Err(close_err),
            Err(err) => {
                env.on_unhandled_error(close_err);
                Err(err)
            }
        },
    }
}

/// Splits an already opened byte stream into sorted run files.
pub fn split_stream<R: BufRead>(
    env: &Env,
    reader: R,
    opts: &SplitOptions,
    progress: Option<SplitProgress>,
) -> Result<Vec<PathBuf>> {
    env.check_cancelled()?;

    let token = env.cancel().child();
    let env = env.with_cancel(token);

    let shared = Arc::new(SplitShared {
        env: env.clone(),
        names: NameSeq::new(&opts.output_dir, "chunk"),
        write_buf_size: opts.write_buf_size,
        paths: Mutex::new(Vec::new()),
        first_err: FirstError::new(),
        progress,
    });

    let mut pool = WorkerPool::new(opts.workers)?;

    let read_result = read_chunks(
        &env,
        reader,
        opts.preferred_chunk_size,
        opts.chunk_capacity,
        |chunk| {
            let task_state = shared.clone();
            pool.exec(move || task_state.sort_and_save(chunk))
        },
    );

    // waits for every accepted sort+write task; worker errors reported while
    // draining keep their first-come priority over the reader error
    if let Err(close_err) = pool.close() {
        shared.first_err.set(&env, close_err);
    }
    if let Err(read_err) = read_result {
        shared.first_err.set(&env, read_err);
    }

    match shared.first_err.take() {
        Some(err) => Err(err),
        None => Ok(mem::take(&mut *shared.paths.lock())),
    }
}

/// Streams `reader` into chunks of roughly `preferred_size` serialized bytes
/// and feeds them to `consume`.
///
/// At least one chunk is always produced: an empty input yields a single
/// empty chunk, which keeps the downstream merge base case well defined.
pub fn read_chunks<R: BufRead>(
    env: &Env,
    reader: R,
    preferred_size: usize,
    capacity: usize,
    mut consume: impl FnMut(Chunk) -> Result<()>,
) -> Result<()> {
    env.check_cancelled()?;

    let mut consumed = 0usize;
    let mut chunk = Chunk::with_capacity(capacity);

    let mut lines = LineReader::new(env.cancel().clone(), reader);
    for line in &mut lines {
        chunk.add(line?);
        if chunk.serialized_size() >= preferred_size {
            consume(mem::replace(&mut chunk, Chunk::with_capacity(capacity)))?;
            consumed += 1;
        }
    }

    if !chunk.is_empty() || consumed == 0 {
        consume(chunk)?;
    }

    Ok(())
}

struct SplitShared {
    env: Env,
    names: NameSeq,
    write_buf_size: usize,
    paths: Mutex<Vec<PathBuf>>,
    first_err: FirstError,
    progress: Option<SplitProgress>,
}

impl SplitShared {
    fn sort_and_save(&self, mut chunk: Chunk) {
        if let Err(err) = self.env.check_cancelled() {
            self.fail(err);
            return;
        }

        chunk.sort();
        let path = self.names.next();

        let result = self.save(&chunk, &path).and_then(|()| match &self.progress {
            Some(listener) => listener(&self.env, &chunk, &path),
            None => Ok(()),
        });

        match result {
            Ok(()) => self.paths.lock().push(path),
            Err(err) => self.fail(err),
        }
    }

    fn save(&self, chunk: &Chunk, path: &Path) -> Result<()> {
        let mut file = ScopedFile::new(&self.env, self.env.fs().create_write_file(path)?);

        let written = {
            let mut writer = buf_writer(&mut file, self.write_buf_size);
            let written = chunk.write(&mut writer)?;
            writer.flush()?;
            written
        };

        file.close()?;

        let expected = chunk.serialized_size() as u64;
        if written != expected {
            return Err(Error::UnexpectedWrittenBytes { expected, written });
        }

        Ok(())
    }

    fn fail(&self, err: Error) {
        if self.first_err.set(&self.env, err) {
            self.env.cancel().cancel();
        }
    }
}

#[cfg(test)]
mod test {
    use std::io;
    use std::path::Path;
    use std::sync::Arc;

    use rstest::*;

    use super::{read_chunks, split_file};
    use crate::error::Error;
    use crate::testing::TestTools;

    fn collect_chunk_sizes(data: &str, preferred_size: usize) -> Vec<usize> {
        let tools = TestTools::new();
        let mut lens = Vec::new();
        read_chunks(
            &tools.env,
            io::Cursor::new(data.as_bytes().to_vec()),
            preferred_size,
            0,
            |chunk| {
                lens.push(chunk.len());
                Ok(())
            },
        )
        .unwrap();
        lens
    }

    #[rstest]
    #[case("", vec![0])]
    #[case("\n", vec![1])]
    #[case("1", vec![1])]
    #[case("1\n2", vec![1, 1])]
    fn test_read_chunks(#[case] data: &str, #[case] expected_chunk_lens: Vec<usize>) {
        assert_eq!(collect_chunk_sizes(data, 0), expected_chunk_lens);
    }

    #[test]
    fn test_read_chunks_accumulates_up_to_preferred_size() {
        // "9\n...\n0\n", two bytes per line
        let tools = TestTools::new();
        let lines = tools.lines_for_splitting(10);
        assert_eq!(collect_chunk_sizes(&lines, 10), vec![5, 5]);
        assert_eq!(collect_chunk_sizes(&lines, 20), vec![10]);
    }

    #[test]
    fn test_read_chunks_cancelled() {
        let tools = TestTools::new();
        let env = tools.cancelled_env();

        let result = read_chunks(&env, io::Cursor::new(b"abc".to_vec()), 0, 0, |_chunk| {
            panic!("unexpected chunk")
        });
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_read_chunks_consume_error_stops_enumeration() {
        let tools = TestTools::new();

        let mut chunks = 0;
        let result = read_chunks(
            &tools.env,
            io::Cursor::new(b"1\n2\n3\n".to_vec()),
            0,
            0,
            |_chunk| {
                chunks += 1;
                Err(Error::NoFiles)
            },
        );

        assert!(matches!(result, Err(Error::NoFiles)));
        assert_eq!(chunks, 1);
    }

    #[test]
    fn test_split_missing_input() {
        let tools = TestTools::new();

        let result = split_file(&tools.env, Path::new("input"), &tools.split_opts(), None);
        assert!(matches!(result, Err(Error::NotExist(_))));
        tools.check_clean();
    }

    #[test]
    fn test_split_empty_input_produces_one_empty_run() {
        let tools = TestTools::new();
        tools.create_file("input", "");

        let files = split_file(&tools.env, Path::new("input"), &tools.split_opts(), None).unwrap();
        assert_eq!(files.len(), 1);
        tools.check_file_size(&files[0], 0);
        tools.check_clean();
    }

    #[rstest]
    #[case(2, 10, 2)]
    #[case(10, 2, 10)]
    #[case(20, 1, 20)]
    fn test_split_run_files_are_sorted(
        #[case] preferred_chunk_size: usize,
        #[case] expected_runs: usize,
        #[case] expected_run_size: u64,
    ) {
        let tools = TestTools::new();
        tools.create_file("input", &tools.lines_for_splitting(10));

        let mut opts = tools.split_opts();
        opts.preferred_chunk_size = preferred_chunk_size;

        let files = split_file(&tools.env, Path::new("input"), &opts, None).unwrap();
        assert_eq!(files.len(), expected_runs);

        for file in &files {
            tools.check_file_size(file, expected_run_size);
            assert!(file.starts_with("splitRes"));

            let data = tools.read_file(file);
            let lines: Vec<&str> = data.trim_end_matches('\n').split('\n').collect();
            assert!(lines.windows(2).all(|pair| pair[0] <= pair[1]));
        }

        tools.check_clean();
    }

    #[test]
    fn test_split_cancelled_before_start() {
        let tools = TestTools::new();
        tools.create_file("input", &tools.lines_for_splitting(10));

        let env = tools.cancelled_env();
        let result = split_file(&env, Path::new("input"), &tools.split_opts(), None);

        assert!(matches!(result, Err(Error::Cancelled)));
        tools.check_clean();
    }

    #[test]
    fn test_split_cancelled_mid_run() {
        let tools = TestTools::new();
        tools.create_file("input", &tools.lines_for_splitting(1000));

        let progress: super::SplitProgress = Arc::new(|env, _chunk, _path| {
            env.cancel().cancel();
            Ok(())
        });

        let result = split_file(
            &tools.env,
            Path::new("input"),
            &tools.split_opts(),
            Some(progress),
        );

        assert!(matches!(result, Err(Error::Cancelled)));
        tools.check_clean();
    }

    #[test]
    fn test_split_missing_output_dir_fails_without_leaks() {
        let tools = TestTools::new();
        tools.create_file("input", &tools.lines_for_splitting(10));

        let mut opts = tools.split_opts();
        opts.output_dir = "absent".into();
        // a single worker keeps the failure deterministic: the second task
        // observes the cancelled token instead of racing for the latch
        opts.workers = 1;

        let result = split_file(&tools.env, Path::new("input"), &opts, None);
        assert!(matches!(result, Err(Error::NotExist(_))));
        tools.check_clean();
    }
}
