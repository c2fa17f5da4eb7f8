//! Merging phase: pairwise merges of sorted runs scheduled over a worker
//! pool along a balanced binary tree.

use std::io::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::cancel::POLL_QUANTUM;
use crate::env::{Env, FirstError};
use crate::error::{Error, Result};
use crate::fs::{buf_reader, buf_writer, NameSeq, ScopedFile};
use crate::lines::LineReader;
use crate::pool::WorkerPool;

/// Merging parameters.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Directory receiving the `merged_NNNNNN` run files.
    pub output_dir: PathBuf,
    /// Run file read buffer size.
    pub read_buf_size: usize,
    /// Output write buffer size.
    pub write_buf_size: usize,
    /// Worker pool width; 0 selects the CPU count.
    pub workers: usize,
}

/// Listener invoked after each internal merge: `(env, out, left, right)`.
pub type MergeProgress = Arc<dyn Fn(&Env, &Path, &Path, &Path) -> Result<()> + Send + Sync>;

/// Merges the sorted `files` into a single sorted run under
/// `opts.output_dir` and returns its path.
///
/// With N input runs the tree performs N-1 pairwise merges; a merge node is
/// scheduled once both of its subtrees are scheduled, and the rendezvous
/// pool submission keeps at most `workers` merges in flight.
pub fn merge_runs(
    env: &Env,
    files: &[PathBuf],
    opts: &MergeOptions,
    progress: Option<MergeProgress>,
) -> Result<PathBuf> {
    env.check_cancelled()?;

    if files.is_empty() {
        return Err(Error::NoFiles);
    }

    let env = env.scoped("merge");
    let names = NameSeq::new(&opts.output_dir, "merged");

    if files.len() == 1 {
        let target = names.next();
        env.fs().move_file(&files[0], &target)?;
        return Ok(target);
    }

    let token = env.cancel().child();
    let env = env.with_cancel(token);

    let shared = Arc::new(MergeShared {
        env: env.clone(),
        opts: opts.clone(),
        names,
        first_err: FirstError::new(),
        progress,
    });

    let mut pool = WorkerPool::new(opts.workers)?;
    let root = schedule(&shared, &pool, files);
    let merged = wait_result(&env, &root);

    if let Err(close_err) = pool.close() {
        shared.first_err.set(&env, close_err);
    }

    if let Some(err) = shared.first_err.take() {
        return Err(err);
    }

    match merged {
        Some(path) => Ok(path),
        None => Err(env.cancel().status().unwrap_or(Error::Cancelled)),
    }
}

/// Schedules the merge of `files` and immediately returns the one-shot slot
/// that will carry the resulting path.
///
/// Subtrees are scheduled before their parent, so by the time a worker picks
/// a node up both of its children have already been accepted by other
/// workers (or resolved in place). A node that fails returns without
/// publishing; dependents then observe a closed slot and abort in turn.
fn schedule(shared: &Arc<MergeShared>, pool: &WorkerPool, files: &[PathBuf]) -> Receiver<PathBuf> {
    let (result_tx, result_rx) = bounded::<PathBuf>(1);

    match files {
        [] => {
            shared.fail(Error::NoFiles);
        }
        [single] => {
            let _ = result_tx.send(single.clone());
        }
        _ => {
            let mid = files.len() / 2;
            let left = schedule(shared, pool, &files[..mid]);
            let right = schedule(shared, pool, &files[mid..]);

            let node = shared.clone();
            let submitted = pool.exec(move || node.merge_node(&left, &right, result_tx));
            if let Err(err) = submitted {
                // the dropped task also drops its result sender, which
                // cascades the abort to the dependents
                shared.fail(err);
            }
        }
    }

    result_rx
}

/// Token-aware wait on a one-shot result slot.
fn wait_result(env: &Env, result: &Receiver<PathBuf>) -> Option<PathBuf> {
    loop {
        if env.cancel().is_cancelled() {
            return None;
        }

        match result.recv_timeout(POLL_QUANTUM) {
            Ok(path) => return Some(path),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}

struct MergeShared {
    env: Env,
    opts: MergeOptions,
    names: NameSeq,
    first_err: FirstError,
    progress: Option<MergeProgress>,
}

impl MergeShared {
    fn merge_node(&self, left: &Receiver<PathBuf>, right: &Receiver<PathBuf>, out: Sender<PathBuf>) {
        let left = match wait_result(&self.env, left) {
            Some(path) => path,
            None => return,
        };
        let right = match wait_result(&self.env, right) {
            Some(path) => path,
            None => return,
        };

        let target = self.names.next();

        let result = merge_files(&self.env, &self.opts, &left, &right, &target).and_then(|()| {
            match &self.progress {
                Some(listener) => listener(&self.env, &target, &left, &right),
                None => Ok(()),
            }
        });

        match result {
            Ok(()) => {
                let _ = out.send(target);
            }
            Err(err) => self.fail(err),
        }
    }

    fn fail(&self, err: Error) {
        if self.first_err.set(&self.env, err) {
            self.env.cancel().cancel();
        }
    }
}

/// Merges two sorted run files into `target` and removes the inputs.
///
/// On a clean run the output is flushed and closed before the inputs are
/// closed and removed, left first. On failure the partial output is closed
/// and removed, secondary cleanup errors go to the unhandled-error sink and
/// the primary error propagates.
pub fn merge_files(
    env: &Env,
    opts: &MergeOptions,
    left_path: &Path,
    right_path: &Path,
    target_path: &Path,
) -> Result<()> {
    env.check_cancelled()?;

    if left_path == right_path {
        return Err(Error::Invalid(format!(
            "merge inputs refer to the same file: '{}'",
            left_path.display(),
        )));
    }

    let fs = env.fs();

    let (left_handle, _) = fs.open_read_file(left_path)?;
    let mut left = ScopedFile::new(env, left_handle);

    let (right_handle, _) = fs.open_read_file(right_path)?;
    let mut right = ScopedFile::new(env, right_handle);

    let mut target = ScopedFile::new(env, fs.create_write_file(target_path)?);

    let merged = {
        let mut writer = buf_writer(&mut target, opts.write_buf_size);
        merge_streams(
            env,
            buf_reader(&mut left, opts.read_buf_size),
            buf_reader(&mut right, opts.read_buf_size),
            &mut writer,
        )
    };

    match merged {
        Ok(()) => {
            if let Err(close_err) = target.close() {
                if let Err(remove_err) = fs.remove(target_path) {
                    env.on_unhandled_error(remove_err);
                }
                return Err(close_err);
            }

            left.close()?;
            fs.remove(left_path)?;
            right.close()?;
            fs.remove(right_path)?;

            Ok(())
        }
        Err(err) => {
            if let Err(close_err) = target.close() {
                env.on_unhandled_error(close_err);
            }
            if let Err(remove_err) = fs.remove(target_path) {
                env.on_unhandled_error(remove_err);
            }

            Err(err)
        }
    }
}

/// Streaming two-way merge of sorted line sequences. Ties emit the left
/// line first. The output is flushed on clean completion only.
pub fn merge_streams<L, R, W>(env: &Env, left: L, right: R, out: &mut W) -> Result<()>
where
    L: BufRead,
    R: BufRead,
    W: Write,
{
    env.check_cancelled()?;

    let mut left = LineReader::new(env.cancel().clone(), left);
    let mut right = LineReader::new(env.cancel().clone(), right);

    let mut lhs = left.next().transpose()?;
    let mut rhs = right.next().transpose()?;

    loop {
        match (lhs.take(), rhs.take()) {
            (Some(l), Some(r)) => {
                if l <= r {
                    write_line(out, &l)?;
                    lhs = left.next().transpose()?;
                    rhs = Some(r);
                } else {
                    write_line(out, &r)?;
                    lhs = Some(l);
                    rhs = right.next().transpose()?;
                }
            }
            (Some(l), None) => {
                write_line(out, &l)?;
                lhs = left.next().transpose()?;
            }
            (None, Some(r)) => {
                write_line(out, &r)?;
                rhs = right.next().transpose()?;
            }
            (None, None) => break,
        }
    }

    out.flush()?;

    Ok(())
}

fn write_line<W: Write>(out: &mut W, line: &[u8]) -> Result<()> {
    out.write_all(line)?;
    out.write_all(b"\n")?;
    Ok(())
}
