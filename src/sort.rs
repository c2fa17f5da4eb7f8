//! External sorter orchestration.
//!
//! Validates the configuration, owns the scratch directory lifecycle, runs
//! the splitting and merging phases and renames the final run to the output
//! path. Scratch is removed on success and on failure alike.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytesize::ByteSize;
use parking_lot::Mutex;

use crate::chunk::Chunk;
use crate::config::Config;
use crate::env::Env;
use crate::error::Result;
use crate::merge::{merge_runs, MergeOptions, MergeProgress};
use crate::progress::Progress;
use crate::split::{split_file, SplitOptions, SplitProgress};

/// Summary of a completed sorting run.
#[derive(Debug, Clone)]
pub struct ExecInfo {
    pub temp_dir: String,
    pub input_file: String,
    pub output_file: String,
    pub input_file_size: u64,
    pub output_file_size: u64,
    pub workers_count: usize,
    pub worker_read_buf_size: usize,
    pub worker_write_buf_size: usize,
    pub preferred_chunk_size: usize,
    pub chunk_capacity: usize,
    pub splitting_duration: Duration,
    pub merging_duration: Duration,
    pub exec_duration: Duration,
}

impl fmt::Display for ExecInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ExecInfo {{")?;
        writeln!(f, "  temp_dir              = {}", self.temp_dir)?;
        writeln!(f, "  input_file            = {}", self.input_file)?;
        writeln!(f, "  output_file           = {}", self.output_file)?;
        writeln!(
            f,
            "  input_file_size       = {} ({})",
            self.input_file_size,
            ByteSize::b(self.input_file_size),
        )?;
        writeln!(
            f,
            "  output_file_size      = {} ({})",
            self.output_file_size,
            ByteSize::b(self.output_file_size),
        )?;
        writeln!(f, "  workers_count         = {}", self.workers_count)?;
        writeln!(f, "  worker_read_buf_size  = {}", self.worker_read_buf_size)?;
        writeln!(f, "  worker_write_buf_size = {}", self.worker_write_buf_size)?;
        writeln!(f, "  preferred_chunk_size  = {}", self.preferred_chunk_size)?;
        writeln!(f, "  chunk_capacity        = {}", self.chunk_capacity)?;
        writeln!(f, "  splitting_duration    = {:?}", self.splitting_duration)?;
        writeln!(f, "  merging_duration      = {:?}", self.merging_duration)?;
        writeln!(f, "  exec_duration         = {:?}", self.exec_duration)?;
        write!(f, "}}")
    }
}

/// Sorts the configured input file into the configured output file.
///
/// The scratch directory must not pre-exist; it is created at entry and
/// removed recursively at shutdown whatever the outcome. The caller's
/// cancellation token (part of `env`) aborts the run cooperatively.
pub fn sort_file(env: &Env, cfg: &Config) -> Result<ExecInfo> {
    env.check_cancelled()?;
    cfg.validate()?;

    let started = Instant::now();
    let env = env.scoped("extsort").with_cancel(env.cancel().child());

    log::info!("config: {}", cfg);

    env.fs().create_dir(&cfg.temp_dir)?;

    let result = run_phases(&env, cfg, started);

    let cleanup = env.fs().remove_all(&cfg.temp_dir);
    match (result, cleanup) {
        (Ok(info), Ok(())) => {
            log::info!("exec info: {}", info);
            Ok(info)
        }
        (Ok(_), Err(cleanup_err)) => Err(cleanup_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup_err)) => {
            env.on_unhandled_error(cleanup_err);
            Err(err)
        }
    }
}

fn run_phases(env: &Env, cfg: &Config, started: Instant) -> Result<ExecInfo> {
    let input_file_size = env.fs().file_size(&cfg.input_path)?;

    let splitting_started = Instant::now();
    let split_opts = SplitOptions {
        output_dir: cfg.temp_dir.clone(),
        chunk_capacity: cfg.chunk_capacity,
        preferred_chunk_size: cfg.preferred_chunk_size,
        read_buf_size: cfg.worker_read_buf_size,
        write_buf_size: cfg.worker_write_buf_size,
        workers: cfg.workers_count,
    };
    let run_files = split_file(
        env,
        &cfg.input_path,
        &split_opts,
        Some(split_progress(input_file_size)),
    )?;
    let splitting_duration = splitting_started.elapsed();
    log::info!(
        "splitting: done, {} runs in {:?}",
        run_files.len(),
        splitting_duration,
    );

    let merging_started = Instant::now();
    let merge_opts = MergeOptions {
        output_dir: cfg.temp_dir.clone(),
        read_buf_size: cfg.worker_read_buf_size,
        write_buf_size: cfg.worker_write_buf_size,
        workers: cfg.workers_count,
    };
    let merges_total = run_files.len().saturating_sub(1) as u64;
    let merged = merge_runs(
        env,
        &run_files,
        &merge_opts,
        Some(merge_progress(merges_total)),
    )?;
    let merging_duration = merging_started.elapsed();
    log::info!("merging: done in {:?}", merging_duration);

    log::info!(
        "moving: '{}' -> '{}'",
        merged.display(),
        cfg.output_path.display(),
    );
    env.fs().move_file(&merged, &cfg.output_path)?;

    let output_file_size = env.fs().file_size(&cfg.output_path)?;

    Ok(ExecInfo {
        temp_dir: cfg.temp_dir.display().to_string(),
        input_file: cfg.input_path.display().to_string(),
        output_file: cfg.output_path.display().to_string(),
        input_file_size,
        output_file_size,
        workers_count: cfg.workers_count,
        worker_read_buf_size: cfg.worker_read_buf_size,
        worker_write_buf_size: cfg.worker_write_buf_size,
        preferred_chunk_size: cfg.preferred_chunk_size,
        chunk_capacity: cfg.chunk_capacity,
        splitting_duration,
        merging_duration,
        exec_duration: started.elapsed(),
    })
}

fn split_progress(input_file_size: u64) -> SplitProgress {
    let progress = Mutex::new(Progress::new(input_file_size));

    Arc::new(move |_env: &Env, chunk: &Chunk, path: &Path| {
        let mut progress = progress.lock();
        let tick = progress.add(chunk.serialized_size() as u64);
        if tick.changed {
            log::info!(
                "splitting: {:3}% {}/{} {} [{} bytes]",
                tick.percents,
                tick.value,
                progress.max(),
                base_name(path),
                chunk.serialized_size(),
            );
        }
        Ok(())
    })
}

fn merge_progress(merges_total: u64) -> MergeProgress {
    let progress = Mutex::new(Progress::new(merges_total));

    Arc::new(move |_env: &Env, out: &Path, left: &Path, right: &Path| {
        let mut progress = progress.lock();
        let tick = progress.add(1);
        if tick.changed {
            log::info!(
                "merging: {:3}% {}/{} {}|{} -> {}",
                tick.percents,
                tick.value,
                progress.max(),
                base_name(left),
                base_name(right),
                base_name(out),
            );
        }
        Ok(())
    })
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
