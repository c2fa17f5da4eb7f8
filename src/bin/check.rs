use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Instant;

use bytesize::ByteSize;

use extsort::config::DEFAULT_WORKER_READ_BUF_SIZE_KB;
use extsort::fs::ScopedFile;
use extsort::progress::Progress;
use extsort::{CancelToken, Env, Error, LineReader, OsFs, Result};

const NOT_SORTED_EXIT_CODE: i32 = 2;

fn main() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_millis()
        .init();

    let args = build_arg_parser();
    let input = args.value_of("in").expect("value is required").to_string();

    let cancel = CancelToken::new();
    {
        let token = cancel.clone();
        if let Err(err) = ctrlc::set_handler(move || token.cancel()) {
            log::warn!("SIGINT handler is not installed: {}", err);
        }
    }

    let env = Env::new(Arc::new(OsFs::new()), cancel);

    let started = Instant::now();
    let result = check(&env, Path::new(&input));
    log::info!("duration: {:?}", started.elapsed());

    match result {
        Ok(lines) => {
            log::info!("lines count: {}", lines);
            log::info!("Result: SORTED. The '{}' file is sorted", input);
        }
        Err(Error::NotSorted) => {
            log::info!("Result: NOT SORTED. The '{}' file is not sorted", input);
            process::exit(NOT_SORTED_EXIT_CODE);
        }
        Err(err) => {
            log::error!("FAILED: {}", err);
            process::exit(1);
        }
    }
}

fn check(env: &Env, input: &Path) -> Result<u64> {
    let (handle, file_size) = env.fs().open_read_file(input)?;
    let mut file = ScopedFile::new(env, handle);

    let result = check_stream(env, &mut file, file_size);

    match file.close() {
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

fn check_stream<R: std::io::Read>(env: &Env, reader: R, file_size: u64) -> Result<u64> {
    let reader =
        std::io::BufReader::with_capacity(DEFAULT_WORKER_READ_BUF_SIZE_KB * 1024, reader);

    let mut progress = Progress::new(file_size);
    let mut lines_count = 0u64;
    let mut prev: Option<Vec<u8>> = None;

    for line in LineReader::new(env.cancel().clone(), reader) {
        let line = line?;

        if let Some(prev) = &prev {
            if prev > &line {
                return Err(Error::NotSorted);
            }
        }

        lines_count += 1;
        // +1 accounts for the stripped end of line
        let tick = progress.add(line.len() as u64 + 1);
        if tick.changed {
            log::info!(
                "progress: {:3}% {}/{} {}",
                tick.percents,
                tick.value,
                progress.max(),
                ByteSize::b(tick.value),
            );
        }

        prev = Some(line);
    }

    Ok(lines_count)
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("check")
        .about("verifies that a file is sorted in ascending line order")
        .arg(
            clap::Arg::new("in")
                .long("in")
                .help("file to be checked")
                .required(true)
                .takes_value(true),
        )
        .get_matches()
}
