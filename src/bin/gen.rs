use std::io::prelude::*;
use std::path::Path;
use std::process;

use bytesize::ByteSize;
use rand::Rng;

use extsort::fs::Fs;
use extsort::progress::Progress;
use extsort::{CancelToken, Error, OsFs, Result};

const SYMBOLS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const WRITE_BUF_SIZE: usize = 1024 * 1024;

fn main() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_millis()
        .init();

    let args = build_arg_parser();
    let output = args.value_of("out").expect("value is pre-defaulted").to_string();
    let lines: u64 = args.value_of_t_or_exit("lines");
    let max_line_length: usize = args.value_of_t_or_exit("max_line_length");

    if max_line_length == 0 {
        log::error!("FAILED: max_line_length is zero");
        process::exit(1);
    }

    let cancel = CancelToken::new();
    {
        let token = cancel.clone();
        if let Err(err) = ctrlc::set_handler(move || token.cancel()) {
            log::warn!("SIGINT handler is not installed: {}", err);
        }
    }

    match generate(&cancel, Path::new(&output), lines, max_line_length) {
        Ok(size) => {
            log::info!("out: {}", output);
            log::info!("size: {}", ByteSize::b(size));
            log::info!("DONE: {}", output);
        }
        Err(err) => {
            log::error!("FAILED: {}", err);
            process::exit(1);
        }
    }
}

fn generate(cancel: &CancelToken, output: &Path, lines: u64, max_line_length: usize) -> Result<u64> {
    let fs = OsFs::new();

    let file = fs.create_write_file(output)?;
    let mut writer = std::io::BufWriter::with_capacity(WRITE_BUF_SIZE, file);

    let mut progress = Progress::new(lines);
    let mut rng = rand::thread_rng();
    let mut size = 0u64;

    for _ in 0..lines {
        cancel.check()?;

        let line = random_line(&mut rng, max_line_length);
        writer.write_all(&line)?;
        size += line.len() as u64;

        let tick = progress.add(1);
        if tick.changed {
            log::info!(
                "progress: {:3}% {}/{} {}",
                tick.percents,
                tick.value,
                progress.max(),
                ByteSize::b(size),
            );
        }
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|err| Error::Io(err.into_error()))?;
    file.close()?;

    fs.file_size(output)
}

fn random_line<R: Rng>(rng: &mut R, max_line_length: usize) -> Vec<u8> {
    let len = rng.gen_range(1..=max_line_length);
    let mut line = Vec::with_capacity(len + 1);
    for _ in 0..len {
        line.push(SYMBOLS[rng.gen_range(0..SYMBOLS.len())]);
    }
    line.push(b'\n');
    line
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("gen")
        .about("random line-oriented input generator")
        .arg(
            clap::Arg::new("out")
                .long("out")
                .help("output file; must not exist yet")
                .takes_value(true)
                .default_value("rand_lines"),
        )
        .arg(
            clap::Arg::new("lines")
                .long("lines")
                .help("lines count")
                .takes_value(true)
                .default_value("1000000"),
        )
        .arg(
            clap::Arg::new("max_line_length")
                .long("max_line_length")
                .help("max line length")
                .takes_value(true)
                .default_value("32"),
        )
        .get_matches()
}
