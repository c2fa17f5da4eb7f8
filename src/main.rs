use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::ArgEnum;
use env_logger;
use log;

use extsort::config::DEFAULT_TEMP_DIR;
use extsort::{CancelToken, Config, Env, OsFs};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let cfg = config_from_args(&arg_parser);

    let cancel = CancelToken::new();
    {
        let token = cancel.clone();
        if let Err(err) = ctrlc::set_handler(move || token.cancel()) {
            log::warn!("SIGINT handler is not installed: {}", err);
        }
    }

    let env = Env::new(Arc::new(OsFs::new()), cancel);

    let result = extsort::sort_file(&env, &cfg);
    report_unhandled_errors(&env);

    match result {
        Ok(_) => log::info!("DONE"),
        Err(err) => {
            log::error!("FAILED: {}", err);
            process::exit(1);
        }
    }
}

fn config_from_args(args: &clap::ArgMatches) -> Config {
    let input = args.value_of("in").expect("value is required");
    let output = args.value_of("out").expect("value is required");
    let temp_dir = args.value_of("temp_dir").expect("value is pre-defaulted");

    let timestamp = chrono::Local::now().format("%Y_%m_%d__%H_%M_%S").to_string();
    let output = output.replace("{TIME}", &timestamp);
    // a fresh scratch subdirectory per run, the orchestrator insists on it
    let temp_dir = PathBuf::from(temp_dir).join(format!("extsort_{}", timestamp));

    let mut cfg = Config::new(input, output).with_temp_dir(temp_dir);

    if args.is_present("max_workers_count") {
        cfg = cfg.with_workers_count(args.value_of_t_or_exit("max_workers_count"));
    }
    if args.is_present("chunk_capacity") {
        cfg = cfg.with_chunk_capacity(args.value_of_t_or_exit("chunk_capacity"));
    }
    if args.is_present("preferred_chunk_size_kb") {
        let kb: usize = args.value_of_t_or_exit("preferred_chunk_size_kb");
        cfg = cfg.with_preferred_chunk_size(kb * 1024);
    }
    if args.is_present("worker_read_buf_size_kb") {
        let kb: usize = args.value_of_t_or_exit("worker_read_buf_size_kb");
        cfg = cfg.with_worker_read_buf_size(kb * 1024);
    }
    if args.is_present("worker_write_buf_size_kb") {
        let kb: usize = args.value_of_t_or_exit("worker_write_buf_size_kb");
        cfg = cfg.with_worker_write_buf_size(kb * 1024);
    }

    cfg
}

fn report_unhandled_errors(env: &Env) {
    let errs = env.unhandled_errors();
    if errs.is_empty() {
        return;
    }

    log::error!("!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!");
    log::error!("UNHANDLED ERRORS COUNT: {}", errs.len());
    for (idx, err) in errs.iter().enumerate() {
        log::error!("UNHANDLED ERROR [{}/{}]: {}", idx + 1, errs.len(), err);
    }
    log::error!("!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!");
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("sort")
        .about("external merge sort for huge line-oriented text files")
        .arg(
            clap::Arg::new("in")
                .long("in")
                .help("input file path")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("out")
                .long("out")
                .help("output file path; '{TIME}' expands to the start timestamp")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("temp_dir")
                .long("temp_dir")
                .help("directory to be used to store temporary data")
                .takes_value(true)
                .default_value(DEFAULT_TEMP_DIR),
        )
        .arg(
            clap::Arg::new("max_workers_count")
                .long("max_workers_count")
                .help("sort/merge workers count")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("chunk_capacity")
                .long("chunk_capacity")
                .help("initial chunk capacity in lines")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("preferred_chunk_size_kb")
                .long("preferred_chunk_size_kb")
                .help("preferred size of a chunk")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("worker_read_buf_size_kb")
                .long("worker_read_buf_size_kb")
                .help("worker's read buf size")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("worker_write_buf_size_kb")
                .long("worker_write_buf_size_kb")
                .help("worker's write buf size")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("log_level")
                .long("log_level")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
