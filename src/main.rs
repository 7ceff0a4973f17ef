use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{Level, LevelFilter, Log, Metadata, Record};
use safe_deletion::{all_strategies, run_differential, Harness, HarnessConfig, HarnessError};

/// Info and below go to stdout, warnings and errors to stderr.
struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        match record.level() {
            Level::Error | Level::Warn => eprintln!("[{}] {}", record.level(), record.args()),
            _ => println!("{}", record.args()),
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

fn init_logger() {
    let level = std::env::var("SAFE_DELETION_LOG")
        .ok()
        .and_then(|x| x.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

fn is_whole_integer(arg: &str) -> bool {
    !arg.is_empty() && arg.bytes().all(|b| b.is_ascii_digit())
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|x| x.as_secs())
        .unwrap_or(safe_deletion::config::DEFAULT_SEED)
}

fn seed_from_args(arg: Option<String>, fallback: impl FnOnce() -> u64) -> u64 {
    arg.filter(|x| is_whole_integer(x))
        .and_then(|x| x.parse().ok())
        .unwrap_or_else(fallback)
}

fn env_override(name: &str) -> Result<Option<usize>, HarnessError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| HarnessError::InvalidConfig {
                message: format!("{}={:?} is not a non-negative integer", name, value),
            }),
        Err(_) => Ok(None),
    }
}

fn config_from_env(seed: u64) -> Result<HarnessConfig, HarnessError> {
    let mut config = HarnessConfig::new(seed);
    if let Some(x) = env_override("SAFE_DELETION_MAX_KEY_LENGTH")? {
        config = config.with_max_key_length(x);
    }
    if let Some(x) = env_override("SAFE_DELETION_MAX_ENTRIES")? {
        config = config.with_max_entries(x);
    }
    if let Some(x) = env_override("SAFE_DELETION_MAX_ITERATIONS")? {
        config = config.with_max_iterations(x);
    }
    config.validate()?;
    Ok(config)
}

fn main() -> ExitCode {
    init_logger();
    let seed = seed_from_args(std::env::args().nth(1), clock_seed);
    let config = match config_from_env(seed) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::from(1);
        }
    };

    match Harness::new(config) {
        Ok(mut harness) => {
            println!("Seed: {}", harness.derived_seed());
            for key in harness.populate().keys.iter() {
                println!("{}", key);
            }
        }
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::from(1);
        }
    }

    match run_differential(&config, &all_strategies()) {
        Ok(reports) => {
            for report in reports.iter() {
                log::debug!(
                    "{}: {} removals, {} skips, {} collections released",
                    report.strategy,
                    report.removals(),
                    report.skips.total(),
                    report.released_collections
                );
            }
            println!("All tests successful!");
            ExitCode::SUCCESS
        }
        Err(err) => {
            match err.strategy() {
                Some(strategy) => eprintln!("Unsuccessful test of {}: {}", strategy, err),
                None => eprintln!("Unsuccessful test: {}", err),
            }
            ExitCode::from(1)
        }
    }
}
