use anyhow::Result;
use chrono::Local;
use clap::ArgMatches;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::io::{self, Write};

/// Environment variable naming the diagnostic log file.
pub const LOG_FILE_ENV: &str = "TWINPORT_LOG_FILE";

/// Common initialization used by every entrypoint.
pub fn init_common() {
    let log_file = std::env::var(LOG_FILE_ENV).ok().or_else(|| {
        #[cfg(debug_assertions)]
        {
            Some(format!("./log_{}.log", Local::now().format("%Y%m%d%H%M%S")))
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    });

    if let Some(path) = log_file {
        if let Err(err) = init_file_logger(&path) {
            eprintln!("Failed to initialize file logger at '{path}': {err}");
            init_stderr_logger();
        }
    } else {
        init_stderr_logger();
    }
}

fn init_stderr_logger() {
    Builder::new()
        .filter_level(LevelFilter::Warn)
        .parse_default_env()
        .init();
}

pub async fn start_console(matches: &ArgMatches) -> Result<()> {
    crate::cli::actions::start_console(matches).await
}

/// Run one test headlessly; the result is the process exit code.
pub async fn start_headless(matches: &ArgMatches) -> Result<i32> {
    let all_passed = crate::cli::actions::run_headless(matches).await?;
    Ok(if all_passed { 0 } else { 1 })
}

fn init_file_logger(path: &str) -> io::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} {} [{}] - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(file)))
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .init();

    log::info!("File logger initialized at {path}");

    Ok(())
}
