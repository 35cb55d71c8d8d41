//! Logging setup
//!
//! Everything goes to a rolling file through a non-blocking writer. In text
//! mode a console copy is written to stderr so report output on stdout stays
//! clean for piping.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

fn rotation(name: &str) -> Rotation {
    match name {
        "minutely" => Rotation::MINUTELY,
        "hourly" => Rotation::HOURLY,
        "daily" => Rotation::DAILY,
        _ => Rotation::NEVER,
    }
}

/// Directive string for the subscriber. `verbose` raises this crate's level
/// (1 = debug, 2+ = trace) without unmuting sqlx statement logs.
pub fn filter_directives(level: &str, verbose: u8) -> String {
    let own = match verbose {
        0 => return format!("{},sqlx=warn", level),
        1 => "debug",
        _ => "trace",
    };
    format!("{},ledger_workload={},sqlx=warn", level, own)
}

/// Install the global subscriber. Keep the guard alive for the process
/// lifetime or buffered lines are lost on exit. `RUST_LOG` wins over config.
pub fn init_logging(config: &AppConfig, verbose: u8) -> WorkerGuard {
    let appender = RollingFileAppender::new(
        rotation(&config.rotation),
        &config.log_dir,
        &config.log_file,
    );
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config.log_level, verbose)));

    let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
    if config.use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer.json().with_current_span(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer.with_target(false))
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact(),
            )
            .init();
    }

    guard
}
