//! Tracing setup
//!
//! Every process writes a rolling log file under `log_dir`. Plain-text runs
//! additionally mirror events to stdout (the daemons are usually watched
//! from a terminal in dev); JSON output is file-only, meant for shippers.
//! `RUST_LOG` overrides the configured level when set.
//!
//! The returned guard owns the non-blocking writer thread; hold it for the
//! life of the process or buffered events are lost on exit.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

fn rotation_for(config: &AppConfig) -> Rotation {
    match config.rotation.as_str() {
        "minutely" => Rotation::MINUTELY,
        "hourly" => Rotation::HOURLY,
        "daily" => Rotation::DAILY,
        // Anything else (including "never") appends to one file forever
        _ => Rotation::NEVER,
    }
}

pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let appender =
        RollingFileAppender::new(rotation_for(config), &config.log_dir, &config.log_file);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        registry
            .with(fmt::layer().json().with_writer(file_writer).with_ansi(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(file_writer)
                    .with_ansi(false),
            )
            .with(fmt::layer().with_target(false).with_ansi(true))
            .init();
    }

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_parsing() {
        let mut config = AppConfig::default();

        config.rotation = "hourly".to_string();
        assert_eq!(rotation_for(&config), Rotation::HOURLY);

        config.rotation = "daily".to_string();
        assert_eq!(rotation_for(&config), Rotation::DAILY);

        config.rotation = "off".to_string();
        assert_eq!(rotation_for(&config), Rotation::NEVER);
    }
}
