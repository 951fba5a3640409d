//! `tracing`-based logging setup, mirroring the original's stderr + file
//! split driven by `AUTOSTART_LOG_LEVEL`/`AUTOSTART_LOG_FILE_LEVEL`.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Installs a global subscriber. `default_logfile` is the subcommand-derived
/// name (`"<subcommand>.log"`) used unless `AUTOSTART_LOG_FILE` overrides it.
pub fn init(default_logfile: &str) {
    let stderr_level = parse_level(&env_or("AUTOSTART_LOG_LEVEL", "INFO"));
    let file_level = parse_level(&env_or("AUTOSTART_LOG_FILE_LEVEL", "DEBUG"));
    let log_file_path = env_or("AUTOSTART_LOG_FILE", default_logfile);

    let stderr_layer = fmt::layer()
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_level);

    let registry = tracing_subscriber::registry().with(stderr_layer);

    let file = OpenOptions::new().create(true).append(true).open(&log_file_path).ok();
    match file {
        Some(file) => {
            let file_layer = fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(file_level);
            let _ = tracing::subscriber::set_global_default(registry.with(file_layer));
        }
        None => {
            let _ = tracing::subscriber::set_global_default(registry);
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_level(name: &str) -> LevelFilter {
    match name.to_lowercase().as_str() {
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" | "critical" => LevelFilter::ERROR,
        _ => LevelFilter::DEBUG,
    }
}
