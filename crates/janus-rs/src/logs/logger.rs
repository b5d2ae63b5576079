//! Logger configuration and output formatting.
//!
//! Structured single-line output with a timestamp, padded level, source
//! location and message. Colors are applied unless `NO_COLOR` is set.

use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

/// Visible width of the level column.
const LEVEL_FIELD_WIDTH: usize = 5;

/// Visible width of the `file:line` column.
const FILE_LINE_FIELD_WIDTH: usize = 24;

fn level_color(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[34m",
        log::Level::Trace => "\x1b[35m",
    }
}

/// Configures and initializes the process-wide logger.
///
/// The level defaults to `info` and follows `RUST_LOG` when set. Call once
/// during startup; later calls would panic inside `env_logger`.
///
/// # Output Format
///
/// ```text
/// Aug 01 26 02:30:45 PM | INFO  | proxy.rs:112             | Starting server on 0.0.0.0:5900
/// ```
pub fn configure_logger() {
    let no_color = env::var("NO_COLOR").is_ok();

    let mut builder = Builder::new();
    builder
        .format(move |buf, record| {
            let level = record.level();
            let level_text = format!("{:<width$}", level, width = LEVEL_FIELD_WIDTH);

            let file = record
                .file()
                .map(|f| f.rsplit('/').next().unwrap_or(f))
                .unwrap_or("unknown");
            let file_line = format!(
                "{:<width$}",
                format!("{}:{}", file, record.line().unwrap_or(0)),
                width = FILE_LINE_FIELD_WIDTH
            );

            if no_color {
                writeln!(
                    buf,
                    "{} | {} | {} | {}",
                    Local::now().format("%b %d %y %I:%M:%S %p"),
                    level_text,
                    file_line,
                    record.args(),
                )
            } else {
                writeln!(
                    buf,
                    "{} | {}{}\x1b[0m | {} | {}",
                    Local::now().format("%b %d %y %I:%M:%S %p"),
                    level_color(level),
                    level_text,
                    file_line,
                    record.args(),
                )
            }
        })
        .filter_level(LevelFilter::Info);

    if let Ok(filters) = env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    builder.init();
}
