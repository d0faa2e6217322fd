//! Thin wrapper around `slog`/`sloggers` so every crate in the workspace logs the same
//! structured way instead of reaching for `println!`. Re-exports the `slog` macros and key
//! types so callers only ever need `use stp_core::logging;`.

pub use slog::{debug, error, info, o, trace, warn, Discard, Drain, Logger};

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Builds the root logger for a stack instance. `level` follows the usual severity names
/// (`trace`, `debug`, `info`, `warn`, `error`); anything else falls back to `info`.
pub fn init(level: &str) -> Logger {
    let severity = match level {
        "trace" => Severity::Trace,
        "debug" => Severity::Debug,
        "warn" => Severity::Warning,
        "error" => Severity::Error,
        _ => Severity::Info,
    };

    let mut builder = TerminalLoggerBuilder::new();
    builder.level(severity);
    builder.destination(Destination::Stderr);

    builder.build().unwrap_or_else(|_| Logger::root(Discard, o!()))
}

/// A logger that drops everything written to it. Useful for components (tests, one-shot
/// key-management helpers) that don't want to wire up a real sink.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}
