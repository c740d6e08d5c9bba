//! Logging helpers built on `slog`.
//!
//! Components never force an opinion on where logs go: every long-running task (sweeper,
//! watcher, dispatcher) accepts a `slog::Logger` and falls back to a no-op discard logger
//! when the caller doesn't supply one via `PoolConfig`.

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// A logger that discards everything. Used as the default when `PoolConfig::logger` is absent.
pub fn discard() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

/// Builds a human-readable terminal logger at debug level, for binaries and tests that want
/// to see pool/watcher activity without wiring up their own `slog` drain.
pub fn terminal(severity: Severity) -> slog::Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(severity);
    builder.destination(Destination::Stderr);

    builder
        .build()
        .expect("terminal logger configuration is always valid")
}
