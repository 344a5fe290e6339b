//! Terminal backend for the `log` facade, shared by both tools.

use console::{style, Emoji};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

static LOGGER: ConsoleLogger = ConsoleLogger;

/// Writes records to stderr, with the same emoji prefixes and colours as the status lines.
pub struct ConsoleLogger;
impl ConsoleLogger {
    fn prefix(level: Level) -> String {
        match level {
            Level::Error => format!("{} {}", Emoji("❌", "X"), style("Error:").bright().red()),
            Level::Warn => format!("{} {}", Emoji("⚠️", "⚠"), style("Warning:").bright().yellow()),
            Level::Info => format!("{} {}", Emoji("ℹ️", "ℹ"), style("Info:").bright().cyan()),
            Level::Debug | Level::Trace => format!("  {}", style("debug:").dim()),
        }
    }
}
impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("{} {}", Self::prefix(record.level()), record.args());
        }
    }

    fn flush(&self) {}
}

/// Level used by the tools: `Debug` when verbose, `Info` otherwise.
pub fn level_filter(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Installs the [`ConsoleLogger`]. Fails if another logger is already in place.
pub fn init(verbose: bool) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level_filter(verbose));
    Ok(())
}
