//! Logging to the PL011 console
//!
//! Everything logs through the `log` crate; this module installs the sink
//! that formats records onto the serial port.

use log::{Level, LevelFilter, Metadata, Record};

/// Serial logger implementation
struct SerialLogger;

/// ANSI-coloured, fixed-width level tag
fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1b[31mERROR\x1b[0m",
        Level::Warn => "\x1b[33mWARN\x1b[0m ",
        Level::Info => "\x1b[32mINFO\x1b[0m ",
        Level::Debug => "\x1b[34mDEBUG\x1b[0m",
        Level::Trace => "\x1b[35mTRACE\x1b[0m",
    }
}

impl log::Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            // Format: [LEVEL] target: message
            crate::serial_println!(
                "[{}] {}: {}",
                level_tag(record.level()),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger;

/// Initialize the logging subsystem
///
/// Safe to call more than once; only the first call installs the logger.
pub fn init(level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

/// Set the maximum log level
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}
