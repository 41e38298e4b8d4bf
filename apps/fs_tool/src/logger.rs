use std::env;
use std::io::{self, Write};

use log::{Level, LevelFilter, Log};
use owo_colors::OwoColorize;

/// Level filter variable: error, warn, info, debug, trace or off.
const LEVEL_VAR: &str = "FLATFS_LOG";

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = record.level();
        let label = format!("{level:5}");
        let mut err = io::stderr().lock();
        let _ = match level {
            Level::Error => write!(err, "{} ", label.bright_red()),
            Level::Warn => write!(err, "{} ", label.bright_yellow()),
            Level::Info => write!(err, "{} ", label.bright_blue()),
            Level::Debug => write!(err, "{} ", label.bright_cyan()),
            Level::Trace => write!(err, "{} ", label.bright_magenta()),
        };
        let _ = writeln!(
            err,
            "{} {}",
            format_args!("[{}]", record.target()).dimmed(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

pub fn init() -> Result<(), log::SetLoggerError> {
    let level = env::var(LEVEL_VAR)
        .ok()
        .and_then(|value| value.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Warn);
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
