//! `log` facade backend writing coloured lines to the kernel console.

use log::{self, Level, LevelFilter, Log, Metadata, Record};

/// A simple logger that prints all log messages
struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }
    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => 31, // 红色
            Level::Warn => 93,  // Bright Yellow
            Level::Info => 34,  // 蓝色
            Level::Debug => 32, // 绿色
            Level::Trace => 36, // 青色
        };
        println!(
            "\u{1B}[{}m[{:>5}] {}\u{1B}[0m",
            color,
            record.level(),
            record.args(),
        );
    }
    fn flush(&self) {}
}

/// Map a level name (`ERROR` .. `TRACE`) to a filter, `Off` otherwise.
pub fn parse_level(s: Option<&str>) -> LevelFilter {
    match s {
        Some("ERROR") => LevelFilter::Error,
        Some("WARN") => LevelFilter::Warn,
        Some("INFO") => LevelFilter::Info,
        Some("DEBUG") => LevelFilter::Debug,
        Some("TRACE") => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

/// Install the logger; the level comes from `LOG` at build time.
///
/// Safe to call more than once: only the first call installs anything.
pub fn init() {
    static LOGGER: SimpleLogger = SimpleLogger;
    if log::set_logger(&LOGGER).is_ok() {
        // 通过编译期环境变量 LOG 来控制日志的输出级别
        log::set_max_level(parse_level(option_env!("LOG")));
    }
}

pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names() {
        assert_eq!(parse_level(Some("WARN")), LevelFilter::Warn);
        assert_eq!(parse_level(Some("TRACE")), LevelFilter::Trace);
        assert_eq!(parse_level(Some("verbose")), LevelFilter::Off);
        assert_eq!(parse_level(None), LevelFilter::Off);
    }
}
