use log::{LevelFilter, Log, Metadata, Record};
use slog::{b, o, Drain};

/// Bridges the `log` facade used throughout the crate onto a `slog` drain.
pub struct Logger {
    inner: slog::Logger,
    level: LevelFilter,
}

impl Logger {
    /// Wraps the given `slog::Logger`, or builds a default asynchronous
    /// terminal drain when `inner` is `None`.
    pub fn new(inner: Option<slog::Logger>, level: LevelFilter) -> Self {
        let inner = inner.unwrap_or_else(|| {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            slog::Logger::root(drain, o!())
        });
        Self { inner, level }
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        static LOCATION: slog::RecordLocation = slog::RecordLocation {
            file: "<unknown>",
            line: 0,
            column: 0,
            function: "<unknown>",
            module: "<unknown>",
        };
        let rs = slog::RecordStatic {
            location: &LOCATION,
            level: to_slog_level(record.metadata().level()),
            tag: record.target(),
        };
        self.inner.log(&slog::Record::new(&rs, record.args(), b!()));
    }

    fn flush(&self) {}
}

fn to_slog_level(level: log::Level) -> slog::Level {
    match level {
        log::Level::Error => slog::Level::Error,
        log::Level::Warn => slog::Level::Warning,
        log::Level::Info => slog::Level::Info,
        log::Level::Debug => slog::Level::Debug,
        log::Level::Trace => slog::Level::Trace,
    }
}

/// Installs `inner` (or the default terminal drain) as the global `log`
/// backend. Only the first successful call takes effect.
pub fn init(inner: Option<slog::Logger>, level: LevelFilter) {
    let logger = Logger::new(inner, level);
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(level);
    }
}
