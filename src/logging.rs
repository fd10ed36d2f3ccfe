use std::io;

use slog::{self, Drain, Level};
use slog_mozlog_json::MozLogJson;

use crate::settings::Settings;

#[derive(Clone, Debug)]
pub struct MozLogger {
    pub log: slog::Logger,
}

impl MozLogger {
    /// Build the logger selected by `settings`. `verbose` forces debug output.
    pub fn from_settings(settings: &Settings, verbose: bool) -> Self {
        let level = if verbose || settings.debug {
            Level::Debug
        } else {
            Level::Info
        };
        if settings.json_logs {
            Self::new_json("geoip-lookup", level)
        } else {
            Self::new_human(level)
        }
    }

    pub fn new_json(msg_type: &str, level: Level) -> Self {
        let json_drain = MozLogJson::new(io::stderr())
            .logger_name(format!(
                "{}-{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .msg_type(msg_type.to_string())
            .build()
            .fuse();
        let drain = slog::LevelFilter::new(json_drain, level).fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        Self {
            log: slog::Logger::root(drain, slog::o!()),
        }
    }

    pub fn new_human(level: Level) -> Self {
        let decorator = slog_term::TermDecorator::new().stderr().build();
        let drain = slog_term::CompactFormat::new(decorator).build().fuse();
        let drain = slog::LevelFilter::new(drain, level).fuse();
        let drain = slog_async::Async::new(drain).build().fuse();

        Self {
            log: slog::Logger::root(drain, slog::o!()),
        }
    }
}

impl Default for MozLogger {
    fn default() -> Self {
        Self {
            log: slog::Logger::root(slog::Discard, slog::o!()),
        }
    }
}
