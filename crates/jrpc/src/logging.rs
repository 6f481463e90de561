use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

/// Frame mirroring only happens on connections that asked for it, so the
/// target stays enabled whatever the level.
const WIRE_TARGET: &str = "jrpc::wire";

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

fn targets(level: LogLevel) -> Targets {
    let level = level.as_filter();
    Targets::new()
        .with_default(level)
        .with_target(WIRE_TARGET, level.max(LevelFilter::DEBUG))
}

pub fn init_logging(format: LogFormat, level: LogLevel) {
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false);

    let layer = match format {
        LogFormat::Text => layer.with_filter(targets(level)).boxed(),
        LogFormat::Json => layer.json().with_filter(targets(level)).boxed(),
    };
    let _ = tracing_subscriber::registry().with(layer).try_init();
}

#[cfg(test)]
mod tests {
    use tracing::Level;

    use super::*;

    #[test]
    fn wire_frames_show_at_info() {
        let filter = targets(LogLevel::Info);
        assert!(filter.would_enable(WIRE_TARGET, &Level::DEBUG));
        assert!(!filter.would_enable("jrpc_router::session", &Level::DEBUG));
        assert!(filter.would_enable("jrpc_router::session", &Level::INFO));
    }

    #[test]
    fn trace_level_still_applies_to_wire() {
        let filter = targets(LogLevel::Trace);
        assert!(filter.would_enable(WIRE_TARGET, &Level::TRACE));
    }
}
