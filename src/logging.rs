use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

fn rolling_appender(config: &AppConfig) -> RollingFileAppender {
    let (dir, file) = (&config.log_dir, &config.log_file);
    match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(dir, file),
        "daily" => tracing_appender::rolling::daily(dir, file),
        _ => tracing_appender::rolling::never(dir, file),
    }
}

/// Install the global subscriber; keep the guard alive until exit to flush the file writer
///
/// `RUST_LOG` overrides `log_level`. JSON output goes to the file only; text
/// output also goes to stderr when `log_to_console` is set, leaving stdout to
/// the replay results.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(rolling_appender(config));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        registry
            .with(fmt::layer().json().with_writer(writer).with_ansi(false))
            .init();
    } else {
        let console = config
            .log_to_console
            .then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));
        registry
            .with(fmt::layer().with_target(false).with_writer(writer).with_ansi(false))
            .with(console)
            .init();
    }

    guard
}
