use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default log directory: `$HOME/.stockroom/logs`.
pub fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".stockroom")
        .join("logs")
}

/// File name prefix of the rolling log for a component, e.g. `scan.log`.
pub fn log_file_prefix(component: &str) -> String {
    format!("{component}.log")
}

/// Install the global subscriber: a daily-rolling file under `log_dir` and,
/// optionally, a compact stderr stream. `RUST_LOG` overrides the `info`
/// default. Keep the returned guard alive to flush the file writer.
pub fn init_logging(component: &str, log_dir: &Path, to_stderr: bool) -> WorkerGuard {
    let _ = std::fs::create_dir_all(log_dir);

    // scan.log.2024-01-21
    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_prefix(component));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    let stderr_layer = to_stderr.then(|| {
        fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    // A second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init();

    guard
}
