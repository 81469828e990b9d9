use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "info";

/// Keeps the background log writer alive; drop it only at exit.
pub struct LogGuard {
  _guard: WorkerGuard,
}

/// Install the global subscriber.
///
/// RUST_LOG wins over `default_filter`. Warnings and errors go to stderr;
/// everything the filter allows goes to a daily log file under `log_dir`
/// when that directory can be created.
pub fn init(default_filter: Option<&str>, log_dir: Option<&Path>) -> Option<LogGuard> {
  let env_filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(default_filter.unwrap_or(DEFAULT_FILTER)))
    .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
  let stderr_layer = fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(false)
    .with_filter(LevelFilter::WARN);

  if let Some(dir) = log_dir {
    if let Err(err) = std::fs::create_dir_all(dir) {
      eprintln!("failed to create log directory {}: {}", dir.display(), err);
    } else {
      let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "shiksha.log");
      let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
      let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true);

      tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

      return Some(LogGuard { _guard: guard });
    }
  }

  tracing_subscriber::registry()
    .with(env_filter)
    .with(stderr_layer)
    .init();

  None
}
