//! Tracing setup for hosts that want engine logs.

use std::path::Path;

use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("haven=info"))
}

/// Log to stderr, filtered by `RUST_LOG` (default `haven=info`).
pub fn init() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(env_filter())
    .with_writer(std::io::stderr)
    .try_init();
}

/// Log to a daily-rolling file under `dir`. The returned guard must be held
/// for as long as logging should keep flushing.
pub fn init_with_file(dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
  let appender = tracing_appender::rolling::daily(dir, "haven.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let _ = tracing_subscriber::fmt()
    .with_env_filter(env_filter())
    .with_writer(writer)
    .with_ansi(false)
    .try_init();
  guard
}
