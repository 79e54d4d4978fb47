//! Tracing bootstrap for the daemon.

use std::env;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

const DEFAULT_FILTER: &str = "info,cpsync=debug";

/// Install the global subscriber.
///
/// Filter precedence:
/// 1) `RUST_LOG`
/// 2) `CPSYNC_LOG`
/// 3) `logging.level` from the config file
/// 4) internal default filter
///
/// When a log directory is configured the returned guard flushes the file
/// writer on drop and must be held for the life of the process.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
  let env_filter = filter_from_env(config.level.as_deref());

  match &config.directory {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "cpsync.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let _ = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_target(true)
        .with_env_filter(env_filter)
        .with_writer(writer)
        .try_init();
      Some(guard)
    }
    None => {
      let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
      None
    }
  }
}

fn filter_from_env(configured: Option<&str>) -> EnvFilter {
  if let Ok(filter) = EnvFilter::try_from_default_env() {
    return filter;
  }

  let from_var = env::var("CPSYNC_LOG")
    .ok()
    .filter(|v| !v.trim().is_empty())
    .and_then(|v| EnvFilter::try_new(v).ok());
  if let Some(filter) = from_var {
    return filter;
  }

  configured
    .and_then(|level| EnvFilter::try_new(level).ok())
    .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
