//! Tracing initialization
//!
//! Stdout layer always; optional non-blocking file layer when a log
//! directory is supplied. `RUST_LOG` overrides the default filter.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the global subscriber.
///
/// Returns the appender guard when file logging is enabled; the caller must
/// keep it alive for buffered lines to flush.
pub fn init_logging(default_level: &str, log_dir: Option<&str>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tickmatch.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer()
                .with_target(false)
                .with_writer(non_blocking)
                .with_ansi(false);
            let stdout_layer = fmt::layer().with_target(false);
            registry.with(file_layer).with(stdout_layer).init();
            Some(guard)
        }
        None => {
            let stdout_layer = fmt::layer().with_target(false);
            registry.with(stdout_layer).init();
            None
        }
    }
}
