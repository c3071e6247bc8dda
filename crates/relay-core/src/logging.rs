//! Tracing subscriber setup for binaries.
//!
//! The library only emits `tracing` events; hosts decide where they go.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "RELAY_LOG";

const DEFAULT_DIRECTIVES: &str = "warn";

/// Builds the filter from `RELAY_LOG`, falling back to `warn`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Installs the global subscriber: stderr always, plus a daily rolling file
/// under `log_dir` when given.
///
/// Keep the returned guard alive for the lifetime of the process or buffered
/// file output is lost. Does nothing if a subscriber is already installed.
pub fn init(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();

    match installed {
        Ok(()) => guard,
        Err(_) => None,
    }
}
