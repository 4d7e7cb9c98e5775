//! Logging setup: stderr plus a daily-rolling file under the logs directory.

use std::env;
use std::path::Path;

use fs_err as fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const DEBUG_ENV: &str = "DESKSHELL_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "host.log";

fn filter() -> EnvFilter {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Installs the global subscriber. Keep the returned guard alive for the
/// process lifetime or buffered file output is lost.
pub fn init(logs_dir: Option<&Path>) -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    let Some(dir) = logs_dir.filter(|dir| fs::create_dir_all(dir).is_ok()) else {
        let _ = tracing_subscriber::registry()
            .with(filter())
            .with(stderr_layer)
            .try_init();
        return None;
    };

    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer().with_writer(writer).with_ansi(false);

    let _ = tracing_subscriber::registry()
        .with(filter())
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    Some(guard)
}
