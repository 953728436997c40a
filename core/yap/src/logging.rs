//! Tracing setup for the `yap` binary.
//!
//! Logs go to `<system dir>/logs/yap.log`. `YAP_LOG` takes an `EnvFilter`
//! directive (default `info`); `YAP_DEBUG_LOG=1` forces `debug` and mirrors
//! everything to stderr.

use fs_err as fs;
use std::env;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use yap_core::StorageConfig;

const LOG_ENV: &str = "YAP_LOG";
const DEBUG_ENV: &str = "YAP_DEBUG_LOG";

/// Installs the global subscriber. Keep the returned guard alive until exit
/// or buffered lines are lost.
pub fn init(storage: Option<&StorageConfig>) -> Option<WorkerGuard> {
    let debug = debug_enabled();
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let (file_writer, guard) = match storage.and_then(file_appender) {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let file_layer = file_writer.map(|writer| fmt::layer().with_ansi(false).with_writer(writer));
    let stderr_layer = debug.then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init();

    guard
}

fn file_appender(storage: &StorageConfig) -> Option<RollingFileAppender> {
    let dir = storage.log_dir();
    if let Err(err) = fs::create_dir_all(&dir) {
        eprintln!("yap: logging disabled: {}", err);
        return None;
    }

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix("yap")
        .filename_suffix("log")
        .build(&dir)
        .map_err(|err| eprintln!("yap: logging disabled: {}", err))
        .ok()
}

fn debug_enabled() -> bool {
    env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}
