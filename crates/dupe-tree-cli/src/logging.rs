use std::env;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LEVEL: &str = "info";
const DEFAULT_LOG_FILE: &str = "./logs/dupe-tree.log";

/// Where the log file goes, split the way `tracing_appender::rolling` wants it.
#[derive(Debug, PartialEq)]
struct LogFile {
    dir: PathBuf,
    name: PathBuf,
}

impl LogFile {
    fn from_path(path: &str) -> Self {
        let path = Path::new(path);
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("dupe-tree.log"));
        Self { dir, name }
    }
}

/// Console events go to stderr one line each, next to the progress bars.
/// The file gets the same events without colour.
///
/// `TRACING_LEVEL` takes any `EnvFilter` directive; `LOG_FILE_PATH` names the file.
/// Keep the returned guard alive until exit or buffered lines are lost.
pub fn init_logger() -> WorkerGuard {
    let directive = env::var("TRACING_LEVEL").unwrap_or_else(|_| DEFAULT_LEVEL.to_string());
    let (filter, bad_directive) = match EnvFilter::try_new(&directive) {
        Ok(filter) => (filter, false),
        Err(_) => (EnvFilter::new(DEFAULT_LEVEL), true),
    };

    let log_file = LogFile::from_path(
        &env::var("LOG_FILE_PATH").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string()),
    );
    let (file_writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(
        &log_file.dir,
        &log_file.name,
    ));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_thread_ids(true),
        )
        .init();

    if bad_directive {
        warn!("Ignoring invalid TRACING_LEVEL '{}', using '{}'", directive, DEFAULT_LEVEL);
    }
    info!("Logging to {}", log_file.dir.join(&log_file.name).display());

    guard
}
