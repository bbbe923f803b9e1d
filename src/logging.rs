//! Logging setup for the fuzzer binary and tests.
//!
//! Terminal output is compact and human-readable. When a log directory is
//! given, every event is also written as JSON lines to `<dir>/fuzz.log.jsonl`
//! with its structured fields (`session`, `feature`, `sql`, `oracle`) so runs
//! can be analysed with `jq`.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// What [`init_logging`] set up; the subscriber owns the file itself.
pub struct LogGuard {
    /// Path of the JSON-lines file, if file logging is enabled.
    pub log_path: Option<PathBuf>,
}

/// Install the global subscriber.
///
/// `verbose` lowers the default filter to `debug`; `RUST_LOG` overrides
/// either default. Call once per process.
pub fn init_logging(log_dir: Option<&Path>, verbose: bool) -> std::io::Result<LogGuard> {
    let default_filter = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let mut log_path = None;
    let json_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let path = dir.join("fuzz.log.jsonl");
            let file = File::create(&path)?;
            log_path = Some(path);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(Mutex::new(file))
                    .with_target(true)
                    .with_thread_ids(true),
            )
        }
        None => None,
    };

    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(terminal_layer)
        .with(json_layer)
        .init();

    Ok(LogGuard { log_path })
}

/// Terminal-only logging for tests. Safe to call repeatedly.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_test_writer()
                .compact(),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_layer_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let writer = Mutex::new(File::create(&path).unwrap());

        let subscriber = tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true),
        );
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(session = "database0", feature = "JOIN", "feature disabled");
        });

        let content = std::fs::read_to_string(&path).unwrap();
        let line = content.lines().next().unwrap();
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["fields"]["session"], "database0");
        assert_eq!(value["fields"]["feature"], "JOIN");
    }

    #[test]
    fn test_init_test_logging_is_idempotent() {
        init_test_logging();
        init_test_logging();
    }
}
