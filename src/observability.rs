// SPDX-License-Identifier: Apache-2.0

//! Logging and observability helpers.
//!
//! The protocol log is JSON, one file per day, under `~/.fedsql/logs` unless
//! the configuration names another directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Local;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

pub const LOG_FILE_PREFIX: &str = "fedprot.log";
const DEFAULT_FILTER: &str = "fedsql=info";

/// Installs the global subscriber. Returns the directory logs are written to.
pub fn init_tracing(config: &LogConfig) -> PathBuf {
    let log_dir = config.directory.clone().unwrap_or_else(log_directory);
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log directory {}: {}", log_dir.display(), e);
    }

    if let Err(e) = cleanup_old_logs(&log_dir, config.retention_days) {
        eprintln!("Failed to clean up old logs: {}", e);
    }

    let file_appender: RollingFileAppender =
        tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(config.filter.as_deref().unwrap_or(DEFAULT_FILTER))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(file_appender)
        .json()
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE)
        .try_init();

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let payload = panic_info.payload();
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            format!("PANIC: {}", s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("PANIC: {}", s)
        } else {
            "PANIC: unknown cause".to_string()
        };

        tracing::error!(target: "panic", location = %location, message = %msg, "Process panicked");
        previous_hook(panic_info);
    }));

    tracing::info!(
        started_at = %Local::now().format("%Y-%m-%d %H:%M:%S"),
        "Tracing initialized. Logs directory: {:?}",
        log_dir
    );
    log_dir
}

/// `~/.fedsql/logs`, or a relative `.fedsql/logs` when no home directory is known
pub fn log_directory() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_default();
    path.push(".fedsql");
    path.push("logs");
    path
}

/// Removes `.log` files older than the retention window
pub fn cleanup_old_logs(log_dir: &Path, retention_days: u64) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let retention = Duration::from_secs(retention_days * 24 * 60 * 60);
    let mut removed = 0;

    for entry in fs::read_dir(log_dir)? {
        let path = entry?.path();
        if !is_log_file(&path) {
            continue;
        }

        let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) else {
            continue;
        };
        let Ok(age) = now.duration_since(modified) else {
            continue;
        };
        if age > retention {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => eprintln!("Failed to remove old log file {:?}: {}", path, e),
            }
        }
    }
    Ok(removed)
}

/// Rolled files are named `fedprot.log.YYYY-MM-DD`
fn is_log_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX) || name.ends_with(".log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_keeps_recent_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("fedprot.log.2026-01-01"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        let removed = cleanup_old_logs(dir.path(), 14).unwrap();
        assert_eq!(removed, 0);
        assert!(dir.path().join("fedprot.log.2026-01-01").exists());

        // zero retention removes every log file that has any age at all
        std::thread::sleep(Duration::from_millis(20));
        let removed = cleanup_old_logs(dir.path(), 0).unwrap();
        assert_eq!(removed, 1);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn default_directory_ends_with_fedsql_logs() {
        let dir = log_directory();
        assert!(dir.ends_with(".fedsql/logs"));
    }
}
