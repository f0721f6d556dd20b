//! Structured logging: console plus a daily rolling file in the app log dir.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::warn;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log files kept on disk; older ones are pruned at startup.
pub const MAX_LOG_FILES: usize = 14;
const LOG_FILE_PREFIX: &str = "orderchha";

/// Install the global subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(log_dir: Option<&Path>, default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let console_layer = fmt::layer().with_target(true);

    let file_layer = log_dir.and_then(|dir| {
        if let Err(e) = fs::create_dir_all(dir) {
            eprintln!("cannot create log directory {}: {e}", dir.display());
            return None;
        }
        prune_old_logs(dir, MAX_LOG_FILES);

        let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // The app logs until process exit; dropping the guard would stop the writer.
        std::mem::forget(guard);
        Some(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

/// Keep only the newest `keep` log files in `log_dir`. Returns how many were removed.
pub fn prune_old_logs(log_dir: &Path, keep: usize) -> usize {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };

    let mut log_files: Vec<(PathBuf, SystemTime)> = entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((entry.path(), modified))
        })
        .collect();

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed = 0;
    for (path, _) in log_files.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to prune log file {}: {e}", path.display()),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_prune_keeps_newest_logs() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=5 {
            let path = dir.path().join(format!("{LOG_FILE_PREFIX}.2026-01-0{day}"));
            fs::write(&path, "log").unwrap();
            let file = fs::File::options().write(true).open(&path).unwrap();
            file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(day * 86_400))
                .unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        assert_eq!(prune_old_logs(dir.path(), 2), 3);

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                format!("{LOG_FILE_PREFIX}.2026-01-04"),
                format!("{LOG_FILE_PREFIX}.2026-01-05"),
                "notes.txt".to_string(),
            ]
        );
    }

    #[test]
    fn test_prune_missing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(prune_old_logs(&dir.path().join("nope"), 3), 0);
    }
}
