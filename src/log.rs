//! Process-wide logging setup. `main` calls [`init`] once; the library only
//! emits `tracing` events.

use crate::error::LogError;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Overrides the configured level, using `EnvFilter` directive syntax.
pub const LOG_ENV: &str = "MAILSIFT_LOG";

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub level: String,
    pub stderr: bool,
    pub file: Option<PathBuf>,
}

impl Default for LogOptions {
    fn default() -> Self {
        LogOptions {
            level: "info".to_string(),
            stderr: true,
            file: None,
        }
    }
}

pub fn default_log_path() -> PathBuf {
    if let Ok(state) = std::env::var("XDG_STATE_HOME") {
        PathBuf::from(state).join("mailsift").join("mailsift.log")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home)
            .join(".local")
            .join("state")
            .join("mailsift")
            .join("mailsift.log")
    } else {
        PathBuf::from("mailsift.log")
    }
}

fn open_log_file(path: &Path) -> Result<File, LogError> {
    let to_error = |source| LogError::File {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(to_error)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(to_error)
}

/// Install the global subscriber: optional stderr sink, optional plain-text file sink.
pub fn init(options: &LogOptions) -> Result<(), LogError> {
    let level: LevelFilter = options.level.parse().map_err(|e| LogError::Level {
        level: options.level.clone(),
        reason: format!("{}", e),
    })?;
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();

    let stderr_layer = options
        .stderr
        .then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));
    let file_layer = match &options.file {
        Some(path) => Some(
            fmt::layer()
                .with_writer(Mutex::new(open_log_file(path)?))
                .with_ansi(false)
                .with_target(false),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| LogError::AlreadyInitialized)
}

/// Truncate the log file. A missing file is not an error.
pub fn clear(path: &Path) -> Result<(), LogError> {
    if !path.exists() {
        return Ok(());
    }
    OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .map(|_| ())
        .map_err(|source| LogError::File {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_rejected() {
        let options = LogOptions {
            level: "chatty".to_string(),
            ..Default::default()
        };
        assert!(matches!(init(&options), Err(LogError::Level { .. })));
    }

    #[test]
    fn test_clear_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailsift.log");
        fs::write(&path, "old line\n").unwrap();
        clear(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");

        clear(&dir.path().join("missing.log")).unwrap();
    }

    #[test]
    fn test_file_sink_receives_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mailsift.log");
        let options = LogOptions {
            level: "debug".to_string(),
            stderr: false,
            file: Some(path.clone()),
        };
        init(&options).unwrap();
        tracing::info!(filter = "inbox", "[Filter] Started");

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[Filter] Started"));
        assert!(contents.contains("filter=\"inbox\""));
        assert!(matches!(init(&options), Err(LogError::AlreadyInitialized)));
    }
}
