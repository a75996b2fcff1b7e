use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

pub const APP_DIR_NAME: &str = "medassist";
pub const DB_FILE_NAME: &str = "history.sqlite3";
/// Used when the platform has no data directory.
pub const FALLBACK_DB_PATH: &str = "./medassist_history.sqlite3";
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// `<data dir>/medassist/history.sqlite3`, or [`FALLBACK_DB_PATH`].
#[must_use]
pub fn default_db_path() -> PathBuf {
    match dirs::data_dir() {
        Some(dir) => dir.join(APP_DIR_NAME).join(DB_FILE_NAME),
        None => PathBuf::from(FALLBACK_DB_PATH),
    }
}

#[must_use]
pub fn resolve_db_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(default_db_path)
}

/// Creates the database's parent directory when it does not exist yet.
pub fn ensure_db_parent(path: &std::path::Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display())),
        _ => Ok(()),
    }
}

/// `--log` / `MEDASSIST_LOG`, then `RUST_LOG`, then [`DEFAULT_LOG_FILTER`].
#[must_use]
pub fn log_filter(explicit: Option<&str>) -> EnvFilter {
    explicit
        .and_then(|filter| EnvFilter::try_new(filter).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}
