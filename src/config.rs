use std::path::PathBuf;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "clinrecon";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Storage key holding the serialized case collection.
pub const CASES_STORAGE_KEY: &str = "reconciliation_cases";

/// Quiescence window before an edit is committed to the undo history.
pub const DEFAULT_HISTORY_DEBOUNCE: Duration = Duration::from_millis(500);

/// Environment override for the data directory (tests, portable installs).
pub const DATA_DIR_ENV: &str = "CLINRECON_DATA_DIR";

/// Get the application data directory.
///
/// `$CLINRECON_DATA_DIR` when set, otherwise `<local data dir>/clinrecon`.
/// Falls back to the working directory on platforms without a data dir.
pub fn app_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// SQLite file backing the case store.
pub fn cases_db_path() -> PathBuf {
    app_data_dir().join("cases.db")
}

/// Directory used by the file-backed case store.
pub fn cases_file_dir() -> PathBuf {
    app_data_dir().join("cases")
}

/// Default `EnvFilter` directive when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "clinrecon=info"
}
