//! Default configuration constants.
//!
//! Callers share these instead of repeating literals.

/// Local config file name, also used under the global config directory.
pub(super) const CONFIG_FILE_NAME: &str = "mapmylearn.toml";
/// Directory under the config root holding the global config and session file.
pub(super) const CONFIG_DIR_NAME: &str = "mapmylearn";
/// Learning-path server API root.
pub(super) const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";
/// Timeout for API requests.
pub(super) const DEFAULT_API_TIMEOUT_SECS: u64 = 30;
/// Minimum wait between proactive refresh timer reschedules.
pub(super) const DEFAULT_MIN_REFRESH_DELAY_SECS: u64 = 10;
/// Delay after the first failed refresh attempt.
pub(super) const DEFAULT_BACKOFF_BASE_SECS: u64 = 1;
/// Poll fallback for the storage watcher in `watch` mode.
pub(super) const DEFAULT_WATCH_POLL_SECS: u64 = 2;
