//! Environment knobs consumed by the runtime. All timeouts are in
//! milliseconds.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

pub const OAUTH_TIMEOUT_ENV: &str = "MCPORTER_OAUTH_TIMEOUT_MS";
pub const OAUTH_TIMEOUT_ALIAS_ENV: &str = "MCPORTER_OAUTH_TIMEOUT";
pub const LIST_TIMEOUT_ENV: &str = "MCPORTER_LIST_TIMEOUT";
pub const CALL_TIMEOUT_ENV: &str = "MCPORTER_CALL_TIMEOUT";
pub const NO_FORCE_EXIT_ENV: &str = "MCPORTER_NO_FORCE_EXIT";

pub const DEFAULT_OAUTH_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

fn duration_from_env(names: &[&str], default: Duration) -> Duration {
    for name in names {
        let Ok(raw) = std::env::var(name) else {
            continue;
        };
        match raw.trim().parse::<u64>() {
            Ok(ms) if ms > 0 => return Duration::from_millis(ms),
            _ => {
                warn!("ignoring {name}={raw}: expected a positive integer of milliseconds");
            }
        }
    }
    default
}

pub fn oauth_timeout() -> Duration {
    duration_from_env(
        &[OAUTH_TIMEOUT_ENV, OAUTH_TIMEOUT_ALIAS_ENV],
        DEFAULT_OAUTH_TIMEOUT,
    )
}

pub fn list_timeout() -> Duration {
    duration_from_env(&[LIST_TIMEOUT_ENV], DEFAULT_LIST_TIMEOUT)
}

pub fn call_timeout() -> Duration {
    duration_from_env(&[CALL_TIMEOUT_ENV], DEFAULT_CALL_TIMEOUT)
}

/// Lingering keep-alive children can hold the process open after the CLI
/// is done; by default it exits hard once its work is finished.
pub fn no_force_exit() -> bool {
    std::env::var(NO_FORCE_EXIT_ENV).is_ok_and(|raw| {
        let trimmed = raw.trim();
        !trimmed.is_empty() && trimmed != "0" && trimmed != "false"
    })
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    let home = std::env::var_os("USERPROFILE");
    #[cfg(not(windows))]
    let home = std::env::var_os("HOME");
    home.map(PathBuf::from)
}

/// Where OAuth artifacts land when a definition does not pin a directory.
pub fn default_token_cache_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcporter")
        .join("tokens")
}
