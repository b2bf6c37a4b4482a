use std::path::{Path, PathBuf};

pub const HOME_ENV: &str = "SHIPYARD_HOME";
pub const HOME_DIR: &str = ".shipyard";
pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const WORK_DIR: &str = "work";

/// `$SHIPYARD_HOME`, else `<user home>/.shipyard`.
pub fn resolve_home<F>(lookup: F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(home) = lookup(HOME_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(home));
    }
    lookup("HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .map(|home| home.join(HOME_DIR))
}

/// [`resolve_home`] over the process environment.
pub fn home_from_env() -> Option<PathBuf> {
    resolve_home(|key| std::env::var(key).ok())
}

pub fn socket_path(home: &Path) -> PathBuf {
    home.join(DAEMON_SOCKET)
}

/// Root of the per-service working copies.
pub fn work_dir(home: &Path) -> PathBuf {
    home.join(WORK_DIR)
}
