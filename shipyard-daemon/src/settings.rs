//! Startup configuration, read once from the environment.
//!
//! Every required value is checked before the scheduler starts, so a daemon
//! with missing credentials exits immediately instead of failing its first
//! deploy.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{config_err, DaemonError};
use crate::paths::{resolve_home, socket_path, work_dir, HOME_ENV};

pub const GITHUB_ORG: &str = "SHIPYARD_GITHUB_ORG";
pub const GITHUB_API: &str = "SHIPYARD_GITHUB_API";
pub const GITHUB_TOKEN: &str = "SHIPYARD_GITHUB_TOKEN";
pub const REGISTRY_HOST: &str = "SHIPYARD_REGISTRY_HOST";
pub const REGISTRY_NAMESPACE: &str = "SHIPYARD_REGISTRY_NAMESPACE";
pub const REGISTRY_USER: &str = "SHIPYARD_REGISTRY_USER";
pub const REGISTRY_PASSWORD: &str = "SHIPYARD_REGISTRY_PASSWORD";
pub const PASSWORD_FILE: &str = "DOCKER_PASSWORD_FILE";
pub const ROUTES_URL: &str = "SHIPYARD_ROUTES_URL";
pub const ROUTES_HOST: &str = "AMBASSADOR_SERVICE_HOST";
pub const ROUTES_PORT: &str = "AMBASSADOR_SERVICE_PORT";
pub const WORKERS: &str = "SHIPYARD_WORKERS";
pub const COMMAND_TIMEOUT: &str = "SHIPYARD_COMMAND_TIMEOUT";
pub const HTTP_TIMEOUT: &str = "SHIPYARD_HTTP_TIMEOUT";
pub const SYNC_INTERVAL: &str = "SHIPYARD_SYNC_INTERVAL";
/// `json` switches daemon logs to one JSON object per line.
pub const LOG_FORMAT: &str = "SHIPYARD_LOG_FORMAT";

pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";
pub const DEFAULT_REGISTRY_HOST: &str = "gcr.io";
pub const DEFAULT_REGISTRY_USER: &str = "_json_key";
pub const DEFAULT_PASSWORD_FILE: &str = "/etc/secrets/docker_password";
pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct Settings {
    pub github_org: String,
    pub github_api: String,
    pub github_token: Option<String>,
    pub registry_host: String,
    pub registry_namespace: String,
    pub registry_user: String,
    pub registry_password: String,
    pub routes_url: String,
    pub workers: usize,
    pub command_timeout: Duration,
    pub http_timeout: Duration,
    /// `None` disables the periodic sync timer.
    pub sync_interval: Option<Duration>,
    pub home: PathBuf,
}

impl Settings {
    pub fn from_env() -> Result<Self, DaemonError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DaemonError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| get(key).ok_or_else(|| config_err(key, "must be set"));

        let github_org = require(GITHUB_ORG)?;
        let registry_namespace = require(REGISTRY_NAMESPACE)?;
        let registry_password = match get(REGISTRY_PASSWORD) {
            Some(password) => password,
            None => {
                let file = get(PASSWORD_FILE).unwrap_or_else(|| DEFAULT_PASSWORD_FILE.to_string());
                read_password_file(Path::new(&file))?
            }
        };
        let routes_url = match get(ROUTES_URL) {
            Some(url) => url,
            None => match (get(ROUTES_HOST), get(ROUTES_PORT)) {
                (Some(host), Some(port)) => format!("http://{host}:{port}"),
                _ => {
                    return Err(config_err(
                        ROUTES_URL,
                        format!("must be set, or both {ROUTES_HOST} and {ROUTES_PORT}"),
                    ))
                }
            },
        };

        let workers = parse_or(&get, WORKERS, DEFAULT_WORKERS)?;
        if workers == 0 {
            return Err(config_err(WORKERS, "must be at least 1"));
        }
        let command_timeout = parse_or(&get, COMMAND_TIMEOUT, DEFAULT_COMMAND_TIMEOUT_SECS)?;
        let http_timeout = parse_or(&get, HTTP_TIMEOUT, DEFAULT_HTTP_TIMEOUT_SECS)?;
        let sync_interval = parse_or(&get, SYNC_INTERVAL, 0u64)?;

        let home = resolve_home(&lookup)
            .ok_or_else(|| config_err(HOME_ENV, "not set and no home directory found"))?;

        Ok(Self {
            github_org,
            github_api: get(GITHUB_API).unwrap_or_else(|| DEFAULT_GITHUB_API.to_string()),
            github_token: get(GITHUB_TOKEN),
            registry_host: get(REGISTRY_HOST).unwrap_or_else(|| DEFAULT_REGISTRY_HOST.to_string()),
            registry_namespace,
            registry_user: get(REGISTRY_USER).unwrap_or_else(|| DEFAULT_REGISTRY_USER.to_string()),
            registry_password,
            routes_url,
            workers,
            command_timeout: Duration::from_secs(command_timeout),
            http_timeout: Duration::from_secs(http_timeout),
            sync_interval: (sync_interval > 0).then(|| Duration::from_secs(sync_interval)),
            home,
        })
    }

    pub fn socket_path(&self) -> PathBuf {
        socket_path(&self.home)
    }

    pub fn work_dir(&self) -> PathBuf {
        work_dir(&self.home)
    }
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> Result<T, DaemonError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|err| config_err(key, format!("invalid value '{raw}': {err}"))),
    }
}

fn read_password_file(path: &Path) -> Result<String, DaemonError> {
    let contents = std::fs::read_to_string(path).map_err(|err| {
        config_err(
            REGISTRY_PASSWORD,
            format!("not set and {} unreadable: {err}", path.display()),
        )
    })?;
    let password = contents.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(config_err(
            REGISTRY_PASSWORD,
            format!("not set and {} is empty", path.display()),
        ));
    }
    Ok(password)
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("github_org", &self.github_org)
            .field("github_api", &self.github_api)
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .field("registry_host", &self.registry_host)
            .field("registry_namespace", &self.registry_namespace)
            .field("registry_user", &self.registry_user)
            .field("registry_password", &"<redacted>")
            .field("routes_url", &self.routes_url)
            .field("workers", &self.workers)
            .field("command_timeout", &self.command_timeout)
            .field("http_timeout", &self.http_timeout)
            .field("sync_interval", &self.sync_interval)
            .field("home", &self.home)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn base() -> HashMap<&'static str, String> {
        HashMap::from([
            (GITHUB_ORG, "acme".to_string()),
            (REGISTRY_NAMESPACE, "sandbox".to_string()),
            (REGISTRY_PASSWORD, "hunter2".to_string()),
            (ROUTES_URL, "http://routes:8877".to_string()),
            (HOME_ENV, "/srv/shipyard".to_string()),
        ])
    }

    fn load(env: &HashMap<&'static str, String>) -> Result<Settings, DaemonError> {
        Settings::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let settings = load(&base()).expect("settings");
        assert_eq!(settings.github_api, DEFAULT_GITHUB_API);
        assert_eq!(settings.registry_host, "gcr.io");
        assert_eq!(settings.registry_user, "_json_key");
        assert_eq!(settings.workers, 10);
        assert_eq!(settings.command_timeout, Duration::from_secs(900));
        assert_eq!(settings.http_timeout, Duration::from_secs(30));
        assert_eq!(settings.sync_interval, None);
        assert_eq!(settings.work_dir(), PathBuf::from("/srv/shipyard/work"));
    }

    #[rstest]
    #[case(GITHUB_ORG)]
    #[case(REGISTRY_NAMESPACE)]
    #[case(ROUTES_URL)]
    fn missing_required_value_names_the_variable(#[case] var: &str) {
        let mut env = base();
        env.remove(var);
        let err = load(&env).unwrap_err();
        assert!(matches!(err, DaemonError::Config { var: ref v, .. } if v == var), "{err}");
        assert!(err.to_string().contains(var));
    }

    #[test]
    fn missing_password_and_password_file_is_a_config_error() {
        let mut env = base();
        env.remove(REGISTRY_PASSWORD);
        env.insert(PASSWORD_FILE, "/definitely/not/here".to_string());
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains(REGISTRY_PASSWORD));
        assert!(err.to_string().contains("/definitely/not/here"));
    }

    #[test]
    fn password_is_read_from_file() {
        let dir = tempfile::TempDir::new().expect("dir");
        let file = dir.path().join("docker_password");
        std::fs::write(&file, "{\"type\": \"service_account\"}\n").expect("write");

        let mut env = base();
        env.remove(REGISTRY_PASSWORD);
        env.insert(PASSWORD_FILE, file.display().to_string());
        let settings = load(&env).expect("settings");
        assert_eq!(settings.registry_password, "{\"type\": \"service_account\"}");
    }

    #[test]
    fn routes_url_from_service_host_and_port() {
        let mut env = base();
        env.remove(ROUTES_URL);
        env.insert(ROUTES_HOST, "10.0.0.7".to_string());
        env.insert(ROUTES_PORT, "80".to_string());
        assert_eq!(load(&env).expect("settings").routes_url, "http://10.0.0.7:80");
    }

    #[rstest]
    #[case(WORKERS, "many")]
    #[case(WORKERS, "0")]
    #[case(COMMAND_TIMEOUT, "-5")]
    fn invalid_numbers_are_rejected(#[case] var: &'static str, #[case] value: &str) {
        let mut env = base();
        env.insert(var, value.to_string());
        assert!(matches!(load(&env), Err(DaemonError::Config { .. })));
    }

    #[test]
    fn sync_interval_enables_timer() {
        let mut env = base();
        env.insert(SYNC_INTERVAL, "300".to_string());
        assert_eq!(
            load(&env).expect("settings").sync_interval,
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut env = base();
        env.insert(GITHUB_TOKEN, "ghp_secret".to_string());
        let rendered = format!("{:?}", load(&env).expect("settings"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("ghp_secret"));
    }
}
