//! Runtime settings.
//!
//! ```rust,no_run
//! use asc_core::config::Settings;
//!
//! let settings = Settings::from_env().unwrap();
//! println!("config file: {}", settings.config_path.display());
//! ```

pub mod env;

pub use env::EnvVars;

use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use url::Url;

use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.appstoreconnect.apple.com/";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const CONFIG_DIR: &str = ".asc";
const CONFIG_FILE: &str = "config.json";

/// Settings shared by credential resolution, dispatch and doctor.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path of the JSON profile store.
    pub config_path: PathBuf,
    /// Profile selected through the environment, if any.
    pub profile: Option<String>,
    /// Skip the platform keychain entirely.
    pub bypass_keychain: bool,
    /// Treat keychain failures as fatal during resolution.
    pub strict_auth: bool,
    /// Canonical API origin; pagination links must stay on it.
    pub base_url: Url,
    /// Per-attempt request deadline.
    pub timeout: Duration,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    env: EnvVars,
}

impl Settings {
    /// Settings from the current process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(EnvVars::from_process())
    }

    /// Settings from an explicit environment snapshot.
    pub fn from_vars(vars: EnvVars) -> Result<Self> {
        let config_path = match vars.get(env::CONFIG_PATH) {
            Some(path) => PathBuf::from(path),
            None => default_config_path()?,
        };

        let base_url = match vars.get(env::BASE_URL) {
            Some(raw) => parse_base_url(raw)?,
            None => parse_base_url(DEFAULT_BASE_URL)?,
        };

        let timeout = match vars.get(env::TIMEOUT) {
            Some(raw) => parse_timeout(raw)?,
            None => DEFAULT_TIMEOUT,
        };

        let max_retries = match vars.get(env::MAX_RETRIES) {
            Some(raw) => raw.parse().map_err(|_| {
                Error::config(format!(
                    "{} must be a non-negative integer, got {:?}",
                    env::MAX_RETRIES,
                    raw
                ))
            })?,
            None => DEFAULT_MAX_RETRIES,
        };

        Ok(Self {
            config_path,
            profile: vars.get(env::PROFILE).map(String::from),
            bypass_keychain: vars.flag(env::BYPASS_KEYCHAIN),
            strict_auth: vars.flag(env::STRICT_AUTH),
            base_url,
            timeout,
            max_retries,
            env: vars,
        })
    }

    /// Settings rooted at an explicit config file, ignoring the environment.
    pub fn with_config_path(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            config_path: path.into(),
            profile: None,
            bypass_keychain: false,
            strict_auth: false,
            base_url: parse_base_url(DEFAULT_BASE_URL)?,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            env: EnvVars::default(),
        })
    }

    pub fn env(&self) -> &EnvVars {
        &self.env
    }

    /// Replace the environment snapshot and the flags derived from it.
    pub fn vars(mut self, vars: EnvVars) -> Self {
        self.profile = vars.get(env::PROFILE).map(String::from);
        self.bypass_keychain = vars.flag(env::BYPASS_KEYCHAIN);
        self.strict_auth = vars.flag(env::STRICT_AUTH);
        self.env = vars;
        self
    }

    pub fn bypass_keychain(mut self, bypass: bool) -> Self {
        self.bypass_keychain = bypass;
        self
    }

    pub fn strict_auth(mut self, strict: bool) -> Self {
        self.strict_auth = strict;
        self
    }

    pub fn base_url(mut self, url: Url) -> Self {
        self.base_url = url;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

/// `~/.asc/config.json`
pub fn default_config_path() -> Result<PathBuf> {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(CONFIG_DIR).join(CONFIG_FILE))
        .ok_or_else(|| {
            Error::config(format!(
                "cannot determine home directory; set {}",
                env::CONFIG_PATH
            ))
        })
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)
        .map_err(|e| Error::config(format!("invalid base URL {:?}: {}", raw, e)))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(Error::config(format!("base URL {:?} has no host", raw)));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Bare integers are seconds; otherwise humantime syntax (`30s`, `2m`).
fn parse_timeout(raw: &str) -> Result<Duration> {
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw)
        .map_err(|e| Error::config(format!("invalid {} {:?}: {}", env::TIMEOUT, raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings =
            Settings::from_vars(EnvVars::from_pairs([(env::CONFIG_PATH, "/tmp/asc.json")]))
                .unwrap();
        assert_eq!(settings.config_path, PathBuf::from("/tmp/asc.json"));
        assert_eq!(settings.base_url.as_str(), DEFAULT_BASE_URL);
        assert_eq!(settings.timeout, DEFAULT_TIMEOUT);
        assert_eq!(settings.max_retries, DEFAULT_MAX_RETRIES);
        assert!(!settings.bypass_keychain);
        assert!(settings.profile.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let settings = Settings::from_vars(EnvVars::from_pairs([
            (env::CONFIG_PATH, "/tmp/asc.json"),
            (env::BASE_URL, "http://127.0.0.1:8080/api"),
            (env::TIMEOUT, "2m"),
            (env::MAX_RETRIES, "5"),
            (env::PROFILE, "ci"),
            (env::BYPASS_KEYCHAIN, "true"),
            (env::STRICT_AUTH, "1"),
        ]))
        .unwrap();
        assert_eq!(settings.base_url.as_str(), "http://127.0.0.1:8080/api/");
        assert_eq!(settings.timeout, Duration::from_secs(120));
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.profile.as_deref(), Some("ci"));
        assert!(settings.bypass_keychain);
        assert!(settings.strict_auth);
    }

    #[test]
    fn test_timeout_seconds() {
        assert_eq!(parse_timeout("45").unwrap(), Duration::from_secs(45));
        assert!(parse_timeout("soon").is_err());
    }

    #[test]
    fn test_invalid_retries() {
        let result = Settings::from_vars(EnvVars::from_pairs([
            (env::CONFIG_PATH, "/tmp/asc.json"),
            (env::MAX_RETRIES, "-1"),
        ]));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
