//! Environment variable snapshot.
//!
//! Variables are captured once and treated as immutable for the rest of
//! the run, so resolution and doctor see the same view.

use std::collections::HashMap;

pub const KEY_ID: &str = "ASC_KEY_ID";
pub const ISSUER_ID: &str = "ASC_ISSUER_ID";
pub const PRIVATE_KEY_PATH: &str = "ASC_PRIVATE_KEY_PATH";
pub const PRIVATE_KEY: &str = "ASC_PRIVATE_KEY";
pub const PRIVATE_KEY_B64: &str = "ASC_PRIVATE_KEY_B64";
pub const PROFILE: &str = "ASC_PROFILE";
pub const BYPASS_KEYCHAIN: &str = "ASC_BYPASS_KEYCHAIN";
pub const STRICT_AUTH: &str = "ASC_STRICT_AUTH";
pub const CONFIG_PATH: &str = "ASC_CONFIG_PATH";
pub const BASE_URL: &str = "ASC_BASE_URL";
pub const TIMEOUT: &str = "ASC_TIMEOUT";
pub const MAX_RETRIES: &str = "ASC_MAX_RETRIES";

/// Variables that carry private key material, in the order they are reported.
pub const PRIVATE_KEY_VARS: &[&str] = &[PRIVATE_KEY_PATH, PRIVATE_KEY, PRIVATE_KEY_B64];

/// Read-only snapshot of the variables this crate consumes.
#[derive(Debug, Clone, Default)]
pub struct EnvVars {
    vars: HashMap<String, String>,
}

impl EnvVars {
    /// Capture the current process environment.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().filter(|(k, _)| k.starts_with("ASC_")).collect(),
        }
    }

    /// Build a snapshot from explicit pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value of `key`, treating blank values as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Boolean flag; `1`, `true`, `yes` and `on` are truthy.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| {
            matches!(
                v.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    /// Private key variables that are currently set.
    pub fn private_key_vars(&self) -> Vec<&'static str> {
        PRIVATE_KEY_VARS
            .iter()
            .copied()
            .filter(|k| self.is_set(k))
            .collect()
    }

    /// Whether any of the credential override variables is set.
    pub fn has_credential_overrides(&self) -> bool {
        self.is_set(KEY_ID) || self.is_set(ISSUER_ID) || !self.private_key_vars().is_empty()
    }
}
