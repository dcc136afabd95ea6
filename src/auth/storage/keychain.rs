//! Platform keychain storage via the `keyring` crate.
//!
//! macOS Keychain, Windows Credential Manager, Linux kernel keyutils.

use keyring::Entry;

use super::SecretStore;
use crate::{Error, Result};

pub const SERVICE_NAME: &str = "asc-core";

/// Keychain-backed secret store.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    /// Use a different keychain service name.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).map_err(|e| {
            Error::Keychain(format!("failed to open keychain entry {}: {}", key, e))
        })
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for KeyringStore {
    fn name(&self) -> &str {
        "keyring"
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        tracing::debug!(service = %self.service, key = %key, "Reading keychain entry");
        match self.entry(key)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::Keychain(format!("failed to read {}: {}", key, e))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        tracing::debug!(service = %self.service, key = %key, "Writing keychain entry");
        self.entry(key)?
            .set_password(value)
            .map_err(|e| Error::Keychain(format!("failed to store {}: {}", key, e)))
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::Keychain(format!("failed to delete {}: {}", key, e))),
        }
    }
}
