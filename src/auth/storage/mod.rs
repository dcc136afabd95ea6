//! Credential storage implementations.

mod file;
mod keychain;

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::{Credential, CredentialSource};
use crate::{Error, Result};

pub use file::{ConfigDocument, ConfigFile, StoredProfile};
pub use keychain::{KeyringStore, SERVICE_NAME};

const INDEX_KEY: &str = "profiles";
const PROFILE_KEY_PREFIX: &str = "profile:";

/// Minimal secret storage used for keychain-backed profiles.
///
/// Production: platform keychain via [`KeyringStore`].
/// Testing and embedding: [`MemoryStore`].
pub trait SecretStore: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; removing a missing key succeeds.
    fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory secret store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    unavailable: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every operation fails, as a locked or absent keychain would.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            entries: Mutex::default(),
            unavailable: Some(reason.into()),
        }
    }

    fn check(&self) -> Result<()> {
        match &self.unavailable {
            Some(reason) => Err(Error::Keychain(reason.clone())),
            None => Ok(()),
        }
    }
}

impl SecretStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// Keychain index entry: profile names and the default.
///
/// Keychains cannot enumerate entries portably, so the names are kept in
/// one well-known entry next to one JSON entry per profile.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeychainIndex {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,
    #[serde(default)]
    pub profiles: Vec<String>,
}

/// Profile operations over a [`SecretStore`].
pub struct KeychainProfiles<'a> {
    store: &'a dyn SecretStore,
}

impl<'a> KeychainProfiles<'a> {
    pub fn new(store: &'a dyn SecretStore) -> Self {
        Self { store }
    }

    pub fn index(&self) -> Result<KeychainIndex> {
        match self.store.get(INDEX_KEY)? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| Error::Keychain(format!("corrupt keychain index: {}", e))),
            None => Ok(KeychainIndex::default()),
        }
    }

    fn save_index(&self, index: &KeychainIndex) -> Result<()> {
        self.store.set(INDEX_KEY, &serde_json::to_string(index)?)
    }

    /// Load one profile; `None` if the keychain has no such entry.
    pub fn load(&self, name: &str) -> Result<Option<Credential>> {
        let index = self.index()?;
        self.load_with_index(name, &index)
    }

    fn load_with_index(&self, name: &str, index: &KeychainIndex) -> Result<Option<Credential>> {
        let Some(raw) = self.store.get(&profile_key(name))? else {
            return Ok(None);
        };

        let mut stored: StoredProfile = serde_json::from_str(&raw).map_err(|e| {
            Error::Keychain(format!("corrupt keychain entry for profile {}: {}", name, e))
        })?;
        stored.name = name.to_string();

        let is_default = index.default_profile.as_deref() == Some(name);
        Ok(Some(stored.to_credential(CredentialSource::Keychain, is_default, None)))
    }

    /// The profile marked default, if any.
    pub fn default_credential(&self) -> Result<Option<Credential>> {
        let index = self.index()?;
        match index.default_profile.as_deref() {
            Some(name) => self.load_with_index(name, &index),
            None => Ok(None),
        }
    }

    /// Every indexed profile that still has an entry.
    pub fn list(&self) -> Result<Vec<Credential>> {
        let index = self.index()?;
        let mut credentials = Vec::new();
        for name in &index.profiles {
            match self.load_with_index(name, &index)? {
                Some(credential) => credentials.push(credential),
                None => tracing::warn!(profile = %name, "Keychain index lists a missing profile"),
            }
        }
        Ok(credentials)
    }

    /// Store a profile with its key material inline.
    pub fn save(&self, profile: &StoredProfile, make_default: bool) -> Result<()> {
        self.store
            .set(&profile_key(&profile.name), &serde_json::to_string(profile)?)?;

        let mut index = self.index()?;
        if !index.profiles.contains(&profile.name) {
            index.profiles.push(profile.name.clone());
            index.profiles.sort();
        }
        if make_default {
            index.default_profile = Some(profile.name.clone());
        }
        self.save_index(&index)
    }

    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut index = self.index()?;
        let known = index.profiles.iter().any(|p| p == name);
        index.profiles.retain(|p| p != name);
        if index.default_profile.as_deref() == Some(name) {
            index.default_profile = None;
        }
        self.store.delete(&profile_key(name))?;
        self.save_index(&index)?;
        Ok(known)
    }
}

fn profile_key(name: &str) -> String {
    format!("{}{}", PROFILE_KEY_PREFIX, name)
}
