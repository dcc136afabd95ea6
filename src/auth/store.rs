//! Credential resolution and persistence across sources.

use std::collections::BTreeMap;
use std::sync::Arc;

use secrecy::ExposeSecret;

use super::storage::{ConfigFile, KeychainProfiles, KeyringStore, SecretStore, StoredProfile};
use super::{
    ChainResolver, ConfigDefaultResolver, Credential, CredentialListing, CredentialResolver,
    CredentialSource, CredentialsWarning, EnvironmentResolver, KeychainDefaultResolver,
    ProfileResolver, Resolution,
};
use crate::config::Settings;
use crate::{Error, Result};

/// Where [`CredentialStore::save_profile`] writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageTarget {
    ConfigFile,
    Keychain,
}

/// Resolves the credential to use and manages stored profiles.
///
/// Precedence, highest first:
/// 1. an explicitly named profile (argument, else `ASC_PROFILE`)
/// 2. a complete set of `ASC_*` credential variables
/// 3. the config file's default profile
/// 4. the keychain's default profile
pub struct CredentialStore {
    settings: Settings,
    config: ConfigFile,
    keychain: Option<Arc<dyn SecretStore>>,
}

impl CredentialStore {
    /// Store configured from the process environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(Settings::from_env()?))
    }

    /// Store using the platform keychain unless settings bypass it.
    pub fn new(settings: Settings) -> Self {
        let keychain: Option<Arc<dyn SecretStore>> = if settings.bypass_keychain {
            None
        } else {
            Some(Arc::new(KeyringStore::new()))
        };
        Self {
            config: ConfigFile::new(&settings.config_path),
            settings,
            keychain,
        }
    }

    /// Replace the keychain backend.
    pub fn with_keychain(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.keychain = Some(store);
        self
    }

    pub fn without_keychain(mut self) -> Self {
        self.keychain = None;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config_file(&self) -> &ConfigFile {
        &self.config
    }

    pub fn keychain(&self) -> Option<&Arc<dyn SecretStore>> {
        self.keychain.as_ref()
    }

    /// Resolver chain for `profile`, or for the environment's profile selector.
    ///
    /// A named profile is the only source consulted: asking for a profile
    /// that does not exist never falls back to a default. Partial or
    /// conflicting environment overrides still fail the resolution.
    pub fn chain(&self, profile: Option<&str>) -> ChainResolver {
        let strict = self.settings.strict_auth;
        let named = profile
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .or(self.settings.profile.as_deref());

        if let Some(name) = named {
            let mut resolver = ProfileResolver::new(name, self.config.clone()).strict(strict);
            if let Some(store) = &self.keychain {
                resolver = resolver.keychain(store.clone());
            }
            return ChainResolver::new(vec![])
                .with(EnvironmentResolver::guard(self.settings.env().clone()))
                .with(resolver);
        }

        let mut chain = ChainResolver::new(vec![])
            .with(EnvironmentResolver::new(self.settings.env().clone()))
            .with(ConfigDefaultResolver::new(self.config.clone()));
        if let Some(store) = &self.keychain {
            chain = chain.with(KeychainDefaultResolver::new(store.clone()).strict(strict));
        }
        chain
    }

    /// Resolve the credential for this run.
    pub async fn resolve(&self, profile: Option<&str>) -> Result<Credential> {
        match self.chain(profile).resolve().await? {
            Resolution::Resolved(credential) => Ok(credential),
            Resolution::NotApplicable => Err(Error::CredentialNotFound(
                "no credential source applies".into(),
            )),
        }
    }

    /// Stored profiles from the config file and keychain, merged by name.
    ///
    /// Config file entries win over keychain entries with the same name.
    /// An unavailable keychain becomes a warning, not an error.
    pub fn list_credentials(&self) -> Result<CredentialListing> {
        let document = self.config.load()?;
        let mut merged: BTreeMap<String, Credential> = BTreeMap::new();
        let mut warnings = Vec::new();

        if let Some(store) = &self.keychain {
            match KeychainProfiles::new(store.as_ref()).list() {
                Ok(credentials) => {
                    for credential in credentials {
                        merged.insert(credential.name.clone(), credential);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Keychain unavailable while listing credentials");
                    warnings.push(CredentialsWarning {
                        source: CredentialSource::Keychain,
                        message: e.to_string(),
                    });
                }
            }
        }

        for stored in &document.profiles {
            if merged
                .get(&stored.name)
                .is_some_and(|c| c.source == CredentialSource::ConfigFile)
            {
                continue;
            }
            let credential = stored.to_credential(
                CredentialSource::ConfigFile,
                document.is_default(&stored.name),
                self.config.base_dir(),
            );
            merged.insert(stored.name.clone(), credential);
        }

        // At most one default; the config file's choice wins.
        let config_default = document
            .default_profile
            .as_deref()
            .filter(|name| merged.contains_key(*name));
        let mut seen_default = false;
        let credentials = merged
            .into_values()
            .map(|credential| {
                let is_default = match config_default {
                    Some(name) => credential.name == name,
                    None => credential.is_default && !seen_default,
                };
                seen_default |= is_default;
                credential.as_default(is_default).summary()
            })
            .collect();

        Ok(CredentialListing {
            credentials,
            warnings,
        })
    }

    /// Persist a profile after validating its key.
    pub fn save_profile(
        &self,
        profile: StoredProfile,
        target: StorageTarget,
        make_default: bool,
    ) -> Result<()> {
        if profile.name.trim().is_empty() {
            return Err(Error::config("profile name must not be empty"));
        }

        let credential =
            profile.to_credential(CredentialSource::ConfigFile, make_default, self.config.base_dir());
        let missing = credential.missing_fields();
        if !missing.is_empty() {
            return Err(Error::IncompleteCredential { missing });
        }
        credential.validate_private_key()?;

        match target {
            StorageTarget::ConfigFile => {
                let mut document = self.config.load()?;
                let name = profile.name.clone();
                document.upsert(profile);
                if make_default || document.profiles.len() == 1 {
                    document.default_profile = Some(name.clone());
                }
                self.config.save(&document)?;
                tracing::info!(profile = %name, path = %self.config.path().display(), "Saved profile");
            }
            StorageTarget::Keychain => {
                let store = self.keychain.as_ref().ok_or_else(|| {
                    Error::Keychain("keychain is bypassed for this store".into())
                })?;

                // Keychain entries carry the key inline so they survive the file moving.
                let mut profile = profile;
                if profile.private_key.is_none() {
                    let pem = credential.private_key_pem()?;
                    profile.private_key = Some(pem.expose_secret().to_string());
                    profile.private_key_path = None;
                }
                KeychainProfiles::new(store.as_ref()).save(&profile, make_default)?;
                tracing::info!(profile = %profile.name, store = store.name(), "Saved profile");
            }
        }
        Ok(())
    }

    /// Remove a profile from every store. Returns whether anything was removed.
    pub fn remove_profile(&self, name: &str) -> Result<bool> {
        let mut removed = false;

        let mut document = self.config.load()?;
        if document.remove(name) {
            self.config.save(&document)?;
            removed = true;
        }

        if let Some(store) = &self.keychain {
            match KeychainProfiles::new(store.as_ref()).remove(name) {
                Ok(found) => removed |= found,
                Err(e) if !self.settings.strict_auth && removed => {
                    tracing::warn!(profile = %name, error = %e, "Keychain unavailable during removal");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(removed)
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("config", &self.config.path())
            .field("keychain", &self.keychain.as_ref().map(|s| s.name()))
            .field("strict_auth", &self.settings.strict_auth)
            .finish()
    }
}
