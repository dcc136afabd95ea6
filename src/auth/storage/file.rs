//! JSON profile store on disk.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::auth::{Credential, CredentialSource, PrivateKeySource};
use crate::{Error, Result};

/// One named profile as stored in the config file.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct StoredProfile {
    pub name: String,
    #[serde(default)]
    pub key_id: String,
    #[serde(default)]
    pub issuer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<PathBuf>,
    /// Inline PEM. Discouraged in the config file; kept for keychain entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

impl StoredProfile {
    /// Key path with relative paths anchored at `base_dir`.
    pub fn resolved_key_path(&self, base_dir: Option<&Path>) -> Option<PathBuf> {
        self.private_key_path.as_ref().map(|p| match base_dir {
            Some(dir) if p.is_relative() => dir.join(p),
            _ => p.clone(),
        })
    }

    pub fn to_credential(
        &self,
        source: CredentialSource,
        is_default: bool,
        base_dir: Option<&Path>,
    ) -> Credential {
        let private_key = match (&self.private_key, self.resolved_key_path(base_dir)) {
            (Some(pem), _) => PrivateKeySource::pem(pem.clone()),
            (None, Some(path)) => PrivateKeySource::Path(path),
            (None, None) => PrivateKeySource::pem(String::new()),
        };

        Credential {
            name: self.name.clone(),
            key_id: self.key_id.clone(),
            issuer_id: self.issuer_id.clone(),
            private_key,
            source,
            is_default,
        }
    }
}

impl fmt::Debug for StoredProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredProfile")
            .field("name", &self.name)
            .field("key_id", &self.key_id)
            .field("issuer_id", &self.issuer_id)
            .field("private_key_path", &self.private_key_path)
            .field("private_key", &self.private_key.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Contents of the config file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,
    #[serde(default)]
    pub profiles: Vec<StoredProfile>,
}

impl ConfigDocument {
    /// First profile with `name`. Duplicates are reported by doctor.
    pub fn profile(&self, name: &str) -> Option<&StoredProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    pub fn is_default(&self, name: &str) -> bool {
        self.default_profile.as_deref() == Some(name)
    }

    /// Insert or replace the profile with the same name.
    pub fn upsert(&mut self, profile: StoredProfile) {
        self.profiles.retain(|p| p.name != profile.name);
        self.profiles.push(profile);
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.profiles.len();
        self.profiles.retain(|p| p.name != name);
        if self.is_default(name) {
            self.default_profile = None;
        }
        before != self.profiles.len()
    }
}

/// File system profile storage.
#[derive(Clone, Debug)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory relative key paths are resolved against.
    pub fn base_dir(&self) -> Option<&Path> {
        self.path.parent()
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the document; a missing file is an empty store.
    pub fn load(&self) -> Result<ConfigDocument> {
        if !self.path.exists() {
            return Ok(ConfigDocument::default());
        }

        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(ConfigDocument::default());
        }

        serde_json::from_str(&content).map_err(|e| {
            Error::config(format!(
                "failed to parse config file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Write the document with owner-only permissions.
    pub fn save(&self, document: &ConfigDocument) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
            #[cfg(unix)]
            set_mode(parent, 0o700)?;
        }

        let content = serde_json::to_string_pretty(document)?;
        std::fs::write(&self.path, content)?;
        #[cfg(unix)]
        set_mode(&self.path, 0o600)?;

        tracing::debug!(path = %self.path.display(), profiles = document.profiles.len(), "Saved config file");
        Ok(())
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}
