//! Credential types.

use std::fmt;
use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use super::key;
use crate::Result;

/// Where a credential was resolved from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    /// Supplied directly by the embedding program.
    Explicit,
    /// `ASC_KEY_ID` / `ASC_ISSUER_ID` / private key variables.
    Environment,
    /// The JSON profile store.
    ConfigFile,
    /// The platform keychain.
    Keychain,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::Explicit => "explicit",
            CredentialSource::Environment => "env",
            CredentialSource::ConfigFile => "config-file",
            CredentialSource::Keychain => "keychain",
        }
    }
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Private key material, by reference or inline.
#[derive(Clone)]
pub enum PrivateKeySource {
    /// Path to a `.p8` file.
    Path(PathBuf),
    /// PEM text held in memory.
    Pem(SecretString),
}

impl PrivateKeySource {
    pub fn pem(pem: impl Into<String>) -> Self {
        Self::Pem(SecretString::from(pem.into()))
    }

    /// Whether the key can be read at all. Says nothing about its format.
    pub fn is_resolvable(&self) -> bool {
        match self {
            PrivateKeySource::Path(path) => path.is_file(),
            PrivateKeySource::Pem(pem) => !pem.expose_secret().trim().is_empty(),
        }
    }

    /// Load the PEM text.
    pub fn load(&self) -> Result<SecretString> {
        match self {
            PrivateKeySource::Path(path) => key::read_pem_file(path),
            PrivateKeySource::Pem(pem) => Ok(pem.clone()),
        }
    }
}

impl fmt::Debug for PrivateKeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivateKeySource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            PrivateKeySource::Pem(_) => f.write_str("Pem([redacted])"),
        }
    }
}

/// A named App Store Connect API key.
#[derive(Clone, Debug)]
pub struct Credential {
    pub name: String,
    pub key_id: String,
    pub issuer_id: String,
    pub private_key: PrivateKeySource,
    pub source: CredentialSource,
    pub is_default: bool,
}

impl Credential {
    /// Create an explicit credential.
    pub fn new(
        name: impl Into<String>,
        key_id: impl Into<String>,
        issuer_id: impl Into<String>,
        private_key: PrivateKeySource,
    ) -> Self {
        Self {
            name: name.into(),
            key_id: key_id.into(),
            issuer_id: issuer_id.into(),
            private_key,
            source: CredentialSource::Explicit,
            is_default: false,
        }
    }

    pub fn with_source(mut self, source: CredentialSource) -> Self {
        self.source = source;
        self
    }

    pub fn as_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    /// Fields that keep this credential from being usable.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.key_id.trim().is_empty() {
            missing.push("key_id");
        }
        if self.issuer_id.trim().is_empty() {
            missing.push("issuer_id");
        }
        if !self.private_key.is_resolvable() {
            missing.push("private key");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Load the PEM text of the private key.
    pub fn private_key_pem(&self) -> Result<SecretString> {
        self.private_key.load()
    }

    /// Load and structurally validate the private key.
    pub fn validate_private_key(&self) -> Result<()> {
        let pem = self.private_key_pem()?;
        key::validate_pem(pem.expose_secret())
    }

    /// Write the key to a locked-down temporary file for external tools.
    pub fn stage_private_key(&self) -> Result<key::StagedKey> {
        key::StagedKey::stage(&self.private_key_pem()?)
    }

    pub fn summary(&self) -> CredentialSummary {
        CredentialSummary {
            name: self.name.clone(),
            key_id: self.key_id.clone(),
            issuer_id: self.issuer_id.clone(),
            source: self.source,
            is_default: self.is_default,
        }
    }
}

/// Listing entry; carries no key material.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CredentialSummary {
    pub name: String,
    pub key_id: String,
    pub issuer_id: String,
    pub source: CredentialSource,
    pub is_default: bool,
}

/// A source that could not be consulted. Never fatal on its own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CredentialsWarning {
    pub source: CredentialSource,
    pub message: String,
}

impl fmt::Display for CredentialsWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.message)
    }
}

/// Result of listing stored credentials across sources.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CredentialListing {
    pub credentials: Vec<CredentialSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<CredentialsWarning>,
}

impl CredentialListing {
    pub fn default_credential(&self) -> Option<&CredentialSummary> {
        self.credentials.iter().find(|c| c.is_default)
    }
}
