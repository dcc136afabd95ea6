//! Named profile resolver.

use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::storage::{ConfigFile, KeychainProfiles, SecretStore};
use crate::auth::{Credential, CredentialResolver, CredentialSource, Resolution};
use crate::{Error, Result};

/// Resolver for a profile requested by name.
///
/// Looks in the config file first, then the keychain. A name that matches
/// nothing is an error, never a fall-through.
pub struct ProfileResolver {
    name: String,
    config: ConfigFile,
    keychain: Option<Arc<dyn SecretStore>>,
    strict: bool,
}

impl ProfileResolver {
    pub fn new(name: impl Into<String>, config: ConfigFile) -> Self {
        Self {
            name: name.into(),
            config,
            keychain: None,
            strict: false,
        }
    }

    pub fn keychain(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.keychain = Some(store);
        self
    }

    /// Make keychain failures fatal.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    fn from_config(&self) -> Result<Option<Credential>> {
        let document = self.config.load()?;
        Ok(document.profile(&self.name).map(|stored| {
            stored.to_credential(
                CredentialSource::ConfigFile,
                document.is_default(&self.name),
                self.config.base_dir(),
            )
        }))
    }

    async fn from_keychain(&self) -> Result<Option<Credential>> {
        let Some(store) = &self.keychain else {
            return Ok(None);
        };
        let store = Arc::clone(store);
        let name = self.name.clone();
        let found = run_blocking(move || KeychainProfiles::new(store.as_ref()).load(&name)).await;
        match found {
            Ok(found) => Ok(found),
            Err(e) if !self.strict => {
                tracing::warn!(profile = %self.name, error = %e, "Keychain unavailable; skipping");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl CredentialResolver for ProfileResolver {
    fn name(&self) -> &str {
        "profile"
    }

    async fn resolve(&self) -> Result<Resolution> {
        let credential = match self.from_config()? {
            Some(credential) => credential,
            None => self.from_keychain().await?.ok_or_else(|| {
                Error::CredentialNotFound(format!("profile {:?} does not exist", self.name))
            })?,
        };

        require_complete(credential).map(Resolution::Resolved)
    }
}

/// Run a keychain call off the async workers; platform keychains may
/// block on an unlock prompt.
pub(crate) async fn run_blocking<T, F>(call: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .unwrap_or_else(|e| Err(Error::Keychain(format!("keychain task failed: {}", e))))
}

/// Reject a stored profile that cannot sign.
pub(crate) fn require_complete(credential: Credential) -> Result<Credential> {
    let missing = credential.missing_fields();
    if missing.is_empty() {
        Ok(credential)
    } else {
        tracing::warn!(profile = %credential.name, missing = ?missing, "Stored profile is incomplete");
        Err(Error::IncompleteCredential { missing })
    }
}
