//! Keychain default profile resolver.

use std::sync::Arc;

use async_trait::async_trait;

use super::profile::{require_complete, run_blocking};
use crate::Result;
use crate::auth::storage::{KeychainProfiles, SecretStore};
use crate::auth::{CredentialResolver, Resolution};

/// Resolver for the keychain's default profile.
///
/// Keychain failures are logged and skipped unless strict.
pub struct KeychainDefaultResolver {
    store: Arc<dyn SecretStore>,
    strict: bool,
}

impl KeychainDefaultResolver {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store, strict: false }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

#[async_trait]
impl CredentialResolver for KeychainDefaultResolver {
    fn name(&self) -> &str {
        "keychain"
    }

    async fn resolve(&self) -> Result<Resolution> {
        let store = Arc::clone(&self.store);
        let found =
            run_blocking(move || KeychainProfiles::new(store.as_ref()).default_credential()).await;
        match found {
            Ok(Some(credential)) => require_complete(credential).map(Resolution::Resolved),
            Ok(None) => Ok(Resolution::NotApplicable),
            Err(e) if !self.strict => {
                tracing::warn!(store = self.store.name(), error = %e, "Keychain unavailable; skipping");
                Ok(Resolution::NotApplicable)
            }
            Err(e) => Err(e),
        }
    }
}
