//! Explicit credential resolver.

use async_trait::async_trait;

use crate::Result;
use crate::auth::{Credential, CredentialResolver, Resolution};

/// Resolver with a credential supplied by the embedding program.
pub struct ExplicitResolver {
    credential: Credential,
}

impl ExplicitResolver {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl CredentialResolver for ExplicitResolver {
    fn name(&self) -> &str {
        "explicit"
    }

    async fn resolve(&self) -> Result<Resolution> {
        Ok(Resolution::Resolved(self.credential.clone()))
    }
}
