//! Ordered resolver chain.

use async_trait::async_trait;

use crate::auth::{CredentialResolver, Resolution};
use crate::{Error, Result};

/// Tries resolvers in order.
///
/// The first `Resolved` wins and any error stops the chain, so a broken
/// higher-precedence source never falls through to a lower one.
pub struct ChainResolver {
    resolvers: Vec<Box<dyn CredentialResolver>>,
}

impl ChainResolver {
    pub fn new(resolvers: Vec<Box<dyn CredentialResolver>>) -> Self {
        Self { resolvers }
    }

    /// Append a resolver with the lowest precedence so far.
    pub fn with<R: CredentialResolver + 'static>(mut self, resolver: R) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    /// Resolver names in precedence order.
    pub fn names(&self) -> Vec<&str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }
}

#[async_trait]
impl CredentialResolver for ChainResolver {
    fn name(&self) -> &str {
        "chain"
    }

    async fn resolve(&self) -> Result<Resolution> {
        for resolver in &self.resolvers {
            match resolver.resolve().await {
                Ok(Resolution::Resolved(credential)) => {
                    tracing::debug!(
                        resolver = resolver.name(),
                        profile = %credential.name,
                        source = %credential.source,
                        "Credential resolved"
                    );
                    return Ok(Resolution::Resolved(credential));
                }
                Ok(Resolution::NotApplicable) => {
                    tracing::debug!(resolver = resolver.name(), "Resolver not applicable");
                }
                Err(e) => {
                    tracing::debug!(resolver = resolver.name(), error = %e, "Resolver failed");
                    return Err(e);
                }
            }
        }

        Err(Error::CredentialNotFound(format!(
            "no credentials configured (tried: {}); set ASC_KEY_ID, ASC_ISSUER_ID and a private key, or add a profile",
            self.names().join(", ")
        )))
    }
}
