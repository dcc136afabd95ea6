//! Credential resolver trait.

use async_trait::async_trait;

use super::Credential;
use crate::Result;

/// Outcome of consulting one credential source.
#[derive(Debug)]
pub enum Resolution {
    /// The source produced a complete credential.
    Resolved(Credential),
    /// The source has nothing to offer; the next source may be consulted.
    NotApplicable,
}

impl Resolution {
    pub fn into_credential(self) -> Option<Credential> {
        match self {
            Resolution::Resolved(credential) => Some(credential),
            Resolution::NotApplicable => None,
        }
    }
}

/// One step in the credential precedence chain.
///
/// Returning an error stops the chain: a source that was configured but
/// is broken must not silently hand over to a lower-priority source.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Resolver name for debugging.
    fn name(&self) -> &str;

    /// Consult this source.
    async fn resolve(&self) -> Result<Resolution>;
}
