//! Environment variable credential resolver.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::auth::{Credential, CredentialResolver, CredentialSource, PrivateKeySource, Resolution, key};
use crate::config::{EnvVars, env};
use crate::{Error, Result};

/// Name given to credentials resolved from the environment.
pub const ENVIRONMENT_PROFILE: &str = "environment";

/// Resolver for `ASC_KEY_ID`, `ASC_ISSUER_ID` and one private key variable.
///
/// Any partial set is an error rather than a fall-through.
pub struct EnvironmentResolver {
    env: EnvVars,
    guard_only: bool,
}

impl EnvironmentResolver {
    pub fn new(env: EnvVars) -> Self {
        Self {
            env,
            guard_only: false,
        }
    }

    /// Check the overrides without resolving from them.
    ///
    /// Partial or conflicting overrides still fail; a complete set is
    /// not applicable. Placed ahead of a named profile.
    pub fn guard(env: EnvVars) -> Self {
        Self {
            env,
            guard_only: true,
        }
    }

    /// Resolver over the current process environment.
    pub fn from_process() -> Self {
        Self::new(EnvVars::from_process())
    }

    /// Credential from the environment; `None` when no override is set.
    pub fn credential(&self) -> Result<Option<Credential>> {
        if !self.env.has_credential_overrides() {
            return Ok(None);
        }

        let key_id = self.env.get(env::KEY_ID);
        let issuer_id = self.env.get(env::ISSUER_ID);
        let private_key = self.private_key()?;

        let mut missing = Vec::new();
        if key_id.is_none() {
            missing.push(env::KEY_ID);
        }
        if issuer_id.is_none() {
            missing.push(env::ISSUER_ID);
        }
        if private_key.is_none() {
            missing.push("ASC_PRIVATE_KEY_PATH | ASC_PRIVATE_KEY | ASC_PRIVATE_KEY_B64");
        }

        let (Some(key_id), Some(issuer_id), Some(private_key)) = (key_id, issuer_id, private_key)
        else {
            tracing::warn!(missing = ?missing, "Partial credential overrides in environment");
            return Err(Error::IncompleteCredential { missing });
        };

        if let PrivateKeySource::Path(path) = &private_key
            && !path.is_file()
        {
            return Err(Error::invalid_key(format!(
                "{} points at {}, which does not exist",
                env::PRIVATE_KEY_PATH,
                path.display()
            )));
        }

        Ok(Some(
            Credential::new(ENVIRONMENT_PROFILE, key_id, issuer_id, private_key)
                .with_source(CredentialSource::Environment),
        ))
    }

    fn private_key(&self) -> Result<Option<PrivateKeySource>> {
        let set = self.env.private_key_vars();
        if set.len() > 1 {
            return Err(Error::config(format!(
                "conflicting private key variables set: {}; set only one",
                set.join(", ")
            )));
        }

        let Some(var) = set.first() else {
            return Ok(None);
        };
        let value = self.env.get(var).unwrap_or_default();

        let source = match *var {
            env::PRIVATE_KEY_PATH => PrivateKeySource::Path(PathBuf::from(value)),
            env::PRIVATE_KEY => PrivateKeySource::pem(key::normalize_pem(value)),
            _ => PrivateKeySource::Pem(key::decode_base64_key(value)?),
        };
        Ok(Some(source))
    }
}

#[async_trait]
impl CredentialResolver for EnvironmentResolver {
    fn name(&self) -> &str {
        "environment"
    }

    async fn resolve(&self) -> Result<Resolution> {
        if self.guard_only {
            return match self.credential() {
                Err(e @ (Error::IncompleteCredential { .. } | Error::Config(_))) => Err(e),
                Ok(Some(_)) => {
                    tracing::debug!("Complete credential overrides ignored for named profile");
                    Ok(Resolution::NotApplicable)
                }
                _ => Ok(Resolution::NotApplicable),
            };
        }

        Ok(match self.credential()? {
            Some(credential) => Resolution::Resolved(credential),
            None => Resolution::NotApplicable,
        })
    }
}
