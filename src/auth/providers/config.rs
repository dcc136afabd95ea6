//! Config file default profile resolver.

use async_trait::async_trait;

use super::profile::require_complete;
use crate::auth::storage::ConfigFile;
use crate::auth::{CredentialResolver, CredentialSource, Resolution};
use crate::{Error, Result};

/// Resolver for the config file's `default_profile`.
pub struct ConfigDefaultResolver {
    config: ConfigFile,
}

impl ConfigDefaultResolver {
    pub fn new(config: ConfigFile) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CredentialResolver for ConfigDefaultResolver {
    fn name(&self) -> &str {
        "config-file"
    }

    async fn resolve(&self) -> Result<Resolution> {
        let document = self.config.load()?;
        let Some(default) = document.default_profile.as_deref() else {
            return Ok(Resolution::NotApplicable);
        };

        let stored = document.profile(default).ok_or_else(|| {
            Error::CredentialNotFound(format!(
                "default profile {:?} in {} does not exist",
                default,
                self.config.path().display()
            ))
        })?;

        let credential =
            stored.to_credential(CredentialSource::ConfigFile, true, self.config.base_dir());
        require_complete(credential).map(Resolution::Resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::{ConfigDocument, StoredProfile};

    const P256: &str = include_str!("../../../tests/fixtures/AuthKey_TEST256.p8");

    fn save(dir: &std::path::Path, document: &ConfigDocument) -> ConfigFile {
        let file = ConfigFile::new(dir.join("config.json"));
        file.save(document).unwrap();
        file
    }

    #[tokio::test]
    async fn test_no_default() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ConfigDefaultResolver::new(save(dir.path(), &ConfigDocument::default()));
        assert!(matches!(resolver.resolve().await.unwrap(), Resolution::NotApplicable));
    }

    #[tokio::test]
    async fn test_missing_file_not_applicable() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ConfigDefaultResolver::new(ConfigFile::new(dir.path().join("none.json")));
        assert!(matches!(resolver.resolve().await.unwrap(), Resolution::NotApplicable));
    }

    #[tokio::test]
    async fn test_default_profile() {
        let dir = tempfile::tempdir().unwrap();
        let document = ConfigDocument {
            default_profile: Some("main".into()),
            profiles: vec![StoredProfile {
                name: "main".into(),
                key_id: "KEY".into(),
                issuer_id: "issuer".into(),
                private_key_path: None,
                private_key: Some(P256.into()),
            }],
        };
        let resolver = ConfigDefaultResolver::new(save(dir.path(), &document));
        let credential = resolver.resolve().await.unwrap().into_credential().unwrap();
        assert!(credential.is_default);
        assert_eq!(credential.source, CredentialSource::ConfigFile);
    }

    #[tokio::test]
    async fn test_dangling_default() {
        let dir = tempfile::tempdir().unwrap();
        let document = ConfigDocument {
            default_profile: Some("gone".into()),
            profiles: vec![],
        };
        let resolver = ConfigDefaultResolver::new(save(dir.path(), &document));
        assert!(matches!(
            resolver.resolve().await,
            Err(Error::CredentialNotFound(_))
        ));
    }
}
