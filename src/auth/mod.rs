//! Credential resolution, key handling and token signing.
//!
//! - **Resolvers**: ordered [`CredentialResolver`] strategies combined by
//!   [`ChainResolver`]; [`CredentialStore`] builds the standard chain.
//! - **Storage**: JSON config file and platform keychain profiles.
//! - **Signing**: [`TokenSigner`] issues cached ES256 bearer tokens.

mod credential;
pub mod key;
mod provider;
mod providers;
mod signer;
pub mod storage;
mod store;

pub use credential::{
    Credential, CredentialListing, CredentialSource, CredentialSummary, CredentialsWarning,
    PrivateKeySource,
};
pub use key::StagedKey;
pub use provider::{CredentialResolver, Resolution};
pub use providers::{
    ChainResolver, ConfigDefaultResolver, ENVIRONMENT_PROFILE, EnvironmentResolver,
    ExplicitResolver, KeychainDefaultResolver, ProfileResolver,
};
pub use signer::{
    AUDIENCE, DEFAULT_LIFETIME, DEFAULT_SAFETY_MARGIN, MAX_LIFETIME, SignedToken, TokenSigner,
};
pub use storage::{KeyringStore, MemoryStore, SecretStore, StoredProfile};
pub use store::{CredentialStore, StorageTarget};
