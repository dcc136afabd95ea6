//! Credential resolver implementations.

mod chain;
mod config;
mod environment;
mod explicit;
mod keychain;
mod profile;

pub use chain::ChainResolver;
pub use config::ConfigDefaultResolver;
pub use environment::{ENVIRONMENT_PROFILE, EnvironmentResolver};
pub use explicit::ExplicitResolver;
pub use keychain::KeychainDefaultResolver;
pub use profile::ProfileResolver;
