//! Prelude module for convenient imports.
//!
//! # Usage
//!
//! ```rust
//! use asc_core::prelude::*;
//! ```

// Core types
pub use crate::Error;
pub use crate::ErrorCategory;
pub use crate::Result;

// Credentials
pub use crate::auth::{
    Credential, CredentialResolver, CredentialSource, CredentialStore, PrivateKeySource,
    Resolution, SecretStore, StorageTarget, TokenSigner,
};

// Client
pub use crate::client::{Accept, ApiErrorKind, Client, ClientBuilder, Page, Paginated, RetryConfig};

// Configuration
pub use crate::config::{EnvVars, Settings};

// Diagnostics
pub use crate::doctor::{Doctor, DoctorOptions, DoctorReport};

pub use tokio_util::sync::CancellationToken;
