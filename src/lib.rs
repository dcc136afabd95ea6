//! # asc-core
//!
//! Transport and trust layer for the App Store Connect API.
//!
//! This crate sits underneath every resource call a CLI or SDK makes:
//! it resolves credentials from competing sources, signs short-lived ES256
//! bearer tokens, dispatches requests with bounded retries, refuses to
//! follow URLs that could leak the bearer token, and audits the on-disk
//! credential state.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use asc_core::{Client, CredentialStore, Page};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), asc_core::Error> {
//!     let store = CredentialStore::from_env()?;
//!     let credential = store.resolve(None).await?;
//!
//!     let client = Client::builder().credential(credential).build()?;
//!     let cancel = CancellationToken::new();
//!
//!     let apps: Page<serde_json::Value> = client.paginate("v1/apps?limit=200", &cancel).await?;
//!     println!("{} apps", apps.data.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Credential audit
//!
//! ```rust,no_run
//! use asc_core::doctor::{Doctor, DoctorOptions};
//!
//! let report = Doctor::from_env().unwrap().run(DoctorOptions { fix: true, ..Default::default() });
//! for line in &report.recommendations {
//!     eprintln!("hint: {line}");
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod auth;
pub mod client;
pub mod config;
pub mod doctor;
pub mod prelude;

pub use auth::{
    ChainResolver, ConfigDefaultResolver, Credential, CredentialListing, CredentialResolver,
    CredentialSource, CredentialStore, CredentialSummary, CredentialsWarning, EnvironmentResolver,
    ExplicitResolver, KeychainDefaultResolver, KeyringStore, MemoryStore, PrivateKeySource,
    ProfileResolver, Resolution, SecretStore, SignedToken, StagedKey, StorageTarget,
    StoredProfile, TokenSigner,
};
pub use client::{
    Accept, ApiError, ApiErrorKind, Client, ClientBuilder, ExponentialBackoff, Page, PageLinks,
    Paginated, PaginationLimits, RateLimitInfo, RateLimitWindow, RedirectGuard, ResponseStream,
    RetryConfig, paginate_all, paginate_all_with_observer,
};
pub use config::{EnvVars, Settings};

use std::time::Duration;

/// Error type for asc-core operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Credential input is present but insufficient (e.g. partial environment overrides).
    #[error("Incomplete credentials: missing {}", missing.join(", "))]
    IncompleteCredential { missing: Vec<&'static str> },

    /// Private key is present but unusable for ES256 signing.
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// No source produced a credential, or a named profile does not exist.
    #[error("Credentials not found: {0}")]
    CredentialNotFound(String),

    /// Platform keychain could not be read or written.
    #[error("Keychain error: {0}")]
    Keychain(String),

    /// A follow URL failed validation; the request was never sent.
    #[error("Refusing to follow {url}: {reason}")]
    SsrfRejected { url: String, reason: String },

    /// Backend returned a non-success response.
    #[error(transparent)]
    Api(#[from] client::ApiError),

    /// Operation exceeded its deadline.
    #[error("Operation timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// Caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Pagination stopped by a loop or page-count guard.
    #[error("Pagination aborted: {0}")]
    Pagination(String),

    /// Network connectivity or request failed.
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// File system operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or conflicting configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token signing failed.
    #[error("Token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Credential resolution or key problems; fatal to the calling operation.
    Credentials,
    /// Follow-URL rejected before any request was issued.
    Security,
    /// Backend answered with an error document.
    Backend,
    /// Network, rate limit, or server errors that may succeed on retry
    Transient,
    /// Deadline or caller cancellation; safe to retry at a higher level.
    Cancellation,
    /// Configuration, parsing, IO
    Internal,
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn invalid_key(message: impl Into<String>) -> Self {
        Error::InvalidPrivateKey(message.into())
    }

    pub fn ssrf(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::SsrfRejected {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::IncompleteCredential { .. }
            | Error::InvalidPrivateKey(_)
            | Error::CredentialNotFound(_)
            | Error::Keychain(_)
            | Error::Signing(_) => ErrorCategory::Credentials,

            Error::SsrfRejected { .. } => ErrorCategory::Security,

            Error::Api(api) if api.is_transient() => ErrorCategory::Transient,
            Error::Api(_) => ErrorCategory::Backend,
            Error::Network(_) => ErrorCategory::Transient,

            Error::Timeout(_) | Error::Cancelled => ErrorCategory::Cancellation,

            Error::Pagination(_) | Error::Json(_) | Error::Io(_) | Error::Config(_) => {
                ErrorCategory::Internal
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// The backend error, if this is one.
    pub fn api_error(&self) -> Option<&client::ApiError> {
        match self {
            Error::Api(api) => Some(api),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.is_api_kind(client::ApiErrorKind::NotFound)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.is_api_kind(client::ApiErrorKind::Unauthorized)
    }

    pub fn is_forbidden(&self) -> bool {
        self.is_api_kind(client::ApiErrorKind::Forbidden)
    }

    pub fn is_bad_request(&self) -> bool {
        self.is_api_kind(client::ApiErrorKind::BadRequest)
    }

    fn is_api_kind(&self, kind: client::ApiErrorKind) -> bool {
        self.api_error().is_some_and(|api| api.kind == kind)
    }

    pub fn status_code(&self) -> Option<u16> {
        self.api_error().map(|api| api.status)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_credential_display() {
        let err = Error::IncompleteCredential {
            missing: vec!["ASC_ISSUER_ID", "private key"],
        };
        let msg = err.to_string();
        assert!(msg.contains("ASC_ISSUER_ID"));
        assert!(msg.contains("private key"));
        assert_eq!(err.category(), ErrorCategory::Credentials);
    }

    #[test]
    fn test_error_is_retryable() {
        let server_error = Error::Api(client::ApiError::from_response(503, b"oops"));
        assert!(server_error.is_retryable());

        let rate_limited = Error::Api(client::ApiError::from_response(429, b""));
        assert!(rate_limited.is_retryable());

        let not_found = Error::Api(client::ApiError::from_response(404, b""));
        assert!(!not_found.is_retryable());
        assert!(not_found.is_not_found());

        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::ssrf("https://evil.example", "cross-origin").is_retryable());
    }

    #[test]
    fn test_ssrf_display() {
        let err = Error::ssrf("https://evil.example/v1/apps", "origin mismatch");
        assert_eq!(
            err.to_string(),
            "Refusing to follow https://evil.example/v1/apps: origin mismatch"
        );
        assert_eq!(err.category(), ErrorCategory::Security);
    }
}
