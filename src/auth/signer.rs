//! ES256 bearer token signing with a per-credential cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, Header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{Credential, key};
use crate::{Error, Result};

/// Audience App Store Connect expects in every token.
pub const AUDIENCE: &str = "appstoreconnect-v1";
/// Longest lifetime the backend accepts.
pub const MAX_LIFETIME: Duration = Duration::from_secs(20 * 60);
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(10 * 60);
/// Tokens are replaced this long before they expire.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(2 * 60);

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Claims {
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub aud: String,
}

/// A signed bearer token bound to one credential.
#[derive(Clone)]
pub struct SignedToken {
    value: SecretString,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub credential_name: String,
    key_id: String,
    issuer_id: String,
}

impl SignedToken {
    /// Compact JWT for the `Authorization` header.
    pub fn bearer(&self) -> &str {
        self.value.expose_secret()
    }

    /// Valid while `now < expires_at - margin`.
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        chrono::Duration::from_std(margin)
            .ok()
            .and_then(|margin| self.expires_at.checked_sub_signed(margin))
            .is_some_and(|deadline| now < deadline)
    }

    fn matches(&self, credential: &Credential) -> bool {
        self.key_id == credential.key_id && self.issuer_id == credential.issuer_id
    }
}

impl fmt::Debug for SignedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedToken")
            .field("value", &"[redacted]")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("credential_name", &self.credential_name)
            .finish()
    }
}

/// Signs and caches bearer tokens.
///
/// One cached token per credential name. The check-then-sign sequence
/// runs under a single lock, so concurrent dispatches share one token.
pub struct TokenSigner {
    lifetime: Duration,
    safety_margin: Duration,
    cache: Mutex<HashMap<String, SignedToken>>,
    signed: AtomicU64,
}

impl TokenSigner {
    pub fn new() -> Self {
        Self::with_lifetime(DEFAULT_LIFETIME, DEFAULT_SAFETY_MARGIN)
    }

    /// Custom lifetime, clamped to [`MAX_LIFETIME`].
    pub fn with_lifetime(lifetime: Duration, safety_margin: Duration) -> Self {
        if lifetime > MAX_LIFETIME {
            tracing::warn!(
                requested = ?lifetime,
                max = ?MAX_LIFETIME,
                "Token lifetime exceeds backend maximum; clamping"
            );
        }
        Self {
            lifetime: lifetime.min(MAX_LIFETIME),
            safety_margin,
            cache: Mutex::new(HashMap::new()),
            signed: AtomicU64::new(0),
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    /// Return the cached token for `credential`, signing a new one if it
    /// is missing, bound to different key ids, or inside the safety margin.
    pub async fn sign(&self, credential: &Credential) -> Result<SignedToken> {
        let mut cache = self.cache.lock().await;
        let now = Utc::now();

        if let Some(token) = cache.get(&credential.name)
            && token.matches(credential)
            && token.is_valid_at(now, self.safety_margin)
        {
            tracing::trace!(profile = %credential.name, expires_at = %token.expires_at, "Token cache hit");
            return Ok(token.clone());
        }

        let token = self.generate(credential, now)?;
        cache.insert(credential.name.clone(), token.clone());
        Ok(token)
    }

    /// Drop the cached token for `name`, e.g. after a 401.
    pub async fn invalidate(&self, name: &str) {
        self.cache.lock().await.remove(name);
    }

    /// Number of tokens signed so far.
    pub fn tokens_signed(&self) -> u64 {
        self.signed.load(Ordering::Relaxed)
    }

    fn generate(&self, credential: &Credential, now: DateTime<Utc>) -> Result<SignedToken> {
        let missing = credential.missing_fields();
        if !missing.is_empty() {
            return Err(Error::IncompleteCredential { missing });
        }

        let pem = credential.private_key_pem()?;
        let encoding_key = key::encoding_key(pem.expose_secret())?;

        let lifetime = chrono::Duration::from_std(self.lifetime)
            .map_err(|e| Error::config(format!("invalid token lifetime: {}", e)))?;
        let expires_at = now + lifetime;

        let claims = Claims {
            iss: credential.issuer_id.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            aud: AUDIENCE.to_string(),
        };
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(credential.key_id.clone());

        let value = jsonwebtoken::encode(&header, &claims, &encoding_key)?;
        self.signed.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            profile = %credential.name,
            key_id = %credential.key_id,
            expires_at = %expires_at,
            "Signed new bearer token"
        );

        Ok(SignedToken {
            value: SecretString::from(value),
            issued_at: now,
            expires_at,
            credential_name: credential.name.clone(),
            key_id: credential.key_id.clone(),
            issuer_id: credential.issuer_id.clone(),
        })
    }
}

impl Default for TokenSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner")
            .field("lifetime", &self.lifetime)
            .field("safety_margin", &self.safety_margin)
            .field("tokens_signed", &self.tokens_signed())
            .finish()
    }
}
