//! Follow-URL validation.
//!
//! Every URL the client follows on the server's say-so passes through
//! [`RedirectGuard`] before a request is built.

use url::{Host, Url};

use crate::{Error, Result};

/// Storage domains presigned downloads may point at.
pub const DEFAULT_STORAGE_HOSTS: &[&str] = &[
    "apple.com",
    "mzstatic.com",
    "cdn-apple.com",
    "icloud-content.com",
];

#[derive(Debug, Clone)]
pub struct RedirectGuard {
    api_base: Url,
    storage_hosts: Vec<String>,
    allow_insecure_http: bool,
}

impl RedirectGuard {
    pub fn new(api_base: Url) -> Self {
        Self {
            api_base,
            storage_hosts: DEFAULT_STORAGE_HOSTS.iter().map(|h| h.to_string()).collect(),
            allow_insecure_http: false,
        }
    }

    /// Add a storage domain; subdomains match too.
    pub fn with_storage_host(mut self, host: impl Into<String>) -> Self {
        self.storage_hosts
            .push(host.into().trim_start_matches('.').to_ascii_lowercase());
        self
    }

    /// Accept plain `http` presigned URLs on loopback hosts (local mocks).
    pub fn allow_insecure_http(mut self, allow: bool) -> Self {
        self.allow_insecure_http = allow;
        self
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    /// Validate a pagination link before the bearer token is attached.
    ///
    /// Accepts absolute URLs on the API origin and root-relative paths.
    pub fn validate_next(&self, candidate: &str) -> Result<Url> {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return Err(reject(candidate, "empty URL"));
        }

        let url = match Url::parse(candidate) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase)
                if candidate.starts_with('/') && !candidate.starts_with("//") =>
            {
                self.api_base
                    .join(candidate)
                    .map_err(|e| reject(candidate, &format!("invalid path: {}", e)))?
            }
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                return Err(reject(candidate, "relative URL without a base"));
            }
            Err(e) => return Err(reject(candidate, &format!("unparseable URL: {}", e))),
        };

        reject_userinfo(candidate, &url)?;

        if url.origin() != self.api_base.origin() {
            return Err(reject(
                candidate,
                &format!(
                    "origin {} does not match API origin {}",
                    url.origin().ascii_serialization(),
                    self.api_base.origin().ascii_serialization()
                ),
            ));
        }

        Ok(url)
    }

    /// Validate a presigned download URL. These are fetched without the
    /// `Authorization` header.
    pub fn validate_presigned(&self, candidate: &str) -> Result<Url> {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return Err(reject(candidate, "empty URL"));
        }

        let url = Url::parse(candidate).map_err(|e| match e {
            url::ParseError::RelativeUrlWithoutBase => reject(candidate, "relative URL without a base"),
            e => reject(candidate, &format!("unparseable URL: {}", e)),
        })?;

        reject_userinfo(candidate, &url)?;

        let host = match url.host() {
            Some(Host::Domain(d)) if !d.is_empty() => d.to_ascii_lowercase(),
            Some(Host::Domain(_)) | None => return Err(reject(candidate, "missing host")),
            Some(host) => host.to_string(),
        };

        match url.scheme() {
            "https" => {}
            "http" if self.allow_insecure_http && is_loopback(&url) => {}
            scheme => {
                return Err(reject(
                    candidate,
                    &format!("scheme {} is not allowed; presigned URLs must use https", scheme),
                ));
            }
        }

        let allowed = self
            .storage_hosts
            .iter()
            .any(|allowed| host == *allowed || host.ends_with(&format!(".{}", allowed)));
        if !allowed {
            return Err(reject(
                candidate,
                &format!("host {} is not an allowed storage host", host),
            ));
        }

        Ok(url)
    }
}

fn reject_userinfo(candidate: &str, url: &Url) -> Result<()> {
    if !url.username().is_empty() || url.password().is_some() {
        return Err(reject(candidate, "URL embeds credentials"));
    }
    Ok(())
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        Some(Host::Domain(d)) => d.eq_ignore_ascii_case("localhost"),
        None => false,
    }
}

fn reject(candidate: &str, reason: &str) -> Error {
    // Never echo credentials back into logs or errors.
    let shown = match Url::parse(candidate) {
        Ok(mut url) if !url.username().is_empty() || url.password().is_some() => {
            let _ = url.set_username("");
            let _ = url.set_password(None);
            url.to_string()
        }
        _ => candidate.to_string(),
    };
    tracing::warn!(url = %shown, reason = %reason, "Rejected follow URL");
    Error::ssrf(shown, reason)
}
