//! Private key loading and validation.
//!
//! App Store Connect issues P-256 keys as PKCS#8 PEM (`AuthKey_<id>.p8`).
//! Anything else is rejected rather than converted.

use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};

use crate::{Error, Result};

pub const STAGED_KEY_PREFIX: &str = "asc-key-";
pub const STAGED_KEY_SUFFIX: &str = ".p8";

const PKCS8_LABEL: &str = "PRIVATE KEY";
// id-ecPublicKey (1.2.840.10045.2.1)
const EC_PUBLIC_KEY_OID: &[u8] = &[0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];
// prime256v1 (1.2.840.10045.3.1.7)
const P256_OID: &[u8] = &[0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];

/// Read a PEM file from disk.
pub fn read_pem_file(path: &Path) -> Result<SecretString> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::invalid_key(format!("cannot read {}: {}", path.display(), e))
    })?;
    Ok(SecretString::from(normalize_pem(&content)))
}

/// Accept PEM text with literal `\n` escapes (common in CI secrets) or a
/// bare base64 body, and return proper PEM.
pub fn normalize_pem(raw: &str) -> String {
    let raw = raw.trim();
    let raw = if !raw.contains('\n') && raw.contains("\\n") {
        raw.replace("\\n", "\n")
    } else {
        raw.to_string()
    };

    if raw.contains("-----BEGIN") {
        let mut pem = raw;
        if !pem.ends_with('\n') {
            pem.push('\n');
        }
        pem
    } else {
        let body: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        wrap_pem(&body)
    }
}

/// Decode `ASC_PRIVATE_KEY_B64`: base64 of either the PEM text or the DER body.
pub fn decode_base64_key(encoded: &str) -> Result<SecretString> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| Error::invalid_key(format!("private key is not valid base64: {}", e)))?;

    match std::str::from_utf8(&bytes) {
        Ok(text) if text.contains("-----BEGIN") => Ok(SecretString::from(normalize_pem(text))),
        _ => Ok(SecretString::from(wrap_pem(&STANDARD.encode(&bytes)))),
    }
}

fn wrap_pem(body: &str) -> String {
    let mut pem = format!("-----BEGIN {}-----\n", PKCS8_LABEL);
    for chunk in body.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {}-----\n", PKCS8_LABEL));
    pem
}

/// Check that `pem` is a PKCS#8 P-256 key that can sign ES256.
pub fn validate_pem(pem: &str) -> Result<()> {
    encoding_key(pem).map(|_| ())
}

/// Validate and parse a key for signing.
pub fn encoding_key(pem: &str) -> Result<EncodingKey> {
    let der = pem_body(pem)?;

    if !contains(&der, EC_PUBLIC_KEY_OID) {
        return Err(Error::invalid_key(
            "not an elliptic-curve key; App Store Connect keys are ECDSA P-256",
        ));
    }
    if !contains(&der, P256_OID) {
        return Err(Error::invalid_key(
            "elliptic-curve key is not on P-256 (prime256v1)",
        ));
    }

    let key = EncodingKey::from_ec_pem(pem.as_bytes())
        .map_err(|e| Error::invalid_key(format!("cannot parse PKCS#8 EC key: {}", e)))?;

    // Parsing is lazy in some backends; a throwaway signature proves the key works.
    let claims = serde_json::json!({ "check": true });
    jsonwebtoken::encode(&Header::new(Algorithm::ES256), &claims, &key)
        .map_err(|e| Error::invalid_key(format!("key cannot sign ES256: {}", e)))?;

    Ok(key)
}

fn pem_body(pem: &str) -> Result<Vec<u8>> {
    let begin = pem
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("-----BEGIN "))
        .ok_or_else(|| Error::invalid_key("no PEM header found"))?;

    let label = begin
        .trim_start_matches("-----BEGIN ")
        .trim_end_matches('-')
        .trim();

    match label {
        PKCS8_LABEL => {}
        "EC PRIVATE KEY" => {
            return Err(Error::invalid_key(
                "SEC1 \"EC PRIVATE KEY\" is not accepted; convert with `openssl pkcs8 -topk8 -nocrypt`",
            ));
        }
        "ENCRYPTED PRIVATE KEY" => {
            return Err(Error::invalid_key("encrypted private keys are not supported"));
        }
        other => {
            return Err(Error::invalid_key(format!(
                "unexpected PEM block \"{}\"; expected \"{}\"",
                other, PKCS8_LABEL
            )));
        }
    }

    let body: String = pem
        .lines()
        .map(str::trim)
        .skip_while(|l| !l.starts_with("-----BEGIN "))
        .skip(1)
        .take_while(|l| !l.starts_with("-----END "))
        .collect();

    STANDARD
        .decode(body.as_bytes())
        .map_err(|e| Error::invalid_key(format!("PEM body is not valid base64: {}", e)))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Whether a file name matches the staged-key pattern.
pub fn is_staged_key_name(name: &str) -> bool {
    name.starts_with(STAGED_KEY_PREFIX) && name.ends_with(STAGED_KEY_SUFFIX)
}

/// Key material written to an owner-only temp file; removed on drop.
#[derive(Debug)]
pub struct StagedKey {
    file: tempfile::NamedTempFile,
}

impl StagedKey {
    /// Stage into the system temp directory.
    pub fn stage(pem: &SecretString) -> Result<Self> {
        Self::stage_in(std::env::temp_dir(), pem)
    }

    pub fn stage_in(dir: impl AsRef<Path>, pem: &SecretString) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix(STAGED_KEY_PREFIX)
            .suffix(STAGED_KEY_SUFFIX)
            .tempfile_in(dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(pem.expose_secret().as_bytes())?;
        file.flush()?;

        tracing::debug!(path = %file.path().display(), "Staged private key");
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Keep the file after drop. Callers become responsible for removal.
    pub fn persist(self) -> Result<PathBuf> {
        let (_, path) = self.file.keep().map_err(|e| Error::Io(e.error))?;
        Ok(path)
    }
}
