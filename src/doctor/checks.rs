//! Individual doctor sections. Inspection only; nothing here mutates disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use secrecy::ExposeSecret;

use super::report::{DoctorCheck, DoctorSection, FixAction};
use crate::auth::key::{self, is_staged_key_name};
use crate::auth::storage::{ConfigDocument, ConfigFile, KeychainProfiles, SecretStore};
use crate::auth::EnvironmentResolver;
use crate::config::{EnvVars, env};
use crate::Error;

pub const STORAGE: &str = "storage";
pub const PROFILES: &str = "profiles";
pub const PRIVATE_KEYS: &str = "private keys";
pub const ENVIRONMENT: &str = "environment";
pub const TEMP_FILES: &str = "temp files";
pub const KEYCHAIN: &str = "keychain";

const FILE_MODE: u32 = 0o600;
const DIR_MODE: u32 = 0o700;
const CONFIG_DIR_NAME: &str = ".asc";

/// Permission bits, or `None` where the platform has none to check.
fn mode_of(path: &Path) -> Option<u32> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .ok()
            .map(|m| m.permissions().mode() & 0o777)
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        None
    }
}

/// Check that `path` is not group or world accessible.
fn permission_check(name: &str, path: &Path, wanted: u32) -> DoctorCheck {
    match mode_of(path) {
        Some(mode) if mode & 0o077 != 0 => DoctorCheck::warn(
            name,
            format!(
                "{} has permissions {:03o}; expected {:03o}",
                path.display(),
                mode,
                wanted
            ),
        )
        .recommend(format!("chmod {:o} {}", wanted, path.display()))
        .fixable(FixAction::Chmod {
            path: path.to_path_buf(),
            mode: wanted,
        }),
        Some(mode) => DoctorCheck::ok(name, format!("{} has permissions {:03o}", path.display(), mode)),
        None => DoctorCheck::info(name, format!("{}: permissions not checked on this platform", path.display())),
    }
}

/// Config file presence, permissions and parse. Returns the parsed
/// document when readable.
pub fn storage(config: &ConfigFile) -> (DoctorSection, Option<ConfigDocument>) {
    let mut section = DoctorSection::new(STORAGE);
    let path = config.path();

    if let Some(parent) = path.parent()
        && parent.file_name().is_some_and(|n| n == CONFIG_DIR_NAME)
        && parent.is_dir()
    {
        section.push(permission_check("config directory", parent, DIR_MODE));
    }

    if !path.exists() {
        section.push(DoctorCheck::info(
            "config file",
            format!("{} not found; no stored profiles", path.display()),
        ));
        return (section, Some(ConfigDocument::default()));
    }
    if !path.is_file() {
        section.push(
            DoctorCheck::fail("config file", format!("{} is not a regular file", path.display()))
                .recommend(format!("remove {} and log in again", path.display())),
        );
        return (section, None);
    }

    section.push(permission_check("config file", path, FILE_MODE));

    match config.load() {
        Ok(document) => {
            section.push(DoctorCheck::ok(
                "config contents",
                format!("{} profile(s)", document.profiles.len()),
            ));
            (section, Some(document))
        }
        Err(e) => {
            section.push(
                DoctorCheck::fail("config contents", e.to_string())
                    .recommend(format!("repair or remove {}", path.display())),
            );
            (section, None)
        }
    }
}

/// Completeness, duplicate names and the default pointer.
pub fn profiles(document: Option<&ConfigDocument>) -> DoctorSection {
    let mut section = DoctorSection::new(PROFILES);
    let Some(document) = document else {
        section.push(DoctorCheck::info("profiles", "skipped; config file is unreadable"));
        return section;
    };

    if document.profiles.is_empty() {
        section.push(DoctorCheck::info("profiles", "no profiles in config file"));
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for profile in &document.profiles {
        *counts.entry(profile.name.as_str()).or_default() += 1;
    }

    let mut seen = Vec::new();
    for profile in &document.profiles {
        let name = profile.name.as_str();
        if seen.contains(&name) {
            continue;
        }
        seen.push(name);

        let check_name = format!("profile {}", name);
        if counts[name] > 1 {
            section.push(
                DoctorCheck::fail(&check_name, format!("defined {} times", counts[name]))
                    .recommend(format!("remove duplicate entries for profile {}", name)),
            );
            continue;
        }

        let mut missing = Vec::new();
        if profile.key_id.trim().is_empty() {
            missing.push("key_id");
        }
        if profile.issuer_id.trim().is_empty() {
            missing.push("issuer_id");
        }
        if profile.private_key_path.is_none() && profile.private_key.is_none() {
            missing.push("private key");
        }

        if missing.is_empty() {
            section.push(DoctorCheck::ok(&check_name, "complete"));
        } else {
            section.push(
                DoctorCheck::fail(&check_name, format!("incomplete; missing {}", missing.join(", ")))
                    .recommend(format!("complete or remove profile {}", name)),
            );
        }
    }

    match document.default_profile.as_deref() {
        Some(default) if document.profile(default).is_none() => section.push(
            DoctorCheck::fail(
                "default profile",
                format!("default_profile {:?} names no profile", default),
            )
            .recommend("set default_profile to an existing profile"),
        ),
        Some(default) => section.push(DoctorCheck::ok("default profile", default)),
        None if !document.profiles.is_empty() => {
            section.push(DoctorCheck::info("default profile", "none set"))
        }
        None => {}
    }

    section
}

/// Existence, permissions and format of every referenced key.
pub fn private_keys(document: Option<&ConfigDocument>, base_dir: Option<&Path>) -> DoctorSection {
    let mut section = DoctorSection::new(PRIVATE_KEYS);
    let Some(document) = document else {
        section.push(DoctorCheck::info("private keys", "skipped; config file is unreadable"));
        return section;
    };

    let mut checked = 0;
    let mut seen: Vec<PathBuf> = Vec::new();
    for profile in &document.profiles {
        let name = format!("key for {}", profile.name);

        if let Some(pem) = &profile.private_key {
            checked += 1;
            let check = match key::validate_pem(&key::normalize_pem(pem)) {
                Ok(()) => DoctorCheck::warn(&name, "private key is stored inline in the config file")
                    .recommend("move inline keys to a .p8 file and reference it with private_key_path"),
                Err(e) => DoctorCheck::fail(&name, e.to_string())
                    .recommend(format!("replace the private key of profile {}", profile.name)),
            };
            section.push(check);
            continue;
        }

        let Some(path) = profile.resolved_key_path(base_dir) else {
            continue;
        };
        if seen.contains(&path) {
            continue;
        }
        seen.push(path.clone());
        checked += 1;

        if !path.is_file() {
            section.push(
                DoctorCheck::fail(&name, format!("{} does not exist", path.display())).recommend(
                    format!("restore {} or update profile {}", path.display(), profile.name),
                ),
            );
            continue;
        }

        section.push(key_format_check(&name, &path));
        section.push(permission_check(&format!("{} permissions", name), &path, FILE_MODE));
    }

    if checked == 0 {
        section.push(DoctorCheck::info("private keys", "no private keys referenced"));
    }
    section
}

fn key_format_check(name: &str, path: &Path) -> DoctorCheck {
    match key::read_pem_file(path).and_then(|pem| key::validate_pem(pem.expose_secret())) {
        Ok(()) => DoctorCheck::ok(name, format!("{} is a valid P-256 key", path.display())),
        Err(e) => DoctorCheck::fail(name, format!("{}: {}", path.display(), e))
            .recommend("download a fresh .p8 key from App Store Connect"),
    }
}

/// Partial or conflicting credential overrides.
pub fn environment(vars: &EnvVars) -> DoctorSection {
    let mut section = DoctorSection::new(ENVIRONMENT);

    let check = match EnvironmentResolver::new(vars.clone()).credential() {
        Ok(None) => DoctorCheck::info("credential overrides", "none set"),
        Ok(Some(credential)) => match credential.validate_private_key() {
            Ok(()) => DoctorCheck::ok(
                "credential overrides",
                format!("complete overrides for key {}", credential.key_id),
            ),
            Err(e) => DoctorCheck::fail("credential overrides", e.to_string())
                .recommend("fix the private key supplied through the environment"),
        },
        Err(Error::IncompleteCredential { missing }) => DoctorCheck::fail(
            "credential overrides",
            format!("partial overrides; missing {}", missing.join(", ")),
        )
        .recommend(format!(
            "set {}, {} and one private key variable together, or unset all of them",
            env::KEY_ID,
            env::ISSUER_ID
        )),
        Err(Error::Config(message)) => DoctorCheck::fail("credential overrides", message).recommend(
            format!(
                "set only one of {}, {}, {}",
                env::PRIVATE_KEY_PATH,
                env::PRIVATE_KEY,
                env::PRIVATE_KEY_B64
            ),
        ),
        Err(e) => DoctorCheck::fail("credential overrides", e.to_string())
            .recommend("fix the private key supplied through the environment"),
    };
    section.push(check);

    if let Some(path) = vars.get(env::PRIVATE_KEY_PATH).map(PathBuf::from)
        && path.is_file()
    {
        section.push(permission_check(
            &format!("{} permissions", env::PRIVATE_KEY_PATH),
            &path,
            FILE_MODE,
        ));
    }

    if let Some(profile) = vars.get(env::PROFILE) {
        let mut message = format!("{} selects profile {}", env::PROFILE, profile);
        if vars.has_credential_overrides() {
            message.push_str("; complete credential overrides are ignored");
        }
        section.push(DoctorCheck::info("profile selector", message));
    }

    section
}

/// Staged key files left behind by earlier runs.
pub fn temp_files(dir: &Path, min_age: Duration, now: SystemTime) -> DoctorSection {
    let mut section = DoctorSection::new(TEMP_FILES);

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            section.push(DoctorCheck::warn(
                "temp directory",
                format!("cannot scan {}: {}", dir.display(), e),
            ));
            return section;
        }
    };

    let mut found = 0;
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        if !is_staged_key_name(&file_name.to_string_lossy()) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        found += 1;

        let path = entry.path();
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or(Duration::ZERO);
        let shown_age = humantime::format_duration(Duration::from_secs(age.as_secs()));

        if age >= min_age {
            section.push(
                DoctorCheck::warn(
                    "orphaned key file",
                    format!("{} left behind {} ago", path.display(), shown_age),
                )
                .recommend("delete orphaned asc-key-*.p8 files from the temp directory")
                .fixable(FixAction::RemoveFile { path }),
            );
        } else {
            section.push(DoctorCheck::info(
                "staged key file",
                format!("{} is {} old and may belong to a running process", path.display(), shown_age),
            ));
        }
    }

    if found == 0 {
        section.push(DoctorCheck::ok(
            "orphaned key files",
            format!("none in {}", dir.display()),
        ));
    }
    section
}

/// Keychain availability and the completeness of its profiles.
pub fn keychain(store: Option<&dyn SecretStore>) -> DoctorSection {
    let mut section = DoctorSection::new(KEYCHAIN);
    let Some(store) = store else {
        section.push(DoctorCheck::info("keychain", "bypassed"));
        return section;
    };

    match KeychainProfiles::new(store).list() {
        Ok(credentials) => {
            section.push(DoctorCheck::ok(
                "keychain",
                format!("{} available; {} profile(s)", store.name(), credentials.len()),
            ));
            for credential in credentials {
                let missing = credential.missing_fields();
                if !missing.is_empty() {
                    section.push(
                        DoctorCheck::warn(
                            format!("profile {}", credential.name),
                            format!("incomplete; missing {}", missing.join(", ")),
                        )
                        .recommend(format!("log in again to repair keychain profile {}", credential.name)),
                    );
                } else if let Err(e) = credential.validate_private_key() {
                    section.push(
                        DoctorCheck::fail(format!("profile {}", credential.name), e.to_string())
                            .recommend(format!("log in again to repair keychain profile {}", credential.name)),
                    );
                }
            }
        }
        Err(e) => section.push(
            DoctorCheck::warn("keychain", format!("unavailable: {}", e)).recommend(format!(
                "set {}=1 if this machine has no usable keychain",
                env::BYPASS_KEYCHAIN
            )),
        ),
    }

    section
}
