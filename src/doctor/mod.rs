//! Credential state audit.
//!
//! Inspection produces a [`DoctorReport`] without touching disk; the fix
//! pass then applies the permission and orphan-file remediations the
//! report carries. Structural problems such as invalid or missing keys
//! are only ever reported.
//!
//! ```rust,no_run
//! use asc_core::doctor::{Doctor, DoctorOptions};
//!
//! let doctor = Doctor::from_env().unwrap();
//! let report = doctor.run(DoctorOptions::default());
//! println!("{}", serde_json::to_string_pretty(&report).unwrap());
//! ```

mod checks;
mod fix;
mod report;

pub use checks::{ENVIRONMENT, KEYCHAIN, PRIVATE_KEYS, PROFILES, STORAGE, TEMP_FILES};
pub use fix::apply_fixes;
pub use report::{
    CheckStatus, DoctorCheck, DoctorReport, DoctorSection, DoctorSummary, FixAction,
};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::Result;
use crate::auth::storage::{ConfigFile, KeyringStore, SecretStore};
use crate::auth::CredentialStore;
use crate::config::Settings;

/// Staged keys younger than this are assumed to belong to a live run.
pub const DEFAULT_ORPHAN_MIN_AGE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoctorOptions {
    /// Apply permission and orphan-file fixes after inspection.
    pub fix: bool,
    pub orphan_min_age: Duration,
}

impl Default for DoctorOptions {
    fn default() -> Self {
        Self {
            fix: false,
            orphan_min_age: DEFAULT_ORPHAN_MIN_AGE,
        }
    }
}

pub struct Doctor {
    settings: Settings,
    config: ConfigFile,
    keychain: Option<Arc<dyn SecretStore>>,
    temp_dir: PathBuf,
}

impl Doctor {
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(Settings::from_env()?))
    }

    pub fn new(settings: Settings) -> Self {
        let keychain: Option<Arc<dyn SecretStore>> = if settings.bypass_keychain {
            None
        } else {
            Some(Arc::new(KeyringStore::new()))
        };
        Self {
            config: ConfigFile::new(&settings.config_path),
            settings,
            keychain,
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Audit the same sources a credential store resolves from.
    pub fn for_store(store: &CredentialStore) -> Self {
        Self {
            settings: store.settings().clone(),
            config: store.config_file().clone(),
            keychain: store.keychain().cloned(),
            temp_dir: std::env::temp_dir(),
        }
    }

    pub fn with_keychain(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.keychain = Some(store);
        self
    }

    pub fn without_keychain(mut self) -> Self {
        self.keychain = None;
        self
    }

    /// Directory scanned for orphaned staged keys.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Inspect, then fix if asked.
    pub fn run(&self, options: DoctorOptions) -> DoctorReport {
        let mut report = self.inspect(&options);
        if options.fix {
            let applied = apply_fixes(&mut report);
            tracing::debug!(applied, "Doctor fix pass complete");
        }
        report
    }

    /// Findings only; never modifies anything.
    pub fn inspect(&self, options: &DoctorOptions) -> DoctorReport {
        let (storage, document) = checks::storage(&self.config);
        let sections = vec![
            storage,
            checks::profiles(document.as_ref()),
            checks::private_keys(document.as_ref(), self.config.base_dir()),
            checks::environment(self.settings.env()),
            checks::temp_files(&self.temp_dir, options.orphan_min_age, SystemTime::now()),
            checks::keychain(self.keychain.as_deref()),
        ];

        let report = DoctorReport::new(sections);
        tracing::debug!(
            ok = report.summary.ok,
            info = report.summary.info,
            warn = report.summary.warn,
            fail = report.summary.fail,
            "Doctor inspection complete"
        );
        report
    }
}
