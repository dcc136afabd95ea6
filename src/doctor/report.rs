//! Doctor findings.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Info,
    Warn,
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckStatus::Ok => "ok",
            CheckStatus::Info => "info",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
        })
    }
}

/// A remediation the fix pass may apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FixAction {
    Chmod { path: PathBuf, mode: u32 },
    RemoveFile { path: PathBuf },
}

impl fmt::Display for FixAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixAction::Chmod { path, mode } => write!(f, "chmod {:o} {}", mode, path.display()),
            FixAction::RemoveFile { path } => write!(f, "rm {}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoctorCheck {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    pub fix_applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<FixAction>,
}

impl DoctorCheck {
    fn new(name: impl Into<String>, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            recommendation: None,
            fix_applied: false,
            fix: None,
        }
    }

    pub fn ok(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Ok, message)
    }

    pub fn info(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Info, message)
    }

    pub fn warn(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Warn, message)
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Fail, message)
    }

    pub fn recommend(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }

    pub fn fixable(mut self, fix: FixAction) -> Self {
        self.fix = Some(fix);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoctorSection {
    pub name: String,
    pub checks: Vec<DoctorCheck>,
}

impl DoctorSection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            checks: Vec::new(),
        }
    }

    pub fn push(&mut self, check: DoctorCheck) {
        self.checks.push(check);
    }

    /// Worst status in the section.
    pub fn status(&self) -> CheckStatus {
        self.checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(CheckStatus::Ok)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DoctorSummary {
    pub ok: usize,
    pub info: usize,
    pub warn: usize,
    pub fail: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoctorReport {
    pub sections: Vec<DoctorSection>,
    pub summary: DoctorSummary,
    /// Deduplicated and sorted.
    pub recommendations: Vec<String>,
}

impl DoctorReport {
    pub fn new(sections: Vec<DoctorSection>) -> Self {
        let mut report = Self {
            sections,
            summary: DoctorSummary::default(),
            recommendations: Vec::new(),
        };
        report.finalize();
        report
    }

    /// Recompute counts and recommendations from the checks.
    pub fn finalize(&mut self) {
        let mut summary = DoctorSummary::default();
        let mut recommendations = BTreeSet::new();

        for check in self.checks() {
            match check.status {
                CheckStatus::Ok => summary.ok += 1,
                CheckStatus::Info => summary.info += 1,
                CheckStatus::Warn => summary.warn += 1,
                CheckStatus::Fail => summary.fail += 1,
            }
            if check.status != CheckStatus::Ok
                && let Some(recommendation) = &check.recommendation
            {
                recommendations.insert(recommendation.clone());
            }
        }

        self.summary = summary;
        self.recommendations = recommendations.into_iter().collect();
    }

    pub fn checks(&self) -> impl Iterator<Item = &DoctorCheck> {
        self.sections.iter().flat_map(|s| s.checks.iter())
    }

    pub fn checks_mut(&mut self) -> impl Iterator<Item = &mut DoctorCheck> {
        self.sections.iter_mut().flat_map(|s| s.checks.iter_mut())
    }

    pub fn section(&self, name: &str) -> Option<&DoctorSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn has_failures(&self) -> bool {
        self.summary.fail > 0
    }

    /// Pending fixes the fix pass would apply.
    pub fn planned_fixes(&self) -> Vec<&FixAction> {
        self.checks()
            .filter(|c| !c.fix_applied)
            .filter_map(|c| c.fix.as_ref())
            .collect()
    }
}
