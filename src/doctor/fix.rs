//! Remediation pass over an inspected report.

use std::io;
use std::sync::Mutex;

use super::report::{CheckStatus, DoctorReport, FixAction};

// One fix pass at a time per process.
static FIX_LOCK: Mutex<()> = Mutex::new(());

/// Apply every pending fix in `report`, relabel fixed checks `ok`, and
/// recompute the summary. Returns the number of fixes applied.
pub fn apply_fixes(report: &mut DoctorReport) -> usize {
    let _guard = FIX_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut applied = 0;

    for check in report.checks_mut() {
        if check.fix_applied {
            continue;
        }
        let Some(action) = check.fix.clone() else {
            continue;
        };

        match apply(&action) {
            Ok(()) => {
                tracing::info!(check = %check.name, action = %action, "Applied doctor fix");
                check.status = CheckStatus::Ok;
                check.fix_applied = true;
                check.message = format!("{} (fixed: {})", check.message, action);
                applied += 1;
            }
            Err(e) => {
                tracing::warn!(check = %check.name, action = %action, error = %e, "Doctor fix failed");
                check.message = format!("{} (fix failed: {})", check.message, e);
            }
        }
    }

    report.finalize();
    applied
}

fn apply(action: &FixAction) -> io::Result<()> {
    match action {
        FixAction::Chmod { path, mode } => chmod(path, *mode),
        FixAction::RemoveFile { path } => match std::fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        },
    }
}

#[cfg(unix)]
fn chmod(path: &std::path::Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn chmod(_path: &std::path::Path, _mode: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "permission bits are not supported on this platform",
    ))
}
