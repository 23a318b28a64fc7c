use setupkit_core::{InstallOutcome, Version};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    Committed,
    Failed,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("staged version {new} is older than installed version {existing}")]
pub struct VersionOrderingViolation {
    pub existing: String,
    pub new: String,
}

pub fn check_version_order(
    existing: Option<&Version>,
    new: &Version,
) -> Result<(), VersionOrderingViolation> {
    match existing {
        Some(existing) if new < existing => Err(VersionOrderingViolation {
            existing: existing.to_string(),
            new: new.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Classifies an install attempt from the versions involved and whether the
/// mutation sequence committed.
///
/// `new_executable_staged` reports whether the replacement executable had to
/// be written under its staging name because the live one was in use. On a
/// failed commit it must be sampled before rollback removes it.
pub fn resolve_outcome(
    existing: Option<&Version>,
    new: &Version,
    commit: CommitStatus,
    new_executable_staged: bool,
) -> InstallOutcome {
    match commit {
        CommitStatus::Failed => match existing {
            Some(existing) if new_executable_staged && existing == new => {
                InstallOutcome::SameVersionRepairFailed
            }
            _ => InstallOutcome::InstallFailed,
        },
        CommitStatus::Committed => {
            let Some(existing) = existing else {
                info!(version = %new, "first install");
                return InstallOutcome::FirstInstallSuccess;
            };
            if let Err(violation) = check_version_order(Some(existing), new) {
                error!(
                    existing = %violation.existing,
                    new = %violation.new,
                    "{violation}"
                );
                return InstallOutcome::InstallFailed;
            }
            if existing == new {
                info!(version = %new, "install repaired");
                InstallOutcome::InstallRepaired
            } else if new_executable_staged {
                info!(existing = %existing, new = %new, "version updated while in use");
                InstallOutcome::InUseUpdated
            } else {
                info!(existing = %existing, new = %new, "version updated");
                InstallOutcome::NewVersionUpdated
            }
        }
    }
}
