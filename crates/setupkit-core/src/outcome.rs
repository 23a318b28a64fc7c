use serde::{Deserialize, Serialize};

/// Final classification of one install attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InstallOutcome {
    FirstInstallSuccess,
    InstallRepaired,
    NewVersionUpdated,
    InUseUpdated,
    SameVersionRepairFailed,
    InstallFailed,
}

impl InstallOutcome {
    /// True when the installed bits are in place and post-install work should run.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::FirstInstallSuccess
                | Self::InstallRepaired
                | Self::NewVersionUpdated
                | Self::InUseUpdated
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FirstInstallSuccess => "first_install_success",
            Self::InstallRepaired => "install_repaired",
            Self::NewVersionUpdated => "new_version_updated",
            Self::InUseUpdated => "in_use_updated",
            Self::SameVersionRepairFailed => "same_version_repair_failed",
            Self::InstallFailed => "install_failed",
        }
    }
}
