use serde::{Deserialize, Serialize};

/// Phase of an install run, recorded for crash forensics only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preparing,
    CreatingVisualManifest,
    Building,
    Executing,
    RollingBack,
    RefreshingPolicy,
    UpdatingChannels,
    CopyingPreferencesFile,
    CreatingShortcuts,
    RegisteringProduct,
    ConfigureAutoLaunch,
    RemovingOldVersions,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::CreatingVisualManifest => "creating_visual_manifest",
            Self::Building => "building",
            Self::Executing => "executing",
            Self::RollingBack => "rolling_back",
            Self::RefreshingPolicy => "refreshing_policy",
            Self::UpdatingChannels => "updating_channels",
            Self::CopyingPreferencesFile => "copying_preferences_file",
            Self::CreatingShortcuts => "creating_shortcuts",
            Self::RegisteringProduct => "registering_product",
            Self::ConfigureAutoLaunch => "configure_auto_launch",
            Self::RemovingOldVersions => "removing_old_versions",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        let stage = match input.trim() {
            "preparing" => Self::Preparing,
            "creating_visual_manifest" => Self::CreatingVisualManifest,
            "building" => Self::Building,
            "executing" => Self::Executing,
            "rolling_back" => Self::RollingBack,
            "refreshing_policy" => Self::RefreshingPolicy,
            "updating_channels" => Self::UpdatingChannels,
            "copying_preferences_file" => Self::CopyingPreferencesFile,
            "creating_shortcuts" => Self::CreatingShortcuts,
            "registering_product" => Self::RegisteringProduct,
            "configure_auto_launch" => Self::ConfigureAutoLaunch,
            "removing_old_versions" => Self::RemovingOldVersions,
            _ => return None,
        };
        Some(stage)
    }
}
