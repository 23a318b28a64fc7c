use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

/// First-run preferences handed to the installer alongside the payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InstallPreferences {
    pub create_all_shortcuts: bool,
    pub alternate_shortcut_text: bool,
    pub make_default: bool,
    pub make_default_for_user: bool,
    pub auto_launch: bool,
    pub channel: Option<String>,
}

impl InstallPreferences {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let prefs: Self =
            toml::from_str(input).context("failed to parse install preferences")?;
        if let Some(channel) = &prefs.channel {
            validate_channel(channel)?;
        }
        Ok(prefs)
    }
}

fn validate_channel(channel: &str) -> anyhow::Result<()> {
    let trimmed = channel.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("channel must not be empty when set"));
    }
    if trimmed
        .chars()
        .any(|ch| !(ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'))
    {
        return Err(anyhow!("channel contains invalid character(s): {channel}"));
    }
    Ok(())
}
