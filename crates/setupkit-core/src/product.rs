use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

/// Naming and store locations for the product being installed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProductConfig {
    pub name: String,
    pub alternate_name: Option<String>,
    pub executable: String,
    pub new_executable: String,
    pub client_key: String,
    pub client_state_key: String,
    pub registration_key: String,
    pub system_install: bool,
}

impl Default for ProductConfig {
    fn default() -> Self {
        Self {
            name: "Setupkit App".to_string(),
            alternate_name: None,
            executable: "app".to_string(),
            new_executable: "new_app".to_string(),
            client_key: "Software/Setupkit/Clients/app".to_string(),
            client_state_key: "Software/Setupkit/ClientState/app".to_string(),
            registration_key: "Software/Clients/StartMenuInternet".to_string(),
            system_install: false,
        }
    }
}

impl ProductConfig {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse product config")?;
        if config.name.trim().is_empty() {
            return Err(anyhow!("product name must not be empty"));
        }
        for (field, value) in [
            ("executable", &config.executable),
            ("new_executable", &config.new_executable),
        ] {
            validate_file_name(value).with_context(|| format!("invalid {field}"))?;
        }
        if config.executable == config.new_executable {
            return Err(anyhow!(
                "new_executable must differ from executable ('{}')",
                config.executable
            ));
        }
        for (field, value) in [
            ("client_key", &config.client_key),
            ("client_state_key", &config.client_state_key),
            ("registration_key", &config.registration_key),
        ] {
            if value.trim().trim_matches('/').is_empty() {
                return Err(anyhow!("{field} must not be empty"));
            }
        }
        Ok(config)
    }

    pub fn display_name(&self, alternate: bool) -> &str {
        match (&self.alternate_name, alternate) {
            (Some(name), true) => name,
            _ => &self.name,
        }
    }
}

fn validate_file_name(value: &str) -> anyhow::Result<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("file name must not be empty"));
    }
    if trimmed.contains('/') || trimmed.contains('\\') || trimmed == "." || trimmed == ".." {
        return Err(anyhow!("file name must be a single path component: {value}"));
    }
    Ok(())
}
