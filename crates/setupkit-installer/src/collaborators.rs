use anyhow::{anyhow, Context, Result};
use setupkit_core::{ProductConfig, Version};
use setupkit_workitems::fs_utils::{copy_path, path_exists, remove_path};
use setupkit_workitems::{KeyValue, RegistryStore};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::shortcuts::{
    launcher_file_name, normalize_launcher_token, render_launcher, PlannedShortcut,
    ShortcutLevel, ShortcutLocation, ShortcutOperation, ShortcutProperties,
};
use crate::InstallLayout;

pub const CHANNEL_VALUE: &str = "ap";
pub const DEFAULT_CLIENT_VALUE: &str = "default";

/// Side effects an install performs after its mutation sequence commits.
///
/// None of these are transactional. Callers treat every error as a logged,
/// recorded step failure.
pub trait Collaborators {
    fn refresh_elevation_policy(&self) -> Result<()>;

    fn update_channels(&self, channel: Option<&str>) -> Result<()>;

    fn copy_first_run_preferences(&self, prefs_path: &Path) -> Result<()>;

    fn cleanup_legacy_shortcuts(&self) -> Result<()>;

    /// Returns false when a replace-only operation found nothing to replace.
    fn create_or_update_shortcut(&self, shortcut: &PlannedShortcut) -> Result<bool>;

    fn register_product(&self, make_default: bool) -> Result<()>;

    fn enable_auto_launch(&self) -> Result<()>;

    /// Removes version directories older than `new_version`, sparing
    /// `existing_version` which may still be running.
    fn remove_old_versions(
        &self,
        new_version: &Version,
        existing_version: Option<&Version>,
    ) -> Result<Vec<PathBuf>>;
}

/// Collaborators backed by the install layout: launcher files under the
/// state root and registration values in the key store.
#[derive(Debug, Clone)]
pub struct LocalCollaborators {
    layout: InstallLayout,
    product: ProductConfig,
}

impl LocalCollaborators {
    pub fn new(layout: InstallLayout, product: ProductConfig) -> Self {
        Self { layout, product }
    }

    pub fn shortcut_path(
        &self,
        level: ShortcutLevel,
        location: ShortcutLocation,
        name: &str,
    ) -> PathBuf {
        self.layout
            .shortcut_dir(level, location)
            .join(launcher_file_name(name))
    }

    pub fn legacy_uninstall_shortcut_path(&self) -> PathBuf {
        let name = format!("Uninstall {}", self.product.name);
        self.shortcut_path(
            ShortcutLevel::for_product(&self.product),
            ShortcutLocation::StartMenu,
            &name,
        )
    }

    pub fn auto_launch_path(&self) -> PathBuf {
        self.layout
            .autostart_dir()
            .join(launcher_file_name(&self.product.name))
    }

    pub fn registration_key(&self) -> String {
        format!(
            "{}/{}",
            self.product
                .registration_key
                .trim_end_matches(|ch: char| ch == '/' || ch == '\\'),
            normalize_launcher_token(&self.product.name)
        )
    }
}

impl Collaborators for LocalCollaborators {
    fn refresh_elevation_policy(&self) -> Result<()> {
        debug!("no elevation policy to refresh on this platform");
        Ok(())
    }

    fn update_channels(&self, channel: Option<&str>) -> Result<()> {
        let registry = self.layout.registry();
        let key = &self.product.client_state_key;
        match channel {
            Some(channel) => {
                ensure_key(&registry, key)?;
                registry
                    .set_value(key, CHANNEL_VALUE, KeyValue::from(channel))
                    .with_context(|| format!("failed to write channel under {key}"))?;
                debug!(channel, "updated channel");
            }
            None => {
                registry
                    .delete_value(key, CHANNEL_VALUE)
                    .with_context(|| format!("failed to clear channel under {key}"))?;
            }
        }
        Ok(())
    }

    fn copy_first_run_preferences(&self, prefs_path: &Path) -> Result<()> {
        let destination = self.layout.preferences_path();
        copy_path(prefs_path, &destination).with_context(|| {
            format!(
                "failed to copy first-run preferences {} to {}",
                prefs_path.display(),
                destination.display()
            )
        })?;
        Ok(())
    }

    fn cleanup_legacy_shortcuts(&self) -> Result<()> {
        let path = self.legacy_uninstall_shortcut_path();
        if path_exists(&path) {
            remove_path(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
            debug!(path = %path.display(), "removed legacy uninstall shortcut");
        }
        Ok(())
    }

    fn create_or_update_shortcut(&self, shortcut: &PlannedShortcut) -> Result<bool> {
        let properties = &shortcut.properties;
        let path = self.shortcut_path(properties.level, shortcut.location, &properties.name);
        if shortcut.operation == ShortcutOperation::ReplaceExisting && !path.exists() {
            return Ok(false);
        }
        write_launcher(&path, &render_launcher(properties))?;
        Ok(true)
    }

    fn register_product(&self, make_default: bool) -> Result<()> {
        let registry = self.layout.registry();
        let key = self.registration_key();
        ensure_key(&registry, &key)?;
        let executable = self.layout.executable_path(&self.product);
        registry
            .set_value(&key, "name", KeyValue::from(self.product.name.as_str()))
            .with_context(|| format!("failed to register product under {key}"))?;
        registry
            .set_value(
                &key,
                "executable",
                KeyValue::from(executable.display().to_string()),
            )
            .with_context(|| format!("failed to register product under {key}"))?;

        if make_default {
            let parent = &self.product.registration_key;
            registry
                .set_value(
                    parent,
                    DEFAULT_CLIENT_VALUE,
                    KeyValue::from(normalize_launcher_token(&self.product.name)),
                )
                .with_context(|| format!("failed to set default client under {parent}"))?;
            info!(product = %self.product.name, "registered as default");
        }
        Ok(())
    }

    fn enable_auto_launch(&self) -> Result<()> {
        let properties = ShortcutProperties {
            level: ShortcutLevel::CurrentUser,
            executable: self.layout.executable_path(&self.product),
            name: self.product.name.clone(),
            arguments: None,
            dual_mode: false,
            pin_to_taskbar: false,
        };
        let mut entry = render_launcher(&properties);
        entry.push_str("X-GNOME-Autostart-enabled=true\n");
        write_launcher(&self.auto_launch_path(), &entry)
    }

    fn remove_old_versions(
        &self,
        new_version: &Version,
        existing_version: Option<&Version>,
    ) -> Result<Vec<PathBuf>> {
        let target = self.layout.target_path();
        let entries = match fs::read_dir(target) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", target.display()));
            }
        };

        let mut removed = Vec::new();
        let mut failures = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("failed to read {}", target.display()))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(version) = entry
                .file_name()
                .to_str()
                .and_then(|name| Version::parse(name).ok())
            else {
                continue;
            };
            if version >= *new_version || Some(&version) == existing_version {
                continue;
            }
            match remove_path(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "removed old version");
                    removed.push(path);
                }
                Err(err) => failures.push(format!("{}: {err}", path.display())),
            }
        }

        if !failures.is_empty() {
            return Err(anyhow!(
                "failed to remove old version directories: {}",
                failures.join("; ")
            ));
        }
        removed.sort();
        Ok(removed)
    }
}

fn ensure_key(registry: &RegistryStore, key: &str) -> Result<()> {
    for ancestor in RegistryStore::key_ancestry(key)? {
        registry
            .create_key(&ancestor)
            .with_context(|| format!("failed to create key {ancestor}"))?;
    }
    Ok(())
}

fn write_launcher(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, contents.as_bytes())
        .with_context(|| format!("failed to write launcher {}", path.display()))
}
