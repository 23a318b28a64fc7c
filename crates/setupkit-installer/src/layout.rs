use anyhow::{Context, Result};
use setupkit_core::{ProductConfig, Version};
use setupkit_workitems::{PendingRemovals, RegistryStore};
use std::fs;
use std::path::{Path, PathBuf};

use crate::shortcuts::{ShortcutLevel, ShortcutLocation};

pub const INSTALLER_DIR: &str = "Installer";
pub const MASTER_PREFERENCES_FILE: &str = "master_preferences";
pub const VISUAL_ELEMENTS_DIR: &str = "VisualElements";
pub const VISUAL_ELEMENTS_MANIFEST: &str = "VisualElementsManifest.xml";

/// Where an installation lives on disk.
///
/// `target` is the product install directory. `state_root` holds the
/// machine-level state the installer mutates: the key-value store, the
/// deferred-removal list, run journals, launcher files and backups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    target: PathBuf,
    state_root: PathBuf,
}

impl InstallLayout {
    pub fn new(target: impl Into<PathBuf>, state_root: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            state_root: state_root.into(),
        }
    }

    pub fn target_path(&self) -> &Path {
        &self.target
    }

    pub fn state_root(&self) -> &Path {
        &self.state_root
    }

    pub fn version_dir(&self, version: &Version) -> PathBuf {
        self.target.join(version.to_string())
    }

    pub fn installer_dir(&self, version: &Version) -> PathBuf {
        self.version_dir(version).join(INSTALLER_DIR)
    }

    pub fn executable_path(&self, product: &ProductConfig) -> PathBuf {
        self.target.join(&product.executable)
    }

    /// Staging name used when the running executable cannot be replaced.
    pub fn new_executable_path(&self, product: &ProductConfig) -> PathBuf {
        self.target.join(&product.new_executable)
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.target.join(MASTER_PREFERENCES_FILE)
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.state_root.join("registry")
    }

    pub fn registry(&self) -> RegistryStore {
        RegistryStore::open(self.registry_dir())
    }

    pub fn pending_removals_path(&self) -> PathBuf {
        self.state_root.join("pending-removals.json")
    }

    pub fn pending_removals(&self) -> PendingRemovals {
        PendingRemovals::open(self.pending_removals_path())
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.state_root.join("runs")
    }

    pub fn run_active_path(&self) -> PathBuf {
        self.runs_dir().join("active")
    }

    pub fn run_metadata_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{run_id}.json"))
    }

    pub fn run_journal_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{run_id}.journal"))
    }

    pub fn run_stage_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{run_id}.stage"))
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.state_root.join("backup")
    }

    pub fn run_backup_dir(&self, run_id: &str) -> PathBuf {
        self.backups_dir().join(run_id)
    }

    pub fn shortcuts_dir(&self) -> PathBuf {
        self.state_root.join("shortcuts")
    }

    pub fn shortcut_dir(&self, level: ShortcutLevel, location: ShortcutLocation) -> PathBuf {
        self.shortcuts_dir()
            .join(level.as_str())
            .join(location.as_str())
    }

    pub fn autostart_dir(&self) -> PathBuf {
        self.state_root.join("autostart")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.state_root.clone(),
            self.registry_dir(),
            self.runs_dir(),
            self.backups_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}
