use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Deferred-removal list consumed by an external reboot-time processor.
///
/// Stored as a JSON array of absolute paths. This crate only edits the list;
/// it never deletes the listed paths itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRemovals {
    path: PathBuf,
}

impl PendingRemovals {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> Result<Vec<PathBuf>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// Adds `path` to the list. Returns false when it was already scheduled.
    pub fn add(&self, path: &Path) -> Result<bool, StoreError> {
        let mut entries = self.entries()?;
        if entries.iter().any(|entry| entry == path) {
            return Ok(false);
        }
        entries.push(path.to_path_buf());
        self.write(&entries)?;
        Ok(true)
    }

    /// Removes exactly `path`. Returns whether it was present.
    pub fn remove(&self, path: &Path) -> Result<bool, StoreError> {
        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|entry| entry != path);
        if entries.len() == before {
            return Ok(false);
        }
        self.write(&entries)?;
        Ok(true)
    }

    /// Removes every entry at or below `prefix` and returns them in list order.
    pub fn remove_under(&self, prefix: &Path) -> Result<Vec<PathBuf>, StoreError> {
        let entries = self.entries()?;
        let (removed, kept): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|entry| entry.starts_with(prefix));
        if !removed.is_empty() {
            self.write(&kept)?;
        }
        Ok(removed)
    }

    /// Re-adds entries that are not currently listed, preserving their order.
    pub fn restore(&self, restored: &[PathBuf]) -> Result<(), StoreError> {
        let mut entries = self.entries()?;
        for path in restored {
            if !entries.contains(path) {
                entries.push(path.clone());
            }
        }
        self.write(&entries)
    }

    fn write(&self, entries: &[PathBuf]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let payload =
            serde_json::to_string_pretty(entries).map_err(|source| StoreError::Json {
                path: self.path.clone(),
                source,
            })?;
        fs::write(&self.path, payload.as_bytes()).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
