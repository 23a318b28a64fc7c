use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::fs_utils::dir_is_empty;

const VALUES_FILE: &str = ".values.json";

/// Typed scalar held by a key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum KeyValue {
    String(String),
    Dword(u32),
    Qword(u64),
}

impl KeyValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Dword(_) => "dword",
            Self::Qword(_) => "qword",
        }
    }

    pub fn same_kind(&self, other: &Self) -> bool {
        self.kind() == other.kind()
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(value) => write!(f, "\"{value}\""),
            Self::Dword(value) => write!(f, "dword:{value}"),
            Self::Qword(value) => write!(f, "qword:{value}"),
        }
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<u32> for KeyValue {
    fn from(value: u32) -> Self {
        Self::Dword(value)
    }
}

impl From<u64> for KeyValue {
    fn from(value: u64) -> Self {
        Self::Qword(value)
    }
}

/// Hierarchical key-value store rooted at a directory.
///
/// Every key is a directory below the root and its values live in a JSON
/// document inside that directory. Writes go straight to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStore {
    root: PathBuf,
}

impl RegistryStore {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Splits `key` into validated components, accepting `/` or `\` separators.
    pub fn key_components(key: &str) -> Result<Vec<String>, StoreError> {
        let components = key
            .split(['/', '\\'])
            .filter(|component| !component.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        if components.is_empty() {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
                reason: "key path is empty",
            });
        }
        for component in &components {
            if component == "." || component == ".." {
                return Err(StoreError::InvalidKey {
                    key: key.to_string(),
                    reason: "relative components are not allowed",
                });
            }
            if component.starts_with('.') {
                return Err(StoreError::InvalidKey {
                    key: key.to_string(),
                    reason: "components must not start with '.'",
                });
            }
        }
        Ok(components)
    }

    pub fn normalize_key(key: &str) -> Result<String, StoreError> {
        Ok(Self::key_components(key)?.join("/"))
    }

    /// Every ancestor of `key` including itself, shallowest first.
    pub fn key_ancestry(key: &str) -> Result<Vec<String>, StoreError> {
        let components = Self::key_components(key)?;
        Ok((1..=components.len())
            .map(|len| components[..len].join("/"))
            .collect())
    }

    pub fn key_exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.key_dir(key)?.is_dir())
    }

    /// Creates a single key whose parent already exists. Returns false when it was present.
    pub fn create_key(&self, key: &str) -> Result<bool, StoreError> {
        let dir = self.key_dir(key)?;
        if dir.is_dir() {
            return Ok(false);
        }
        if let Some(parent) = dir.parent() {
            if parent != self.root && !parent.is_dir() {
                return Err(StoreError::MissingKey {
                    key: parent_key(key),
                });
            }
        }
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(true)
    }

    /// Deletes `key` if it holds neither values nor subkeys. Returns whether it was removed.
    pub fn delete_key_if_empty(&self, key: &str) -> Result<bool, StoreError> {
        let dir = self.key_dir(key)?;
        if !dir.is_dir() {
            return Ok(false);
        }
        if !self.values(key)?.is_empty() || !self.subkeys(key)?.is_empty() {
            return Ok(false);
        }
        let values_path = dir.join(VALUES_FILE);
        if values_path.exists() {
            fs::remove_file(&values_path).map_err(|source| StoreError::Io {
                path: values_path.clone(),
                source,
            })?;
        }
        let empty = dir_is_empty(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        if !empty {
            return Ok(false);
        }
        fs::remove_dir(&dir).map_err(|source| StoreError::Io { path: dir, source })?;
        Ok(true)
    }

    pub fn subkeys(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.key_dir(key)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut subkeys = Vec::new();
        let entries = fs::read_dir(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !name.starts_with('.') {
                subkeys.push(name);
            }
        }
        subkeys.sort();
        Ok(subkeys)
    }

    pub fn values(&self, key: &str) -> Result<BTreeMap<String, KeyValue>, StoreError> {
        let path = self.key_dir(key)?.join(VALUES_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        serde_json::from_str(&raw).map_err(|source| StoreError::Json { path, source })
    }

    pub fn read_value(&self, key: &str, name: &str) -> Result<Option<KeyValue>, StoreError> {
        Ok(self.values(key)?.remove(name))
    }

    pub fn read_string(&self, key: &str, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .read_value(key, name)?
            .and_then(|value| value.as_string().map(str::to_string)))
    }

    pub fn set_value(&self, key: &str, name: &str, value: KeyValue) -> Result<(), StoreError> {
        if !self.key_exists(key)? {
            return Err(StoreError::MissingKey {
                key: key.to_string(),
            });
        }
        let mut values = self.values(key)?;
        values.insert(name.to_string(), value);
        self.write_values(key, &values)
    }

    /// Removes a value. Returns the value that was removed, if any.
    pub fn delete_value(&self, key: &str, name: &str) -> Result<Option<KeyValue>, StoreError> {
        if !self.key_exists(key)? {
            return Ok(None);
        }
        let mut values = self.values(key)?;
        let removed = values.remove(name);
        if removed.is_some() {
            self.write_values(key, &values)?;
        }
        Ok(removed)
    }

    fn write_values(
        &self,
        key: &str,
        values: &BTreeMap<String, KeyValue>,
    ) -> Result<(), StoreError> {
        let dir = self.key_dir(key)?;
        let path = dir.join(VALUES_FILE);
        if values.is_empty() {
            return match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(source) => Err(StoreError::Io { path, source }),
            };
        }

        let payload = serde_json::to_string_pretty(values).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        let tmp_path = dir.join(format!("{VALUES_FILE}.tmp"));
        fs::write(&tmp_path, payload.as_bytes()).map_err(|source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &path).map_err(|source| StoreError::Io { path, source })
    }

    fn key_dir(&self, key: &str) -> Result<PathBuf, StoreError> {
        let mut dir = self.root.clone();
        for component in Self::key_components(key)? {
            dir.push(component);
        }
        Ok(dir)
    }
}

fn parent_key(key: &str) -> String {
    let normalized = key.trim_end_matches(['/', '\\']);
    match normalized.rfind(['/', '\\']) {
        Some(idx) => normalized[..idx].to_string(),
        None => String::new(),
    }
}
